use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use convert::{Content, ConvertContext};
use flavor::{Flavor, FlavorRegistry, Stage};
use http::StatusCode;
use registry::ServiceSource;
use serde_json::{Map, Value};
use telemetry::{EventBus, EventKind};

use crate::{
    GatewayError, Reply, TaskResult,
    client::{UpstreamClient, UpstreamResponse},
    stream::{self, ChunkReader, Reframer, StreamMode},
    task::RunningTask,
};

const TEXT_TO_IMAGE: &str = "text-to-image";
const IMAGE_TYPES: [&str; 2] = ["path", "url"];

/// Runs dispatched tasks end to end: request conversion, the upstream
/// exchange, and conversion and framing of the response.
#[derive(Clone)]
pub(crate) struct TaskRunner {
    flavors: Arc<FlavorRegistry>,
    client: UpstreamClient,
    events: EventBus,
}

/// The two flavors of a task and whether payloads cross between them.
struct Route<'a> {
    from: &'a Flavor,
    to: &'a Flavor,
    service: &'a str,
}

impl Route<'_> {
    fn converts(&self) -> bool {
        self.from.name() != self.to.name()
    }
}

impl TaskRunner {
    pub fn new(flavors: Arc<FlavorRegistry>, client: UpstreamClient, events: EventBus) -> Self {
        Self { flavors, client, events }
    }

    /// Run `task`, sending its results as they come.
    ///
    /// On success the last result sent is [`TaskResult::Done`]. On error
    /// nothing terminal has been sent and the caller reports the failure.
    pub async fn run(&self, task: RunningTask) -> Result<(), GatewayError> {
        let request = &task.request;
        let target = &task.target;

        let route = Route {
            from: self.flavors.get(&request.from_flavor)?,
            to: self.flavors.get(&target.flavor)?,
            service: &request.service,
        };

        let service = route.to.service(route.service)?;

        if request.model.is_some() && target.model.is_some() && request.model != target.model {
            log::warn!(
                "task {} asked for model {:?} but runs on {:?}",
                task.id,
                request.model,
                target.model
            );
        }

        let mut content = request.content.clone();

        if request.service == TEXT_TO_IMAGE {
            content = prepare_image(content, target.location).await?;
        }

        if route.converts() {
            let mut ctx = ConvertContext::new().with("stream", Value::Bool(target.stream));

            if let Some(model) = &target.model {
                ctx.insert("model", Value::String(model.clone()));
            }

            log::debug!(
                "task {} converting request from {} to {}",
                task.id,
                route.from.name(),
                route.to.name()
            );

            let uri = request.uri.to_string();

            content = self.flavors.convert(
                route.from.name(),
                route.to.name(),
                route.service,
                Stage::Request,
                content,
                &ctx,
                |canonical| {
                    self.events.notify_http_request(
                        EventKind::RequestConvertedToCanonical,
                        &request.method,
                        &uri,
                        &canonical.headers,
                        &canonical.body,
                    )
                },
            )?;
        }

        let response = self.client.invoke(task.id, &target.provider, service, content).await?;
        let mode = StreamMode::from_headers(&response.headers);

        // flavors that need a response id and get none from upstream use this one
        let ctx = ConvertContext::new().with("id", Value::String(format!("{}{}", rand::random::<u64>(), task.id)));

        log::debug!("task {} upstream answered {} ({mode:?})", task.id, response.status);

        if mode.is_stream() {
            self.relay_stream(&task, &route, response, mode, &ctx).await
        } else {
            self.relay_whole(&task, &route, response, &ctx).await
        }
    }

    async fn relay_whole(
        &self,
        task: &RunningTask,
        route: &Route<'_>,
        response: UpstreamResponse,
        ctx: &ConvertContext,
    ) -> Result<(), GatewayError> {
        let status = response.status;
        let headers = response.headers;
        let body = response.body.bytes().await?;

        self.events
            .notify_http_response(EventKind::ServiceProviderResponse, status, &headers, &body);

        let mut content = Content::new(body, headers);

        if route.converts() {
            content = self.convert_response(route, Stage::Response, status, content, ctx)?;
        }

        task.send(TaskResult::Done(Reply { status, content })).await;

        Ok(())
    }

    async fn relay_stream(
        &self,
        task: &RunningTask,
        route: &Route<'_>,
        response: UpstreamResponse,
        mode: StreamMode,
        ctx: &ConvertContext,
    ) -> Result<(), GatewayError> {
        let status = response.status;
        let upstream_headers = response.headers;
        let inbound = route.from.service(route.service)?;

        let mut reframer = Reframer::new(
            inbound.stream_prologue(),
            inbound.stream_epilogue(),
            mode,
            upstream_headers.clone(),
        );

        let mut reader = ChunkReader::new(response.body.into_stream(), mode);

        while let Some(chunk) = reader.next_chunk().await? {
            self.events
                .notify_http_response(EventKind::ServiceProviderResponse, status, &upstream_headers, &chunk);

            if !route.converts() {
                let content = Content::new(chunk, upstream_headers.clone());
                task.send(TaskResult::Chunk(Reply { status, content })).await;

                continue;
            }

            let payload = stream::unwrap(mode, &chunk);

            if payload.iter().all(u8::is_ascii_whitespace) {
                log::debug!("task {} dropping empty chunk", task.id);
                continue;
            }

            let content = Content::new(payload, upstream_headers.clone());

            let converted = match self.convert_response(route, Stage::StreamResponse, status, content, ctx) {
                Ok(converted) => converted,
                Err(GatewayError::Flavor(error)) if error.is_drop() => {
                    log::debug!("task {} chunk dropped by conversion", task.id);
                    continue;
                }
                Err(error) => return Err(error),
            };

            for content in reframer.frame(converted) {
                task.send(TaskResult::Chunk(Reply { status, content })).await;
            }
        }

        if route.converts() {
            for content in reframer.finish() {
                task.send(TaskResult::Chunk(Reply { status, content })).await;
            }
        }

        let content = Content::new(Bytes::new(), upstream_headers);
        task.send(TaskResult::Done(Reply { status, content })).await;

        Ok(())
    }

    fn convert_response(
        &self,
        route: &Route<'_>,
        stage: Stage,
        status: StatusCode,
        content: Content,
        ctx: &ConvertContext,
    ) -> Result<Content, GatewayError> {
        let converted = self.flavors.convert(
            route.to.name(),
            route.from.name(),
            route.service,
            stage,
            content,
            ctx,
            |canonical| {
                self.events.notify_http_response(
                    EventKind::ResponseConvertedToCanonical,
                    status,
                    &canonical.headers,
                    &canonical.body,
                )
            },
        )?;

        Ok(converted)
    }
}

/// Resolve the `image_type` / `image` pair of a text-to-image request for the
/// chosen location. Local files are inlined as base64 for remote providers.
async fn prepare_image(content: Content, location: ServiceSource) -> Result<Content, GatewayError> {
    let Ok(mut body) = serde_json::from_slice::<Map<String, Value>>(&content.body) else {
        return Ok(content);
    };

    let image_type = body.get("image_type").and_then(Value::as_str);
    let image = body.get("image").and_then(Value::as_str);

    let (image_type, image) = match (image_type, image) {
        (None, None) => return Ok(content),
        (Some(_), None) => return Err(GatewayError::InvalidRequest("image_type is set but image is missing".to_string())),
        (None, Some(_)) => return Err(GatewayError::InvalidRequest("image is set but image_type is missing".to_string())),
        (Some(image_type), Some(image)) => (image_type.to_string(), image.to_string()),
    };

    if !IMAGE_TYPES.contains(&image_type.as_str()) {
        return Err(GatewayError::InvalidRequest(format!(
            "unsupported image type '{image_type}', expected one of {IMAGE_TYPES:?}"
        )));
    }

    match (image_type.as_str(), location) {
        ("path", ServiceSource::Remote) => {
            let data = tokio::fs::read(&image)
                .await
                .map_err(|error| GatewayError::InvalidRequest(format!("cannot read image '{image}': {error}")))?;

            body.insert("image".to_string(), Value::String(STANDARD.encode(data)));
        }
        ("url", ServiceSource::Local) => {
            log::debug!("passing image url {image} to the local provider as is");
            return Ok(content);
        }
        _ => return Ok(content),
    }

    let body = serde_json::to_vec(&body).map_err(|error| GatewayError::InvalidRequest(error.to_string()))?;

    Ok(Content::new(body, content.headers))
}
