//! Submit-then-poll exchanges: the provider acknowledges with a remote task
//! id and the result is fetched from a second URL once that task settles.

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde::Deserialize;
use url::Url;

use crate::{
    GatewayError,
    auth::Authenticator,
    client::{UpstreamBody, UpstreamClient, UpstreamRequest, UpstreamResponse},
};

const SETTLED: [&str; 3] = ["SUCCEEDED", "FAILED", "UNKNOWN"];

#[derive(Debug, Default, Deserialize)]
struct SegmentReply {
    #[serde(default)]
    output: SegmentOutput,
}

#[derive(Debug, Default, Deserialize)]
struct SegmentOutput {
    #[serde(default)]
    task_id: String,
    #[serde(default)]
    task_status: String,
}

fn parse_reply(body: &Bytes) -> Result<SegmentReply, GatewayError> {
    serde_json::from_slice(body).map_err(|error| GatewayError::MultiSegment(error.to_string()))
}

impl UpstreamClient {
    /// Poll `<extra_url>/<remote task id>` until the remote task settles. The
    /// settled response replaces the submit response.
    pub(crate) async fn poll_segments(
        &self,
        task_id: u64,
        authenticator: &Authenticator,
        extra_url: &str,
        submitted: UpstreamResponse,
    ) -> Result<UpstreamResponse, GatewayError> {
        let body = submitted.body.bytes().await?;
        let remote_task = parse_reply(&body)?.output.task_id;

        if remote_task.is_empty() {
            return Err(GatewayError::MultiSegment("submit response has no output.task_id".to_string()));
        }

        let url = format!("{}/{remote_task}", extra_url.trim_end_matches('/'));
        let url = Url::parse(&url).map_err(|error| GatewayError::MultiSegment(format!("invalid poll url '{url}': {error}")))?;

        let mut attempts = 0;

        loop {
            if self.max_poll_attempts > 0 && attempts >= self.max_poll_attempts {
                return Err(GatewayError::PollLimit {
                    task_id: remote_task,
                    attempts,
                });
            }

            attempts += 1;

            let mut request = UpstreamRequest {
                method: Method::GET,
                url: url.clone(),
                headers: HeaderMap::new(),
                body: Bytes::new(),
            };

            authenticator.authenticate(&mut request)?;

            let response = self.send(request).await?;
            let body = response.body.bytes().await?;
            let status = parse_reply(&body)?.output.task_status;

            if SETTLED.contains(&status.as_str()) {
                log::debug!("task {task_id} remote task {remote_task} settled as {status} after {attempts} polls");

                return Ok(UpstreamResponse {
                    status: response.status,
                    headers: response.headers,
                    body: UpstreamBody::Full(body),
                });
            }

            log::debug!("task {task_id} remote task {remote_task} is {status}, polling again");
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
