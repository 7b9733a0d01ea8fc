//! The generic handler behind every flavor route.

use std::io;

use axum::{
    body::{Body, to_bytes},
    extract::Request,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use telemetry::{EventBus, EventData, EventKind};
use tokio::sync::mpsc;

use crate::{Gateway, GatewayError, Reply, TaskResult};

/// Inbound bodies are read whole; images travel inline as base64.
const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// One client exchange. Dropping it before the task finished, on client
/// disconnect for instance, keeps draining the task's results in the
/// background so the worker never blocks on a full channel.
struct Session {
    task_id: u64,
    results: Option<mpsc::Receiver<TaskResult>>,
    events: EventBus,
    finished: bool,
}

impl Session {
    fn start(events: &EventBus) -> Self {
        events.notify(EventKind::StartSession, EventData::None);

        Self {
            task_id: 0,
            results: None,
            events: events.clone(),
            finished: false,
        }
    }

    fn attach(&mut self, task_id: u64, results: mpsc::Receiver<TaskResult>) {
        self.task_id = task_id;
        self.results = Some(results);
    }

    async fn recv(&mut self) -> Option<TaskResult> {
        let result = self.results.as_mut()?.recv().await;

        match &result {
            Some(result) if result.is_terminal() => self.finished = true,
            None => self.finished = true,
            Some(_) => {}
        }

        result
    }

    fn sent(&self, reply: &Reply, body: &Bytes) {
        self.events
            .notify_http_response(EventKind::SendBackResponse, reply.status, &reply.content.headers, body);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let events = self.events.clone();

        let Some(mut results) = self.results.take() else {
            events.notify(EventKind::EndSession, EventData::None);
            return;
        };

        if !self.finished {
            log::warn!("client of task {} went away, discarding the rest of its results", self.task_id);
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            events.notify(EventKind::EndSession, EventData::None);
            return;
        };

        runtime.spawn(async move {
            while results.recv().await.is_some() {}
            events.notify(EventKind::EndSession, EventData::None);
        });
    }
}

/// Serve one request that arrived through a route of `from_flavor`.
pub(crate) async fn handle(gateway: Gateway, from_flavor: &str, service: &str, request: Request) -> Response {
    let mut session = Session::start(gateway.events());

    let (parts, body) = request.into_parts();

    let body = match to_bytes(body, MAX_BODY_SIZE).await {
        Ok(body) => body,
        Err(error) => return GatewayError::InvalidRequest(format!("cannot read request body: {error}")).into_response(),
    };

    let admission = gateway
        .invoke_service(from_flavor, service, parts.method, parts.uri, parts.headers, body)
        .await;

    match admission {
        Ok((task_id, results)) => session.attach(task_id, results),
        Err(error) => return error.into_response(),
    }

    write_back(session).await
}

/// The first result decides the shape of the response: a terminal result is
/// written whole, a chunk opens a streaming body.
async fn write_back(mut session: Session) -> Response {
    let Some(first) = session.recv().await else {
        return GatewayError::SchedulerClosed.into_response();
    };

    match first {
        TaskResult::Failed(error) => error.into_response(),
        TaskResult::Done(reply) => {
            session.sent(&reply, &reply.content.body);

            let body = Body::from(reply.content.body.clone());
            response(&reply, body)
        }
        TaskResult::Chunk(reply) => {
            session.sent(&reply, &reply.content.body);

            let first = reply.content.body.clone();
            let head = futures::stream::once(async move { Ok::<_, io::Error>(first) });
            let rest = futures::stream::unfold(session, next_chunk);

            response(&reply, Body::from_stream(head.chain(rest)))
        }
    }
}

async fn next_chunk(mut session: Session) -> Option<(Result<Bytes, io::Error>, Session)> {
    loop {
        match session.recv().await? {
            TaskResult::Chunk(reply) => {
                session.sent(&reply, &reply.content.body);
                return Some((Ok(reply.content.body), session));
            }
            TaskResult::Done(reply) if !reply.content.body.is_empty() => {
                session.sent(&reply, &reply.content.body);
                return Some((Ok(reply.content.body), session));
            }
            TaskResult::Done(_) => {}
            TaskResult::Failed(error) => {
                // headers are gone already, the client sees a cut stream
                log::error!("task {} failed mid-stream: {error}", session.task_id);
                return Some((Err(io::Error::other(error.to_string())), session));
            }
        }
    }
}

fn response(reply: &Reply, body: Body) -> Response {
    let mut response = Response::new(body);

    *response.status_mut() = reply.status;
    *response.headers_mut() = header_rules::forwardable(&reply.content.headers);

    response
}
