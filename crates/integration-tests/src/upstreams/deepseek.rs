use std::{convert::Infallible, time::Duration};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{Value, json};

use super::{Calls, MockUpstream};

pub const API_KEY: &str = "sk-test";

/// An OpenAI-compatible chat completions endpoint behind a bearer key.
pub struct DeepSeekMock {
    words: Vec<String>,
    chunk_delay: Duration,
    json_only: bool,
}

#[derive(Clone)]
struct MockState {
    calls: Calls,
    words: Vec<String>,
    chunk_delay: Duration,
    json_only: bool,
}

impl DeepSeekMock {
    pub fn new() -> Self {
        Self {
            words: vec!["Hello".to_string(), " from".to_string(), " deepseek".to_string()],
            chunk_delay: Duration::ZERO,
            json_only: false,
        }
    }

    /// Pause before every streamed event.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Answer with one `application/json` completion even when asked to stream.
    pub fn json_only(mut self) -> Self {
        self.json_only = true;
        self
    }

    pub async fn spawn(self) -> MockUpstream {
        let calls = Calls::default();

        let state = MockState {
            calls: calls.clone(),
            words: self.words,
            chunk_delay: self.chunk_delay,
            json_only: self.json_only,
        };

        let app = Router::new()
            .route("/chat/completions", post(completions))
            .with_state(state);

        MockUpstream::spawn(app, calls).await
    }
}

impl Default for DeepSeekMock {
    fn default() -> Self {
        Self::new()
    }
}

async fn completions(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let stream = body["stream"] == json!(true);

    state.calls.record(format!(
        "POST /chat/completions {} stream={stream}",
        body["model"].as_str().unwrap_or_default()
    ));

    let authorized = headers
        .get(AUTHORIZATION)
        .is_some_and(|value| value.as_bytes() == format!("Bearer {API_KEY}").as_bytes());

    if !authorized {
        let error = json!({"error": {"message": "Authentication Fails", "type": "authentication_error"}});
        return (StatusCode::UNAUTHORIZED, Json(error)).into_response();
    }

    let model = body["model"].clone();

    if !stream || state.json_only {
        return Json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": state.words.concat()},
                "finish_reason": "stop",
            }],
        }))
        .into_response();
    }

    let mut events: Vec<String> = state
        .words
        .iter()
        .map(|word| {
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "model": model,
                "choices": [{"index": 0, "delta": {"role": "assistant", "content": word}, "finish_reason": null}],
            })
            .to_string()
        })
        .collect();

    events.push(
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{"index": 0, "delta": {"content": ""}, "finish_reason": "stop"}],
        })
        .to_string(),
    );

    events.push("[DONE]".to_string());

    let delay = state.chunk_delay;

    let body = futures::stream::iter(events).then(move |event| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(Bytes::from(format!("data: {event}\n\n")))
    });

    ([(CONTENT_TYPE, "text/event-stream")], Body::from_stream(body)).into_response()
}
