use std::convert::Infallible;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::header::CONTENT_TYPE,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use bytes::Bytes;
use serde_json::{Value, json};

use super::{Calls, MockUpstream};

/// A local engine answering chat, pull and delete.
pub struct OllamaMock {
    reply: String,
}

impl OllamaMock {
    pub fn new() -> Self {
        Self {
            reply: "hello from ollama".to_string(),
        }
    }

    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    pub async fn spawn(self) -> MockUpstream {
        let calls = Calls::default();

        let app = Router::new()
            .route("/", get(|| async { "Ollama is running" }))
            .route("/api/chat", post(chat))
            .route("/api/pull", post(pull))
            .route("/api/delete", delete(remove))
            .with_state((calls.clone(), self.reply));

        MockUpstream::spawn(app, calls).await
    }
}

impl Default for OllamaMock {
    fn default() -> Self {
        Self::new()
    }
}

type MockState = State<(Calls, String)>;

async fn chat(State((calls, reply)): MockState, Json(body): Json<Value>) -> Response {
    calls.record(format!("POST /api/chat {}", body["model"].as_str().unwrap_or_default()));

    let model = body["model"].clone();

    if body["stream"] == json!(false) {
        return Json(json!({
            "model": model,
            "created_at": "2025-01-01T00:00:00Z",
            "message": {"role": "assistant", "content": reply},
            "done": true,
            "done_reason": "stop",
        }))
        .into_response();
    }

    let lines: Vec<Result<Bytes, Infallible>> = reply
        .split_inclusive(' ')
        .map(|word| json!({"model": model, "message": {"role": "assistant", "content": word}, "done": false}))
        .chain([json!({"model": model, "message": {"role": "assistant", "content": ""}, "done": true, "done_reason": "stop"})])
        .map(|line| Ok(Bytes::from(format!("{line}\n"))))
        .collect();

    (
        [(CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(futures::stream::iter(lines)),
    )
        .into_response()
}

async fn pull(State((calls, _)): MockState, Json(body): Json<Value>) -> Json<Value> {
    calls.record(format!("POST /api/pull {}", body["model"].as_str().unwrap_or_default()));
    Json(json!({"status": "success"}))
}

async fn remove(State((calls, _)): MockState, Json(body): Json<Value>) -> Json<Value> {
    calls.record(format!("DELETE /api/delete {}", body["model"].as_str().unwrap_or_default()));
    Json(json!({}))
}
