use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::{Value, json};

use super::{Calls, MockUpstream};

const BUILTIN_FLAVOR: &str = include_str!("../../../flavor/flavors/tencent.yaml");
const BUILTIN_HOST: &str = "https://hunyuan.tencentcloudapi.com";

pub const SECRET_ID: &str = "AKIDtest";
pub const SECRET_KEY: &str = "secret";

/// A submit-then-poll image job API. A job reports `RUNNING` for the first
/// `pending_polls` polls, then `SUCCEEDED`.
pub struct TencentMock {
    pending_polls: usize,
}

#[derive(Clone)]
struct MockState {
    calls: Calls,
    polls: Arc<AtomicUsize>,
    pending_polls: usize,
}

impl TencentMock {
    pub fn new() -> Self {
        Self { pending_polls: 1 }
    }

    pub async fn spawn(self) -> MockUpstream {
        let calls = Calls::default();

        let state = MockState {
            calls: calls.clone(),
            polls: Arc::new(AtomicUsize::new(0)),
            pending_polls: self.pending_polls,
        };

        let app = Router::new()
            .route("/images/generations", post(submit))
            .route("/images/tasks/{id}", get(poll))
            .with_state(state);

        MockUpstream::spawn(app, calls).await
    }
}

impl Default for TencentMock {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpstream {
    /// Write a `tencent.yaml` into `dir` that overrides the built-in flavor
    /// with every URL pointing at this mock.
    pub fn write_tencent_flavor(&self, dir: &Path) {
        let flavor = BUILTIN_FLAVOR.replace(BUILTIN_HOST, &format!("http://{}", self.address));
        std::fs::write(dir.join("tencent.yaml"), flavor).unwrap();
    }
}

fn signed(headers: &HeaderMap) -> bool {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(&format!("TC3-HMAC-SHA256 Credential={SECRET_ID}/")))
}

async fn submit(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.calls.record(format!(
        "POST /images/generations {}",
        body["input"]["prompt"].as_str().unwrap_or_default()
    ));

    if !signed(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unsigned"}))).into_response();
    }

    Json(json!({"output": {"task_id": "job-1", "task_status": "PENDING"}})).into_response()
}

async fn poll(State(state): State<MockState>, UrlPath(id): UrlPath<String>, headers: HeaderMap) -> Response {
    state.calls.record(format!("GET /images/tasks/{id}"));

    if !signed(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unsigned"}))).into_response();
    }

    let seen = state.polls.fetch_add(1, Ordering::SeqCst);

    if seen < state.pending_polls {
        return Json(json!({"output": {"task_id": id, "task_status": "RUNNING"}})).into_response();
    }

    Json(json!({
        "output": {
            "task_id": id,
            "task_status": "SUCCEEDED",
            "results": [
                {"url": "http://images.test/1.png"},
                {"url": "http://images.test/2.png"},
            ],
        }
    }))
    .into_response()
}
