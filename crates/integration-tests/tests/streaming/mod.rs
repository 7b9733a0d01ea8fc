use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use integration_tests::{
    TestServer,
    upstreams::{DeepSeekMock, MockUpstream},
};
use serde_json::{Value, json};
use telemetry::EventKind;

use crate::chat::deepseek_provider;

async fn with_remote_deepseek(deepseek: &MockUpstream, provider: Value) -> TestServer {
    let server = TestServer::start("").await;

    server.install(provider).await;
    server.set_policy("chat", "always_remote").await;

    assert_eq!(deepseek.calls.all().len(), 1, "only the install probe ran");

    server
}

/// The `data` of every event in the body.
async fn event_data(response: reqwest::Response) -> Vec<String> {
    response
        .bytes_stream()
        .eventsource()
        .map(|event| event.unwrap().data)
        .collect()
        .await
}

fn content_type(response: &reqwest::Response) -> String {
    response.headers()["content-type"].to_str().unwrap().to_string()
}

#[tokio::test]
async fn openai_client_streams_from_deepseek() {
    let deepseek = DeepSeekMock::new().spawn().await;
    let server = with_remote_deepseek(&deepseek, deepseek_provider(&deepseek)).await;

    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });

    let response = server
        .client
        .post("/aog/v0.2/api_flavors/openai/v1/chat/completions", &request)
        .await;

    assert_eq!(response.status(), 200);
    assert!(content_type(&response).starts_with("text/event-stream"));

    let data = event_data(response).await;
    let (done, chunks) = data.split_last().unwrap();

    assert_eq!(done, "[DONE]");

    let chunks: Vec<Value> = chunks.iter().map(|chunk| serde_json::from_str(chunk).unwrap()).collect();

    assert!(chunks.iter().all(|chunk| chunk["object"] == "chat.completion.chunk"));

    let text: String = chunks
        .iter()
        .filter_map(|chunk| chunk["choices"][0]["delta"]["content"].as_str())
        .collect();

    assert_eq!(text, "Hello from deepseek");

    let last = chunks.last().unwrap();
    assert_eq!(last["choices"][0]["finish_reason"], "stop");

    assert_eq!(
        deepseek.calls.all().last().map(String::as_str),
        Some("POST /chat/completions deepseek-chat stream=true")
    );
}

#[tokio::test]
async fn raw_openai_route_reaches_the_same_service() {
    let deepseek = DeepSeekMock::new().spawn().await;
    let server = with_remote_deepseek(&deepseek, deepseek_provider(&deepseek)).await;

    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi"}],
    });

    let response = server.client.post("/v1/chat/completions", &request).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();

    assert_eq!(body["object"], "chat.completion");
    assert_eq!(body["choices"][0]["message"]["content"], "Hello from deepseek");
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
}

#[tokio::test]
async fn canonical_client_streams_one_object_per_event() {
    let deepseek = DeepSeekMock::new().spawn().await;
    let server = with_remote_deepseek(&deepseek, deepseek_provider(&deepseek)).await;

    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);

    let data = event_data(response).await;

    // the upstream terminator is dropped, no epilogue is added
    assert!(data.iter().all(|data| data != "[DONE]"), "{data:?}");

    let chunks: Vec<Value> = data.iter().map(|chunk| serde_json::from_str(chunk).unwrap()).collect();
    let text: String = chunks.iter().filter_map(|chunk| chunk["message"]["content"].as_str()).collect();

    assert_eq!(text, "Hello from deepseek");
    assert_eq!(chunks.last().unwrap()["finished"], true);
}

#[tokio::test]
async fn stream_is_downgraded_for_non_streaming_providers() {
    let deepseek = DeepSeekMock::new().spawn().await;

    let mut provider = deepseek_provider(&deepseek);
    provider["properties"] = json!({"supported_response_mode": ["non_stream"]});

    let server = with_remote_deepseek(&deepseek, provider).await;

    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);
    assert!(!content_type(&response).starts_with("text/event-stream"));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"]["content"], "Hello from deepseek");

    assert_eq!(
        deepseek.calls.all().last().map(String::as_str),
        Some("POST /chat/completions deepseek-chat stream=false")
    );

    assert_eq!(server.wait_event(EventKind::Warning).await, 1);
}

#[tokio::test]
async fn json_answer_to_a_stream_request_is_relayed_whole() {
    let deepseek = DeepSeekMock::new().json_only().spawn().await;
    let server = with_remote_deepseek(&deepseek, deepseek_provider(&deepseek)).await;

    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);
    assert!(!content_type(&response).starts_with("text/event-stream"));

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"]["content"], "Hello from deepseek");

    // the provider was asked to stream, its content type decided the exchange
    assert_eq!(
        deepseek.calls.all().last().map(String::as_str),
        Some("POST /chat/completions deepseek-chat stream=true")
    );

    assert_eq!(server.wait_event(EventKind::EndSession).await, 1);
}

#[tokio::test]
async fn client_disconnect_mid_stream_ends_the_session() {
    let deepseek = DeepSeekMock::new()
        .with_chunk_delay(Duration::from_millis(100))
        .spawn()
        .await;

    let server = with_remote_deepseek(&deepseek, deepseek_provider(&deepseek)).await;

    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": true,
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);

    let mut body = response.bytes_stream();
    let first = body.next().await.unwrap().unwrap();
    assert!(first.starts_with(b"data: "));

    drop(body);

    assert_eq!(server.wait_event(EventKind::EndSession).await, 1);

    // the gateway keeps serving after the abandoned stream
    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi again"}],
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);
}
