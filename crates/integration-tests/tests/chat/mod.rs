use indoc::indoc;
use integration_tests::{
    TestServer,
    upstreams::{DeepSeekMock, MockUpstream, OllamaMock, deepseek::API_KEY},
};
use serde_json::{Value, json};
use telemetry::{EventData, EventKind};

async fn with_local_ollama() -> (TestServer, MockUpstream) {
    let ollama = OllamaMock::new().spawn().await;
    let server = TestServer::start("").await;

    server
        .install(json!({
            "provider_name": "local_ollama_chat",
            "service_name": "chat",
            "service_source": "local",
            "api_flavor": "ollama",
            "url": ollama.url("/api/chat"),
            "models": ["qwen2:7b"],
        }))
        .await;

    server.wait_downloaded("local_ollama_chat", "qwen2:7b").await;

    (server, ollama)
}

pub(crate) fn deepseek_provider(deepseek: &MockUpstream) -> Value {
    json!({
        "provider_name": "remote_deepseek_chat",
        "service_name": "chat",
        "service_source": "remote",
        "api_flavor": "deepseek",
        "url": deepseek.url("/chat/completions"),
        "auth_type": "apikey",
        "auth_key": json!({"api_key": API_KEY}).to_string(),
        "models": ["deepseek-chat"],
    })
}

#[tokio::test]
async fn local_chat_through_the_service_route() {
    let (server, ollama) = with_local_ollama().await;

    let request = json!({
        "model": "qwen2:7b",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();

    assert_eq!(body["model"], "qwen2:7b");
    insta::assert_json_snapshot!(body["message"], @r#"
    {
      "role": "assistant",
      "content": "hello from ollama"
    }
    "#);

    insta::assert_debug_snapshot!(ollama.calls.all(), @r#"
    [
        "POST /api/pull qwen2:7b",
        "POST /api/chat qwen2:7b",
    ]
    "#);

    assert_eq!(server.wait_event(EventKind::EndSession).await, 1);

    let kinds = server.events.kinds();
    assert!(kinds.contains(&EventKind::InvokeServiceProvider), "{kinds:?}");
    assert!(kinds.contains(&EventKind::SendBackResponse), "{kinds:?}");
}

#[tokio::test]
async fn local_chat_without_a_model_uses_the_latest_download() {
    let (server, ollama) = with_local_ollama().await;

    let request = json!({
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);

    let calls = ollama.calls.all();
    assert_eq!(calls.last().map(String::as_str), Some("POST /api/chat qwen2:7b"));
}

#[tokio::test]
async fn raw_ollama_route_speaks_ollama() {
    let (server, _ollama) = with_local_ollama().await;

    let request = json!({
        "model": "qwen2:7b",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = server.client.post("/api/chat", &request).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();

    assert_eq!(body["done"], true);
    assert_eq!(body["created_at"], "2025-01-01T00:00:00Z");
    assert_eq!(body["message"]["content"], "hello from ollama");
}

#[tokio::test]
async fn unknown_model_is_rejected() {
    let (server, _ollama) = with_local_ollama().await;

    let request = json!({
        "model": "llama3",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 500);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @"model 'llama3' not found for local of service 'chat'");
}

#[tokio::test]
async fn service_without_providers() {
    let server = TestServer::start("").await;

    let request = json!({"messages": [{"role": "user", "content": "hi"}]});

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 500);

    let body = response.text().await.unwrap();
    insta::assert_snapshot!(body, @"service 'chat' has neither a local nor a remote provider");
}

#[tokio::test]
async fn missing_local_slot_falls_back_to_remote() {
    let deepseek = DeepSeekMock::new().spawn().await;
    let server = TestServer::start("").await;

    server.install(deepseek_provider(&deepseek)).await;
    server.set_policy("chat", "always_local").await;

    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"]["content"], "Hello from deepseek");

    let warnings: Vec<String> = server
        .events
        .events()
        .into_iter()
        .filter(|event| event.kind == EventKind::Warning)
        .filter_map(|event| match event.data {
            EventData::Message(message) => Some(message),
            _ => None,
        })
        .collect();

    assert_eq!(warnings.len(), 1, "{warnings:?}");
    assert!(warnings[0].contains("remote"), "{warnings:?}");

    // the install probe plus the request itself
    insta::assert_debug_snapshot!(deepseek.calls.all(), @r#"
    [
        "POST /chat/completions deepseek-chat stream=false",
        "POST /chat/completions deepseek-chat stream=false",
    ]
    "#);
}

#[tokio::test]
async fn upstream_errors_are_written_back() {
    let deepseek = DeepSeekMock::new().spawn().await;

    let config = indoc! {r#"
        [import]
        health_check = false
    "#};

    let server = TestServer::start(config).await;

    let mut provider = deepseek_provider(&deepseek);
    provider["auth_key"] = json!(json!({"api_key": "sk-wrong"}).to_string());

    let provider_name = provider["provider_name"].clone();
    let document = json!({
        "version": "v0.2",
        "services": {
            "chat": {
                "service_providers": {"remote": provider_name},
                "hybrid_policy": "always_remote",
            },
        },
        "service_providers": {
            "remote_deepseek_chat": {
                "service_name": "chat",
                "service_source": "remote",
                "api_flavor": "deepseek",
                "method": "POST",
                "url": provider["url"],
                "auth_type": "apikey",
                "auth_key": provider["auth_key"],
                "models": ["deepseek-chat"],
            },
        },
    });

    let (status, body) = server
        .client
        .admin(reqwest::Method::POST, "/service/import", &document)
        .await;

    assert_eq!(status, 200, "{body}");

    let request = json!({
        "model": "deepseek-chat",
        "messages": [{"role": "user", "content": "hi"}],
    });

    let response = server.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 401);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "authentication_error");
}
