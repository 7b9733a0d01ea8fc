use indoc::indoc;
use integration_tests::{
    TestServer,
    upstreams::{DeepSeekMock, OllamaMock},
};
use reqwest::Method;
use serde_json::{Value, json};

use crate::chat::deepseek_provider;

#[tokio::test]
async fn seeded_services_start_empty() {
    let server = TestServer::start("").await;

    let (status, body) = server.client.admin(Method::GET, "/service", &Value::Null).await;
    assert_eq!(status, 200);

    let services: Vec<(String, String, u64)> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|service| {
            (
                service["service_name"].as_str().unwrap().to_string(),
                service["hybrid_policy"].as_str().unwrap().to_string(),
                service["status"].as_u64().unwrap(),
            )
        })
        .collect();

    insta::assert_debug_snapshot!(services, @r#"
    [
        (
            "chat",
            "default",
            0,
        ),
        (
            "embed",
            "default",
            0,
        ),
        (
            "generate",
            "default",
            0,
        ),
        (
            "models",
            "default",
            0,
        ),
        (
            "text-to-image",
            "always_remote",
            0,
        ),
    ]
    "#);
}

#[tokio::test]
async fn local_model_lifecycle_drives_the_engine() {
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

    let (status, body) = server
        .client
        .admin(
            Method::POST,
            "/model",
            &json!({"model_name": "llama3", "service_name": "chat", "service_source": "local"}),
        )
        .await;

    assert_eq!(status, 200, "{body}");
    server.wait_downloaded("local_ollama_chat", "llama3").await;

    let (status, body) = server
        .client
        .admin(
            Method::DELETE,
            "/model",
            &json!({"model_name": "qwen2:7b", "provider_name": "local_ollama_chat"}),
        )
        .await;

    assert_eq!(status, 200, "{body}");

    let (status, body) = server
        .client
        .admin(
            Method::DELETE,
            "/model",
            &json!({"model_name": "qwen2:7b", "provider_name": "local_ollama_chat"}),
        )
        .await;

    assert_eq!(status, 404);
    assert_eq!(body["business_code"], 30003);

    insta::assert_debug_snapshot!(ollama.calls.all(), @r#"
    [
        "POST /api/pull qwen2:7b",
        "POST /api/pull llama3",
        "DELETE /api/delete qwen2:7b",
    ]
    "#);
}

#[tokio::test]
async fn unreachable_local_engine_is_refused() {
    let server = TestServer::start("").await;

    let (status, body) = server
        .client
        .admin(
            Method::POST,
            "/service_provider",
            &json!({
                "provider_name": "local_ollama_chat",
                "service_name": "chat",
                "service_source": "local",
                "api_flavor": "ollama",
                "url": "http://127.0.0.1:9/api/chat",
                "models": ["qwen2:7b"],
            }),
        )
        .await;

    assert_eq!(status, 400, "{body}");
    assert_eq!(body["business_code"], 20003);

    let (_, body) = server.client.admin(Method::GET, "/service_provider", &Value::Null).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn remote_provider_without_a_reachable_model_is_refused() {
    let deepseek = DeepSeekMock::new().spawn().await;
    let server = TestServer::start("").await;

    let mut provider = deepseek_provider(&deepseek);
    provider["auth_key"] = json!(json!({"api_key": "sk-wrong"}).to_string());

    let (status, body) = server.client.admin(Method::POST, "/service_provider", &provider).await;

    assert_eq!(status, 400, "{body}");
    assert_eq!(body["business_code"], 20004);

    let (_, body) = server.client.admin(Method::GET, "/service_provider", &Value::Null).await;
    assert_eq!(body["data"], json!([]));

    insta::assert_debug_snapshot!(deepseek.calls.all(), @r#"
    [
        "POST /chat/completions deepseek-chat stream=false",
    ]
    "#);
}

#[tokio::test]
async fn provider_listing_hides_nothing_it_stores() {
    let deepseek = DeepSeekMock::new().spawn().await;
    let server = TestServer::start("").await;

    server.install(deepseek_provider(&deepseek)).await;

    let (status, body) = server
        .client
        .admin(Method::GET, "/service_provider?provider_name=remote_deepseek_chat", &Value::Null)
        .await;

    assert_eq!(status, 200);

    let provider = &body["data"][0];

    assert_eq!(provider["api_flavor"], "deepseek");
    assert_eq!(provider["auth_type"], "apikey");
    assert_eq!(provider["method"], "POST");
    assert_eq!(provider["models"], json!(["deepseek-chat"]));
    assert_eq!(provider["url"], deepseek.url("/chat/completions"));
}

#[tokio::test]
async fn export_then_import_into_a_fresh_gateway() {
    let ollama = OllamaMock::new().spawn().await;
    let deepseek = DeepSeekMock::new().spawn().await;

    let source = TestServer::start("").await;

    source
        .install(json!({
            "provider_name": "local_ollama_chat",
            "service_name": "chat",
            "service_source": "local",
            "api_flavor": "ollama",
            "url": ollama.url("/api/chat"),
            "models": ["qwen2:7b"],
        }))
        .await;

    source.install(deepseek_provider(&deepseek)).await;
    source.wait_downloaded("local_ollama_chat", "qwen2:7b").await;
    source.set_policy("chat", "always_local").await;

    let (status, document) = source
        .client
        .admin(Method::POST, "/service/export", &Value::Null)
        .await;

    assert_eq!(status, 200);
    assert_eq!(document["version"], "v0.2");

    insta::assert_json_snapshot!(document["services"], @r#"
    {
      "chat": {
        "service_providers": {
          "local": "local_ollama_chat",
          "remote": "remote_deepseek_chat"
        },
        "hybrid_policy": "always_local"
      }
    }
    "#);

    // the target neither probes nor pulls
    let config = indoc! {r#"
        [import]
        health_check = false
        pull_models = false
    "#};

    let target = TestServer::start(config).await;

    let (status, body) = target
        .client
        .admin(Method::POST, "/service/import", &document)
        .await;

    assert_eq!(status, 200, "{body}");

    let (_, exported) = target
        .client
        .admin(Method::POST, "/service/export", &Value::Null)
        .await;

    assert_eq!(exported, document);

    // one pull by the source only
    assert_eq!(ollama.calls.all(), vec!["POST /api/pull qwen2:7b".to_string()]);

    let request = json!({
        "model": "qwen2:7b",
        "messages": [{"role": "user", "content": "hi"}],
        "stream": false,
    });

    let response = target.client.post("/aog/v0.2/services/chat", &request).await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn import_with_a_foreign_version_is_refused() {
    let server = TestServer::start("").await;

    let document = json!({"version": "v0.1", "services": {}, "service_providers": {}});

    let (status, body) = server
        .client
        .admin(Method::POST, "/service/import", &document)
        .await;

    assert_eq!(status, 400);
    assert_eq!(body["business_code"], 10014);
}
