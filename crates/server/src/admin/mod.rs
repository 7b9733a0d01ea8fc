//! CRUD on services, providers and models, plus export and import of the
//! whole registry. Mounted under `/aog/<version>`.

mod error;
mod models;
mod params;
mod provision;
mod providers;
mod services;
mod transfer;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use config::ImportConfig;
use gateway::Gateway;
use registry::Registry;

use crate::engine::EngineFactory;

pub(crate) use error::{AdminError, Envelope, code};
pub(crate) use params::Params;

/// Shared by every admin handler.
#[derive(Clone)]
pub(crate) struct AdminState {
    pub gateway: Gateway,
    pub engines: Arc<dyn EngineFactory>,
    pub import: ImportConfig,
}

impl AdminState {
    pub fn registry(&self) -> &Registry {
        self.gateway.registry()
    }
}

pub(crate) fn router(state: AdminState) -> Router {
    Router::new()
        .route("/service", get(services::list).put(services::update))
        .route("/service/install", post(services::install))
        .route("/service/export", post(transfer::export))
        .route("/service/import", post(transfer::import))
        .route(
            "/service_provider",
            get(providers::list)
                .post(providers::create)
                .put(providers::update)
                .delete(providers::delete),
        )
        .route("/model", get(models::list).post(models::create).delete(models::delete))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, StatusCode},
    };
    use config::GatewayConfig;
    use flavor::FlavorRegistry;
    use gateway::FixedLoad;
    use registry::{MemoryStore, ModelStatus, Provider};
    use serde_json::{Value, json};
    use telemetry::EventBus;
    use tower::ServiceExt;

    use super::*;
    use crate::engine::{EngineError, ModelEngine};

    #[derive(Clone, Default)]
    struct FakeEngines {
        down: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ModelEngine for FakeEngines {
        async fn health(&self) -> Result<(), EngineError> {
            if self.down {
                return Err(EngineError::Status {
                    status: 503,
                    message: "engine is down".to_string(),
                });
            }

            Ok(())
        }

        async fn pull(&self, model: &str) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push(format!("pull {model}"));
            Ok(())
        }

        async fn delete(&self, model: &str) -> Result<(), EngineError> {
            self.health().await?;
            self.calls.lock().unwrap().push(format!("delete {model}"));
            Ok(())
        }
    }

    impl EngineFactory for FakeEngines {
        fn engine(&self, _: &Provider) -> Result<Arc<dyn ModelEngine>, EngineError> {
            Ok(Arc::new(self.clone()))
        }
    }

    struct Admin {
        router: Router,
        registry: Registry,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Admin {
        fn new(engines: FakeEngines) -> Self {
            let flavors = Arc::new(FlavorRegistry::builtin().unwrap());
            let registry = Registry::new(Arc::new(MemoryStore::default()), flavors);
            registry.seed_default_services().unwrap();

            let gateway = Gateway::with_load(
                &GatewayConfig::default(),
                registry.clone(),
                EventBus::new(),
                Arc::new(FixedLoad::default()),
            )
            .unwrap();

            let calls = engines.calls.clone();

            let router = router(AdminState {
                gateway,
                engines: Arc::new(engines),
                import: ImportConfig::default(),
            });

            Self { router, registry, calls }
        }

        async fn call(&self, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

            (status, serde_json::from_slice(&body).unwrap())
        }

        async fn install_ollama_chat(&self) {
            let (status, body) = self
                .call(
                    Method::POST,
                    "/service/install",
                    json!({
                        "provider_name": "local_ollama_chat",
                        "service_name": "chat",
                        "service_source": "local",
                        "api_flavor": "ollama",
                        "models": ["qwen2:7b"],
                    }),
                )
                .await;

            assert_eq!(status, StatusCode::OK, "{body}");
        }

        async fn wait_downloaded(&self, provider: &str, model: &str) {
            let mut downloaded = false;

            for _ in 0..100 {
                let found = self.registry.find_model(provider, model).unwrap();
                downloaded = found.is_some_and(|model| model.status == ModelStatus::Downloaded);

                if downloaded {
                    break;
                }

                tokio::time::sleep(Duration::from_millis(10)).await;
            }

            assert!(downloaded, "model {model} never finished downloading");
        }
    }

    #[tokio::test]
    async fn install_fills_the_service_slot_and_pulls() {
        let admin = Admin::new(FakeEngines::default());

        admin.install_ollama_chat().await;
        admin.wait_downloaded("local_ollama_chat", "qwen2:7b").await;

        let service = admin.registry.get_service("chat").unwrap();
        assert_eq!(service.local_provider, "local_ollama_chat");

        insta::assert_debug_snapshot!(admin.calls.lock().unwrap(), @r#"
        [
            "pull qwen2:7b",
        ]
        "#);

        let (_, body) = admin.call(Method::GET, "/service?service_name=chat", json!({})).await;

        assert_eq!(body["business_code"], 10000);
        assert_eq!(body["data"][0]["status"], 1);
    }

    #[tokio::test]
    async fn duplicate_provider() {
        let admin = Admin::new(FakeEngines::default());
        admin.install_ollama_chat().await;

        let (status, body) = admin
            .call(
                Method::POST,
                "/service_provider",
                json!({
                    "provider_name": "local_ollama_chat",
                    "service_name": "chat",
                    "service_source": "local",
                    "api_flavor": "ollama",
                }),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["business_code"], 10009);
    }

    #[tokio::test]
    async fn local_provider_needs_a_running_engine() {
        let admin = Admin::new(FakeEngines {
            down: true,
            ..FakeEngines::default()
        });

        let (status, body) = admin
            .call(
                Method::POST,
                "/service_provider",
                json!({
                    "provider_name": "local_ollama_embed",
                    "service_name": "embed",
                    "service_source": "local",
                    "api_flavor": "ollama",
                }),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["business_code"], 20003);
        assert!(admin.registry.get_provider("local_ollama_embed").is_err());
    }

    #[tokio::test]
    async fn service_slots_must_match_the_provider() {
        let admin = Admin::new(FakeEngines::default());
        admin.install_ollama_chat().await;

        let (status, body) = admin
            .call(
                Method::PUT,
                "/service",
                json!({"service_name": "chat", "remote_provider": "local_ollama_chat"}),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["business_code"], 10001);

        let (_, body) = admin
            .call(Method::PUT, "/service", json!({"service_name": "chat", "hybrid_policy": "sometimes"}))
            .await;

        assert_eq!(body["business_code"], 10016);

        let (status, body) = admin
            .call(Method::PUT, "/service", json!({"service_name": "chat", "hybrid_policy": "always_local"}))
            .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(admin.registry.get_service("chat").unwrap().hybrid_policy, registry::HybridPolicy::AlwaysLocal);
    }

    #[tokio::test]
    async fn model_lifecycle() {
        let admin = Admin::new(FakeEngines::default());
        admin.install_ollama_chat().await;
        admin.wait_downloaded("local_ollama_chat", "qwen2:7b").await;

        let (_, body) = admin
            .call(
                Method::POST,
                "/model",
                json!({"model_name": "qwen2:7b", "service_name": "chat", "service_source": "local"}),
            )
            .await;

        assert_eq!(body["business_code"], 30002);

        let (status, body) = admin
            .call(
                Method::DELETE,
                "/model",
                json!({"model_name": "llama3", "provider_name": "local_ollama_chat"}),
            )
            .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["business_code"], 30003);

        let (status, body) = admin
            .call(
                Method::DELETE,
                "/model",
                json!({"model_name": "qwen2:7b", "provider_name": "local_ollama_chat"}),
            )
            .await;

        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(admin.calls.lock().unwrap().contains(&"delete qwen2:7b".to_string()));

        let (_, body) = admin.call(Method::GET, "/model?provider_name=local_ollama_chat", json!({})).await;
        assert_eq!(body["data"], json!([]));
    }

    #[tokio::test]
    async fn deleting_a_provider_clears_its_slot() {
        let admin = Admin::new(FakeEngines::default());
        admin.install_ollama_chat().await;

        let (status, _) = admin
            .call(Method::DELETE, "/service_provider", json!({"provider_name": "local_ollama_chat"}))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(admin.registry.get_service("chat").unwrap().local_provider, "");

        let (_, body) = admin
            .call(Method::DELETE, "/service_provider", json!({"provider_name": "local_ollama_chat"}))
            .await;

        assert_eq!(body["business_code"], 20002);
    }

    #[tokio::test]
    async fn export_document() {
        let admin = Admin::new(FakeEngines::default());
        admin.install_ollama_chat().await;

        let (status, body) = admin.call(Method::POST, "/service/export", json!({})).await;

        assert_eq!(status, StatusCode::OK);
        insta::assert_json_snapshot!(body, @r#"
        {
          "version": "v0.2",
          "services": {
            "chat": {
              "service_providers": {
                "local": "local_ollama_chat",
                "remote": ""
              },
              "hybrid_policy": "default"
            }
          },
          "service_providers": {
            "local_ollama_chat": {
              "service_name": "chat",
              "service_source": "local",
              "desc": "",
              "api_flavor": "ollama",
              "method": "POST",
              "url": "http://127.0.0.1:11434/api/chat",
              "auth_type": "none",
              "auth_key": "",
              "models": [
                "qwen2:7b"
              ]
            }
          }
        }
        "#);
    }

    #[tokio::test]
    async fn import_round_trip() {
        let source = Admin::new(FakeEngines::default());
        source.install_ollama_chat().await;

        let (_, document) = source.call(Method::POST, "/service/export", json!({})).await;

        let target = Admin::new(FakeEngines::default());
        let (status, body) = target.call(Method::POST, "/service/import", document.clone()).await;

        assert_eq!(status, StatusCode::OK, "{body}");

        target.wait_downloaded("local_ollama_chat", "qwen2:7b").await;
        let (_, exported) = target.call(Method::POST, "/service/export", json!({})).await;

        assert_eq!(exported, document);
    }

    #[tokio::test]
    async fn import_rejects_before_committing() {
        let source = Admin::new(FakeEngines::default());
        source.install_ollama_chat().await;

        let (_, mut document) = source.call(Method::POST, "/service/export", json!({})).await;

        let target = Admin::new(FakeEngines {
            down: true,
            ..FakeEngines::default()
        });

        let (_, body) = target.call(Method::POST, "/service/import", document.clone()).await;
        assert_eq!(body["business_code"], 20003);
        assert!(target.registry.get_provider("local_ollama_chat").is_err());
        assert_eq!(target.registry.get_service("chat").unwrap().local_provider, "");

        document["version"] = json!("v0.1");
        let (_, body) = target.call(Method::POST, "/service/import", document).await;
        assert_eq!(body["business_code"], 10014);
    }
}
