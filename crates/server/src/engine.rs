//! Model management on local engines.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use registry::{ModelStatus, Provider, Registry};
use serde_json::json;
use url::Url;

/// Errors talking to a local engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine url '{0}' has no host")]
    InvalidUrl(String),

    #[error("engine request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("engine answered {status}: {message}")]
    Status { status: u16, message: String },
}

/// Model lifecycle on a local inference engine.
#[async_trait]
pub trait ModelEngine: Send + Sync {
    async fn health(&self) -> Result<(), EngineError>;

    /// Download `model`, returning once the engine has it.
    async fn pull(&self, model: &str) -> Result<(), EngineError>;

    async fn delete(&self, model: &str) -> Result<(), EngineError>;
}

/// Builds the engine that serves a local provider.
pub trait EngineFactory: Send + Sync {
    fn engine(&self, provider: &Provider) -> Result<Arc<dyn ModelEngine>, EngineError>;
}

/// Ollama-compatible engines, addressed by the scheme and authority of the
/// provider URL.
#[derive(Clone)]
pub struct OllamaEngines {
    client: reqwest::Client,
}

impl OllamaEngines {
    pub fn new() -> Result<Self, EngineError> {
        // pulls of large models take a while, only connecting is bounded
        let client = reqwest::Client::builder().connect_timeout(Duration::from_secs(10)).build()?;

        Ok(Self { client })
    }
}

impl EngineFactory for OllamaEngines {
    fn engine(&self, provider: &Provider) -> Result<Arc<dyn ModelEngine>, EngineError> {
        let url = Url::parse(&provider.url).map_err(|_| EngineError::InvalidUrl(provider.url.clone()))?;

        let Some(host) = url.host_str() else {
            return Err(EngineError::InvalidUrl(provider.url.clone()));
        };

        let base = match url.port() {
            Some(port) => format!("{}://{host}:{port}", url.scheme()),
            None => format!("{}://{host}", url.scheme()),
        };

        Ok(Arc::new(OllamaEngine {
            client: self.client.clone(),
            base,
        }))
    }
}

struct OllamaEngine {
    client: reqwest::Client,
    base: String,
}

impl OllamaEngine {
    async fn check(response: reqwest::Response) -> Result<(), EngineError> {
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        log::error!("engine error ({status}): {message}");

        Err(EngineError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ModelEngine for OllamaEngine {
    async fn health(&self) -> Result<(), EngineError> {
        let response = self
            .client
            .get(format!("{}/", self.base))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        Self::check(response).await
    }

    async fn pull(&self, model: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .post(format!("{}/api/pull", self.base))
            .json(&json!({"model": model, "stream": false}))
            .send()
            .await?;

        Self::check(response).await
    }

    async fn delete(&self, model: &str) -> Result<(), EngineError> {
        let response = self
            .client
            .delete(format!("{}/api/delete", self.base))
            .json(&json!({"model": model}))
            .send()
            .await?;

        Self::check(response).await
    }
}

/// Pull `model` in the background, moving its record from `downloading` to
/// `downloaded` or `failed`.
pub(crate) fn spawn_pull(registry: Registry, engine: Arc<dyn ModelEngine>, provider: String, model: String) {
    tokio::spawn(async move {
        let status = match engine.pull(&model).await {
            Ok(()) => {
                log::info!("model {model} of provider {provider} is ready");
                ModelStatus::Downloaded
            }
            Err(error) => {
                log::error!("pulling model {model} of provider {provider} failed: {error}");
                ModelStatus::Failed
            }
        };

        if let Err(error) = registry.put_model(&provider, &model, status) {
            log::error!("cannot record status of model {model}: {error}");
        }
    });
}
