//! AOG configuration structures to map the aog.toml configuration.

#![deny(missing_docs)]

mod gateway;
mod headers;
mod http_types;
mod import;
mod loader;
mod server;
mod store;

use std::path::Path;

pub use gateway::{DispatchConfig, GatewayConfig, SchedulerConfig, UpstreamConfig};
pub use headers::HeaderChanges;
pub use http_types::{HeaderName, HeaderValue};
pub use import::ImportConfig;
pub use server::{HealthConfig, ServerConfig};
pub use store::{StoreConfig, StoreKind};

use serde::Deserialize;

/// Main configuration structure for the AOG gateway.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Request lifecycle settings: scheduler, dispatcher and upstream client.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Where services, providers and models are persisted.
    #[serde(default)]
    pub store: StoreConfig,
    /// Behavior of the service import endpoint.
    #[serde(default)]
    pub import: ImportConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates value ranges that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}
