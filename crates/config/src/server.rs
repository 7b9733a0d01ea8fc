//! Listener settings: the gateway address and its liveness probe.

use std::{borrow::Cow, net::SocketAddr};

use serde::Deserialize;

/// `[server]` section.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Loopback address to bind. The command line flag takes precedence.
    pub listen_address: Option<SocketAddr>,
    /// Liveness endpoint answering `{"status":"UP"}`.
    #[serde(default)]
    pub health: HealthConfig,
}

/// `[server.health]` section.
///
/// `/aog/<version>/health` is always served; this controls the extra
/// top-level endpoint, optionally on its own listener.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Serve the top-level endpoint at all.
    pub enabled: bool,
    /// Bind it to a separate address instead of the gateway listener.
    pub listen: Option<SocketAddr>,
    /// Route of the endpoint.
    pub path: Cow<'static, str>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        HealthConfig {
            enabled: true,
            listen: None,
            path: Cow::Borrowed("/health"),
        }
    }
}
