//! Service import behavior.

use serde::Deserialize;

/// Controls the side effects of `POST /aog/<version>/service/import`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Probe every imported provider before anything is committed.
    pub health_check: bool,
    /// Pull missing local models through the local engine. When disabled,
    /// imported local models are registered as already downloaded.
    pub pull_models: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            health_check: true,
            pull_models: true,
        }
    }
}
