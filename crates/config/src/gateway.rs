//! Request lifecycle configuration: scheduler, dispatcher and upstream client.

use std::{path::PathBuf, time::Duration};

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Gateway settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// The `<version>` segment of every `/aog/<version>/...` route, also the
    /// version stamped on exported documents.
    pub api_version: String,
    /// Directory of flavor YAML files. A file named `<flavor>.yml` replaces the
    /// built-in definition of that flavor, other files add new flavors.
    pub flavors_dir: Option<PathBuf>,
    /// Scheduler channel sizes.
    pub scheduler: SchedulerConfig,
    /// Local versus remote routing.
    pub dispatch: DispatchConfig,
    /// Upstream HTTP client and multi-segment polling.
    pub upstream: UpstreamConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_version: "v0.2".to_string(),
            flavors_dir: None,
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

/// Scheduler channel capacities.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Capacity of the scheduler event channel.
    pub event_capacity: usize,
    /// Capacity of each task's result channel.
    pub result_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 600,
            result_capacity: 600,
        }
    }
}

/// Load heuristic used by the `default` hybrid policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    /// Utilization percentage above which requests are routed remotely.
    pub load_threshold: f64,
    /// Window over which CPU usage is averaged by the background sampler.
    #[serde(deserialize_with = "deserialize_duration")]
    pub cpu_sample_interval: Duration,
    /// File exposing the GPU busy percentage as a plain number. When unset or
    /// unreadable, the CPU sample is used instead.
    pub gpu_utilization_path: Option<PathBuf>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            load_threshold: 80.0,
            cpu_sample_interval: Duration::from_secs(15),
            gpu_utilization_path: None,
        }
    }
}

/// Upstream HTTP client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// How long an idle pooled connection is kept.
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
    /// Maximum idle pooled connections per host.
    pub max_idle_per_host: usize,
    /// Delay between two polls of a multi-segment task.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    /// Maximum number of polls of a multi-segment task, zero meaning unlimited.
    pub max_poll_attempts: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            max_idle_per_host: 10,
            poll_interval: Duration::from_millis(500),
            max_poll_attempts: 0,
        }
    }
}
