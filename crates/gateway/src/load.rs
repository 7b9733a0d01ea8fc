use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use config::DispatchConfig;
use sysinfo::System;

/// Current machine utilization, used by the `default` hybrid policy.
pub trait LoadProbe: Send + Sync {
    /// GPU busy percentage, when the machine exposes one.
    fn gpu_utilization(&self) -> Option<f64>;

    /// Average CPU usage over the last sampling window.
    fn cpu_utilization(&self) -> f64;

    fn is_busy(&self, threshold: f64) -> bool {
        match self.gpu_utilization() {
            Some(gpu) => gpu >= threshold,
            None => self.cpu_utilization() > threshold,
        }
    }
}

/// Samples CPU usage in the background so dispatching never waits on it.
pub struct SystemLoad {
    gpu_utilization_path: Option<PathBuf>,
    cpu_percent: Arc<AtomicU64>,
}

impl SystemLoad {
    /// Start the sampler on the current tokio runtime.
    pub fn start(config: &DispatchConfig) -> Arc<Self> {
        let cpu_percent = Arc::new(AtomicU64::new(0f64.to_bits()));
        let interval = config.cpu_sample_interval.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);

        let sampled = Arc::downgrade(&cpu_percent);

        tokio::spawn(async move {
            let mut system = System::new();
            system.refresh_cpu();

            loop {
                tokio::time::sleep(interval).await;
                system.refresh_cpu();

                let Some(target) = sampled.upgrade() else {
                    break;
                };

                let usage = f64::from(system.global_cpu_info().cpu_usage());
                target.store(usage.to_bits(), Ordering::Relaxed);

                log::trace!("cpu usage over the last {interval:?}: {usage:.1}%");
            }
        });

        Arc::new(Self {
            gpu_utilization_path: config.gpu_utilization_path.clone(),
            cpu_percent,
        })
    }
}

impl LoadProbe for SystemLoad {
    fn gpu_utilization(&self) -> Option<f64> {
        let path = self.gpu_utilization_path.as_ref()?;
        let text = std::fs::read_to_string(path).ok()?;

        text.trim().parse().ok()
    }

    fn cpu_utilization(&self) -> f64 {
        f64::from_bits(self.cpu_percent.load(Ordering::Relaxed))
    }
}

/// A probe reporting fixed values.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLoad {
    pub gpu: Option<f64>,
    pub cpu: f64,
}

impl LoadProbe for FixedLoad {
    fn gpu_utilization(&self) -> Option<f64> {
        self.gpu
    }

    fn cpu_utilization(&self) -> f64 {
        self.cpu
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn gpu_takes_precedence_over_cpu() {
        let idle_gpu = FixedLoad { gpu: Some(10.0), cpu: 95.0 };
        let busy_gpu = FixedLoad { gpu: Some(80.0), cpu: 5.0 };
        let busy_cpu = FixedLoad { gpu: None, cpu: 80.5 };
        let edge_cpu = FixedLoad { gpu: None, cpu: 80.0 };

        assert!(!idle_gpu.is_busy(80.0));
        assert!(busy_gpu.is_busy(80.0));
        assert!(busy_cpu.is_busy(80.0));
        assert!(!edge_cpu.is_busy(80.0));
    }

    #[tokio::test]
    async fn gpu_file_is_read_on_demand() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "42").unwrap();

        let config = DispatchConfig {
            gpu_utilization_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };

        let load = SystemLoad::start(&config);

        assert_eq!(load.gpu_utilization(), Some(42.0));
    }
}
