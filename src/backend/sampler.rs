//! Health metric sampling for the backend responder.

use parking_lot::Mutex;
use std::collections::HashMap;
use sysinfo::System;
use thiserror::Error;

pub type Metrics = HashMap<String, f64>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("metrics sampling failed: {0}")]
pub struct SampleError(pub String);

/// Source of the metrics a backend reports in HEALTH_RESPONSE.
pub trait MetricsSampler: Send + Sync {
    fn sample(&self) -> Result<Metrics, SampleError>;
}

/// CPU and memory utilisation of the host.
pub struct SystemSampler {
    system: Mutex<System>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first sample is meaningful.
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSampler for SystemSampler {
    fn sample(&self) -> Result<Metrics, SampleError> {
        let mut system = self.system.lock();
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(SampleError("total memory reported as zero".to_string()));
        }
        let memory = system.used_memory() as f64 / total as f64 * 100.0;
        let cpu = system.global_cpu_usage() as f64;

        let mut metrics = Metrics::new();
        metrics.insert("cpu_usage_percent".to_string(), cpu);
        metrics.insert("memory_usage_percent".to_string(), memory);
        Ok(metrics)
    }
}

/// Fixed metrics, for tests and synthetic backends.
#[derive(Debug, Clone, Default)]
pub struct StaticSampler {
    metrics: Metrics,
}

impl StaticSampler {
    pub fn new<I, K>(metrics: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Self {
            metrics: metrics.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl MetricsSampler for StaticSampler {
    fn sample(&self) -> Result<Metrics, SampleError> {
        Ok(self.metrics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_sampler_reports_percentages() {
        let sampler = SystemSampler::new();
        sampler.sample().unwrap();
        let metrics = sampler.sample().unwrap();
        let memory = metrics["memory_usage_percent"];
        assert!((0.0..=100.0).contains(&memory));
        let cpu = metrics["cpu_usage_percent"];
        assert!(cpu.is_finite() && cpu >= 0.0);
    }

    #[test]
    fn static_sampler_returns_its_metrics() {
        let sampler = StaticSampler::new([("cpu_usage_percent", 1.5)]);
        assert_eq!(sampler.sample().unwrap()["cpu_usage_percent"], 1.5);
    }
}
