//! Process and runtime resource metrics
//!
//! CPU and memory usage via the sysinfo crate, plus tokio worker headroom.

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// System resource metrics
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    /// Number of CPU cores
    pub cpu_count: usize,
    /// Current process CPU usage percentage (can exceed 100% on multi-core)
    pub process_cpu_percent: f32,
    /// Current process memory usage (MB)
    pub process_memory_mb: u64,
    /// Total system memory (MB)
    pub memory_total_mb: u64,
    /// Async runtime load, absent outside a tokio runtime
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeMetrics>,
}

/// Tokio worker headroom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeMetrics {
    pub workers: usize,
    pub alive_tasks: usize,
}

impl RuntimeMetrics {
    /// Metrics of the current runtime, if any
    pub fn current() -> Option<Self> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let metrics = handle.metrics();
        Some(Self {
            workers: metrics.num_workers(),
            alive_tasks: metrics.num_alive_tasks(),
        })
    }
}

impl SystemMetrics {
    /// One-shot collection.
    ///
    /// `process_cpu_percent` needs two samples to be meaningful; use a
    /// [`MetricsSampler`] for periodic reporting.
    pub fn collect() -> Self {
        MetricsSampler::new().sample()
    }

    /// One-line summary for periodic logs
    pub fn summary(&self) -> String {
        let mut line = format!(
            "CPU {:.1}% ({} cores), RAM {} MB of {} MB",
            self.process_cpu_percent, self.cpu_count, self.process_memory_mb, self.memory_total_mb
        );
        if let Some(rt) = self.runtime {
            line.push_str(&format!(", {} workers, {} tasks", rt.workers, rt.alive_tasks));
        }
        line
    }
}

/// Keeps the sysinfo state between samples so CPU usage is a delta
pub struct MetricsSampler {
    sys: System,
    pid: Pid,
}

impl MetricsSampler {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    pub fn sample(&mut self) -> SystemMetrics {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage(); // Required for cpus() to return non-empty list
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        let (process_cpu, process_mem) = self
            .sys
            .process(self.pid)
            .map(|p| (p.cpu_usage(), p.memory() / 1024 / 1024))
            .unwrap_or((0.0, 0));

        SystemMetrics {
            cpu_count: self.sys.cpus().len(),
            process_cpu_percent: process_cpu,
            process_memory_mb: process_mem,
            memory_total_mb: self.sys.total_memory() / 1024 / 1024, // bytes -> MB
            runtime: RuntimeMetrics::current(),
        }
    }
}

impl Default for MetricsSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_collect_outside_runtime() {
        let metrics = SystemMetrics::collect();
        assert!(metrics.memory_total_mb > 0);
        assert!(metrics.process_cpu_percent >= 0.0);
        assert!(metrics.runtime.is_none());

        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json.get("memory_total_mb").is_some());
        assert!(json.get("runtime").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_sampler_reports_runtime() {
        let mut sampler = MetricsSampler::new();
        sampler.sample();
        let metrics = sampler.sample();

        let rt = metrics.runtime.unwrap();
        assert_eq!(rt.workers, 2);
        assert!(metrics.summary().contains("2 workers"));
    }
}
