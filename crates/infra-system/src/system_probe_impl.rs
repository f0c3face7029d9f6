// System probe implementation
// reason: sysinfo for cross-platform memory/CPU, nvidia-smi for GPU utilization
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use kiln_core::port::system_probe::{ResourceSnapshot, SystemProbe};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Upper bound on one nvidia-smi call
const GPU_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// System probe implementation using sysinfo
pub struct SystemProbeImpl {
    system: Arc<Mutex<System>>,
    query_gpu: bool,
}

impl SystemProbeImpl {
    /// Create a new system probe
    ///
    /// # Example
    /// ```ignore
    /// let probe = SystemProbeImpl::new();
    /// ```
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu();
        Self {
            system: Arc::new(Mutex::new(system)),
            query_gpu: true,
        }
    }

    /// Skip the GPU query (hosts without an NVIDIA driver)
    pub fn without_gpu(mut self) -> Self {
        self.query_gpu = false;
        self
    }

    fn refresh_cpu(&self) {
        let mut sys = self.system.lock().unwrap_or_else(|p| p.into_inner());
        sys.refresh_cpu();
    }

    fn read(&self, gpu_utilization: Option<f64>) -> ResourceSnapshot {
        let mut sys = self.system.lock().unwrap_or_else(|p| p.into_inner());
        sys.refresh_cpu();
        sys.refresh_memory();

        let memory_total_gb = sys.total_memory() as f64 / BYTES_PER_GB;
        let memory_available_gb = sys.available_memory() as f64 / BYTES_PER_GB;
        let memory_used_gb = sys.used_memory() as f64 / BYTES_PER_GB;
        let memory_percent = if memory_total_gb > 0.0 {
            memory_used_gb / memory_total_gb * 100.0
        } else {
            0.0
        };
        let cpu_name = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty());
        let cpu_threads = sys.cpus().len().max(1);

        ResourceSnapshot {
            memory_total_gb,
            memory_available_gb,
            memory_used_gb,
            memory_percent,
            gpu_utilization,
            cpu_percent: f64::from(sys.global_cpu_info().cpu_usage()),
            cpu_name,
            cpu_cores: sys.physical_core_count().unwrap_or(cpu_threads),
            cpu_threads,
        }
    }

    async fn gpu_utilization(&self) -> Option<f64> {
        if !self.query_gpu {
            return None;
        }
        let child = Command::new("nvidia-smi")
            .args(["--query-gpu=utilization.gpu", "--format=csv,noheader,nounits"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();
        match timeout(GPU_QUERY_TIMEOUT, child).await {
            Ok(Ok(output)) if output.status.success() => {
                parse_gpu_utilization(&String::from_utf8_lossy(&output.stdout))
            }
            _ => None,
        }
    }
}

impl Default for SystemProbeImpl {
    fn default() -> Self {
        Self::new()
    }
}

/// First GPU's utilization from `nvidia-smi` CSV output
///
/// Unified-memory devices report `[N/A]` for some fields; those parse as `None`.
pub fn parse_gpu_utilization(output: &str) -> Option<f64> {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.trim_end_matches('%').trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 100.0))
}

#[async_trait]
impl SystemProbe for SystemProbeImpl {
    async fn snapshot(&self) -> ResourceSnapshot {
        // CPU usage is a delta between two refreshes
        self.refresh_cpu();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(100))).await;

        let gpu = self.gpu_utilization().await;
        let snapshot = self.read(gpu);

        debug!(
            mem_available_gb = %format!("{:.1}", snapshot.memory_available_gb),
            mem_total_gb = %format!("{:.1}", snapshot.memory_total_gb),
            cpu = %snapshot.cpu_percent,
            gpu = ?snapshot.gpu_utilization,
            "System resources collected"
        );
        snapshot
    }
}
