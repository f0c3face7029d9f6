// System resource monitoring port
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Point-in-time view of host resources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub memory_total_gb: f64,
    pub memory_available_gb: f64,
    pub memory_used_gb: f64,
    pub memory_percent: f64,
    /// 0-100, None when no GPU can be queried
    pub gpu_utilization: Option<f64>,
    pub cpu_percent: f64,
    pub cpu_name: Option<String>,
    pub cpu_cores: usize,
    pub cpu_threads: usize,
}

/// System probe port consulted by the resource gate
#[async_trait]
pub trait SystemProbe: Send + Sync {
    /// Sample current memory, GPU and CPU usage
    ///
    /// # Example
    /// ```text
    /// let snapshot = probe.snapshot().await;
    /// if snapshot.cpu_percent > 90.0 {
    ///     println!("host is busy");
    /// }
    /// ```
    async fn snapshot(&self) -> ResourceSnapshot;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Mock SystemProbe for testing
    pub struct MockSystemProbe {
        snapshot: Mutex<ResourceSnapshot>,
    }

    impl MockSystemProbe {
        /// Idle 64GB host with a quiet GPU
        pub fn idle() -> Self {
            Self::new(ResourceSnapshot {
                memory_total_gb: 64.0,
                memory_available_gb: 56.0,
                memory_used_gb: 8.0,
                memory_percent: 12.5,
                gpu_utilization: Some(3.0),
                cpu_percent: 10.0,
                cpu_name: Some("Mock CPU".to_string()),
                cpu_cores: 8,
                cpu_threads: 16,
            })
        }

        pub fn new(snapshot: ResourceSnapshot) -> Self {
            Self {
                snapshot: Mutex::new(snapshot),
            }
        }

        pub fn set_available_memory(&self, available_gb: f64) {
            let mut s = self.snapshot.lock().unwrap();
            s.memory_available_gb = available_gb;
            s.memory_used_gb = (s.memory_total_gb - available_gb).max(0.0);
        }

        pub fn set_gpu_utilization(&self, utilization: Option<f64>) {
            self.snapshot.lock().unwrap().gpu_utilization = utilization;
        }

        pub fn set_cpu_percent(&self, cpu_percent: f64) {
            self.snapshot.lock().unwrap().cpu_percent = cpu_percent;
        }
    }

    #[async_trait]
    impl SystemProbe for MockSystemProbe {
        async fn snapshot(&self) -> ResourceSnapshot {
            self.snapshot.lock().unwrap().clone()
        }
    }
}
