// Resource Gate: pre-submit admission check for heavy job kinds
//
// A pure query. Nothing is reserved, so two callers may both be admitted and
// then contend for the same device.

use super::worker::constants::{
    DEFAULT_CPU_BUSY_THRESHOLD, DEFAULT_GENERATION_OVERHEAD_GB, DEFAULT_GPU_BUSY_THRESHOLD,
    DEFAULT_MIN_FREE_MEMORY_PERCENT,
};
use crate::port::{ResourceSnapshot, SystemProbe};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub generation_overhead_gb: f64,
    pub min_free_memory_percent: f64,
    pub gpu_busy_threshold: f64,
    pub cpu_busy_threshold: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            generation_overhead_gb: DEFAULT_GENERATION_OVERHEAD_GB,
            min_free_memory_percent: DEFAULT_MIN_FREE_MEMORY_PERCENT,
            gpu_busy_threshold: DEFAULT_GPU_BUSY_THRESHOLD,
            cpu_busy_threshold: DEFAULT_CPU_BUSY_THRESHOLD,
        }
    }
}

/// First failing check, in priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    InsufficientMemory,
    GpuBusy,
    CpuBusy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub admitted: bool,
    /// Human-readable reason, set when rejected
    pub reason: Option<String>,
    pub rejection: Option<Rejection>,
    /// Model + overhead + RAM safety buffer
    pub required_memory_gb: f64,
    pub snapshot: ResourceSnapshot,
}

/// Decide admission for a job needing a model of `model_size_gb`
///
/// Checks, first failure wins:
/// 1. available memory < model + overhead + buffer (percent of total RAM)
/// 2. GPU utilization > GPU threshold (skipped when unknown)
/// 3. CPU usage > CPU threshold
pub fn evaluate(
    snapshot: ResourceSnapshot,
    model_size_gb: f64,
    label: &str,
    config: &GateConfig,
) -> AdmissionDecision {
    let buffer_gb = snapshot.memory_total_gb * (config.min_free_memory_percent / 100.0);
    let required_memory_gb = model_size_gb.max(0.0) + config.generation_overhead_gb + buffer_gb;

    let rejected = |rejection: Rejection, reason: String, snapshot: ResourceSnapshot| AdmissionDecision {
        admitted: false,
        reason: Some(reason),
        rejection: Some(rejection),
        required_memory_gb,
        snapshot,
    };

    if snapshot.memory_available_gb < required_memory_gb {
        let reason = format!(
            "Insufficient memory: {:.1}GB available, need {:.1}GB for {} (model: {}GB + {:.0}GB overhead + {:.1}GB buffer [{:.0}% of RAM])",
            snapshot.memory_available_gb,
            required_memory_gb,
            label,
            model_size_gb,
            config.generation_overhead_gb,
            buffer_gb,
            config.min_free_memory_percent
        );
        return rejected(Rejection::InsufficientMemory, reason, snapshot);
    }

    if let Some(gpu) = snapshot.gpu_utilization {
        if gpu > config.gpu_busy_threshold {
            let reason = format!(
                "GPU is busy ({:.0}% utilization). Please wait for the current task to complete.",
                gpu
            );
            return rejected(Rejection::GpuBusy, reason, snapshot);
        }
    }

    if snapshot.cpu_percent > config.cpu_busy_threshold {
        let reason = format!(
            "System is under heavy load ({:.0}% CPU). Please wait or close other applications.",
            snapshot.cpu_percent
        );
        return rejected(Rejection::CpuBusy, reason, snapshot);
    }

    AdmissionDecision {
        admitted: true,
        reason: None,
        rejection: None,
        required_memory_gb,
        snapshot,
    }
}

pub struct ResourceGate {
    probe: Arc<dyn SystemProbe>,
    config: GateConfig,
}

impl ResourceGate {
    pub fn new(probe: Arc<dyn SystemProbe>, config: GateConfig) -> Self {
        Self { probe, config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Sample the host and evaluate admission
    pub async fn check_admission(&self, model_size_gb: f64, label: &str) -> AdmissionDecision {
        let snapshot = self.probe.snapshot().await;
        let decision = evaluate(snapshot, model_size_gb, label, &self.config);
        match &decision.reason {
            Some(reason) => info!(label = %label, reason = %reason, "Admission rejected"),
            None => debug!(label = %label, required_gb = decision.required_memory_gb, "Admission granted"),
        }
        decision
    }

    /// Current host resources without a decision
    pub async fn resources(&self) -> ResourceSnapshot {
        self.probe.snapshot().await
    }
}
