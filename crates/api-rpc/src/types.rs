//! RPC Request/Response Types
//!
//! Defines the JSON-RPC method parameters and results.

use kiln_core::application::{AdmissionDecision, JobFilter, KindStats};
use kiln_core::domain::{JobKind, JobView};
use serde::{Deserialize, Serialize};

/// jobs.submit.v1 - Submit a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job: JobView,
    /// Set for kinds that pass the resource gate
    #[serde(default)]
    pub admission: Option<AdmissionDecision>,
}

/// jobs.get.v1 / jobs.cancel.v1 / jobs.remove.v1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdRequest {
    pub job_id: String,
}

/// jobs.list.v1 - List jobs (all filters optional)
pub type ListRequest = JobFilter;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub jobs: Vec<JobView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveResponse {
    pub job_id: String,
    pub removed: bool,
}

/// system.admission.v1 - Ask whether a heavy job would be admitted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionRequest {
    /// Model weights size; the gate adds overhead and a RAM buffer
    pub required_memory_gb: f64,
    #[serde(default)]
    pub label: Option<String>,
}

/// admin.stats.v1 - Per-kind statistics
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StatsRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub kinds: Vec<KindStats>,
    pub total_jobs: usize,
    pub running_jobs: usize,
    pub queued_jobs: usize,
    pub uptime_seconds: u64,
    pub version: String,
}
