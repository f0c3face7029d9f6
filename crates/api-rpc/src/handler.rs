//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{admission_error, throttled, to_rpc_error};
use crate::rate_limiter::RateLimiter;
use crate::types::{
    AdmissionRequest, JobIdRequest, ListRequest, ListResponse, RemoveResponse, StatsRequest,
    StatsResponse, SubmitRequest, SubmitResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use kiln_core::application::{AdmissionDecision, JobRegistry, ResourceGate};
use kiln_core::domain::JobView;
use kiln_core::kinds::DEFAULT_VIDEO_MODEL_SIZE_GB;
use kiln_core::port::ResourceSnapshot;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    registry: Arc<JobRegistry>,
    gate: Arc<ResourceGate>,
    rate_limiter: RateLimiter,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(registry: Arc<JobRegistry>, gate: Arc<ResourceGate>, rate_limiter: RateLimiter) -> Self {
        Self {
            registry,
            gate,
            rate_limiter,
            start_time: Instant::now(),
        }
    }

    /// jobs.submit.v1
    ///
    /// Gated kinds are checked against current resources first; a rejection
    /// creates no job.
    pub async fn submit(&self, params: SubmitRequest) -> Result<SubmitResponse, ErrorObjectOwned> {
        // Rate limiting check (DoS protection)
        if !self.rate_limiter.try_acquire() {
            return Err(throttled());
        }

        let admission = if params.kind.requires_admission() {
            let model_size_gb = params
                .payload
                .get("model_size_gb")
                .and_then(|v| v.as_f64())
                .unwrap_or(DEFAULT_VIDEO_MODEL_SIZE_GB);
            let label = params
                .payload
                .get("model")
                .and_then(|v| v.as_str())
                .unwrap_or(params.kind.as_str())
                .to_string();
            let decision = self.gate.check_admission(model_size_gb, &label).await;
            if !decision.admitted {
                return Err(admission_error(&decision));
            }
            Some(decision)
        } else {
            None
        };

        let job = self
            .registry
            .submit(params.kind, params.payload, params.session_id)
            .await
            .map_err(to_rpc_error)?;

        info!(job_id = %job.id, kind = %job.kind, "Job accepted via RPC");
        Ok(SubmitResponse { job, admission })
    }

    /// jobs.get.v1
    pub async fn get(&self, params: JobIdRequest) -> Result<JobView, ErrorObjectOwned> {
        self.registry.get(&params.job_id).await.map_err(to_rpc_error)
    }

    /// jobs.list.v1
    pub async fn list(&self, params: ListRequest) -> Result<ListResponse, ErrorObjectOwned> {
        let jobs = self.registry.list(&params).await.map_err(to_rpc_error)?;
        Ok(ListResponse { jobs })
    }

    /// jobs.cancel.v1
    pub async fn cancel(&self, params: JobIdRequest) -> Result<JobView, ErrorObjectOwned> {
        self.registry
            .cancel(&params.job_id)
            .await
            .map_err(to_rpc_error)
    }

    /// jobs.remove.v1
    pub async fn remove(&self, params: JobIdRequest) -> Result<RemoveResponse, ErrorObjectOwned> {
        let removed = self
            .registry
            .remove(&params.job_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(RemoveResponse {
            job_id: removed.id,
            removed: true,
        })
    }

    /// system.resources.v1
    pub async fn resources(&self) -> ResourceSnapshot {
        self.gate.resources().await
    }

    /// system.admission.v1
    pub async fn admission(&self, params: AdmissionRequest) -> AdmissionDecision {
        let label = params.label.unwrap_or_else(|| "requested job".to_string());
        self.gate
            .check_admission(params.required_memory_gb, &label)
            .await
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> StatsResponse {
        let kinds = self.registry.stats().await;
        StatsResponse {
            total_jobs: kinds.iter().map(|k| k.total).sum(),
            running_jobs: kinds.iter().filter(|k| k.current_job_id.is_some()).count(),
            queued_jobs: kinds.iter().map(|k| k.queue_depth).sum(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: kiln_core::VERSION.to_string(),
            kinds,
        }
    }
}
