// Media Backend Port: the external generation/upscale engine behind the media kinds

use crate::domain::{JobId, JobKind};
use crate::port::processor::{ProcessError, ProgressReporter};
use async_trait::async_trait;
use serde::Serialize;

/// One unit of work handed to the backend
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRequest {
    pub job_id: JobId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
}

/// External media engine (diffusion, video, upscaling, node workflows)
#[async_trait]
pub trait MediaBackend: Send + Sync + 'static {
    /// Run a request and return the backend's JSON result
    async fn run(
        &self,
        request: MediaRequest,
        progress: ProgressReporter,
    ) -> Result<serde_json::Value, ProcessError>;

    /// Model the backend currently holds in memory for `kind`
    fn loaded_resource(&self, _kind: JobKind) -> Option<String> {
        None
    }
}
