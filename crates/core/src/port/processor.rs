// Processor Port: the kind-specific collaborator that performs the expensive work

use crate::domain::{DomainError, JobId, JobKind, JobStatus, SessionId};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

pub use crate::domain::job::ProgressUpdate;

/// Processing errors, recorded verbatim as the job's failure text
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What a running job knows about itself
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub job_id: JobId,
    pub kind: JobKind,
    pub session_id: Option<SessionId>,
    pub attempt: u32,
}

/// Size of a job, as used by the ETA estimator
///
/// Zero steps or units means "use the kind default".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workload {
    pub steps: u32,
    pub units: u32,
    /// Model or other heavy resource the job needs loaded
    pub resource: Option<String>,
}

/// Receiver of progress callbacks (the job store in production)
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn apply(&self, job_id: &str, update: ProgressUpdate);
}

/// Handle given to a processor for reporting status and percent complete
///
/// Every call is persisted; processors throttle themselves.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressReporter {
    pub fn new(job_id: impl Into<JobId>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            job_id: job_id.into(),
            sink,
        }
    }

    /// Reporter that drops every update
    pub fn noop(job_id: impl Into<JobId>) -> Self {
        Self::new(job_id, Arc::new(NoopSink))
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn update(&self, update: ProgressUpdate) {
        self.sink.apply(&self.job_id, update).await;
    }

    pub async fn report(&self, status: JobStatus, percent: f32) {
        self.update(ProgressUpdate {
            status: Some(status),
            percent: Some(percent),
            message: None,
        })
        .await;
    }

    pub async fn status(&self, status: JobStatus) {
        self.update(ProgressUpdate {
            status: Some(status),
            ..Default::default()
        })
        .await;
    }

    pub async fn percent(&self, percent: f32) {
        self.update(ProgressUpdate {
            percent: Some(percent),
            ..Default::default()
        })
        .await;
    }

    pub async fn message(&self, percent: f32, message: impl Into<String>) {
        self.update(ProgressUpdate {
            status: None,
            percent: Some(percent),
            message: Some(message.into()),
        })
        .await;
    }
}

struct NoopSink;

#[async_trait]
impl ProgressSink for NoopSink {
    async fn apply(&self, _job_id: &str, _update: ProgressUpdate) {}
}

/// Kind-specific job processor
///
/// Implementations:
/// - `kinds::MediaProcessor`: image/video/i2v/upscale/bulk/workflow via a `MediaBackend`
/// - `HttpDownloader` (infra-system): third-party model downloads
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    type Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn kind(&self) -> JobKind;

    /// Cheap check run at submit time; a failure means the job is never created
    fn validate(&self, payload: &Self::Payload) -> Result<(), DomainError>;

    fn workload(&self, _payload: &Self::Payload) -> Workload {
        Workload::default()
    }

    /// Resource currently loaded by the backing engine, if it tracks one
    fn loaded_resource(&self) -> Option<String> {
        None
    }

    /// Run the job to completion
    ///
    /// # Errors
    /// Any error (or panic) ends the job as `failed` with the error text.
    async fn process(
        &self,
        ctx: JobContext,
        payload: Self::Payload,
        progress: ProgressReporter,
    ) -> Result<Self::Output, ProcessError>;
}

/// A shared processor can back an orchestrator while the caller keeps a handle
#[async_trait]
impl<P: Processor> Processor for Arc<P> {
    type Payload = P::Payload;
    type Output = P::Output;

    fn kind(&self) -> JobKind {
        (**self).kind()
    }

    fn validate(&self, payload: &Self::Payload) -> Result<(), DomainError> {
        (**self).validate(payload)
    }

    fn workload(&self, payload: &Self::Payload) -> Workload {
        (**self).workload(payload)
    }

    fn loaded_resource(&self) -> Option<String> {
        (**self).loaded_resource()
    }

    async fn process(
        &self,
        ctx: JobContext,
        payload: Self::Payload,
        progress: ProgressReporter,
    ) -> Result<Self::Output, ProcessError> {
        (**self).process(ctx, payload, progress).await
    }
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Progress sink that remembers every update
    #[derive(Default)]
    pub struct RecordingSink {
        updates: Mutex<Vec<(String, ProgressUpdate)>>,
    }

    impl RecordingSink {
        pub fn updates(&self) -> Vec<ProgressUpdate> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .map(|(_, u)| u.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn apply(&self, job_id: &str, update: ProgressUpdate) {
            self.updates
                .lock()
                .unwrap()
                .push((job_id.to_string(), update));
        }
    }

    struct ActiveGuard<'a>(&'a AtomicUsize);

    impl Drop for ActiveGuard<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Processor driven by its JSON payload
    ///
    /// Recognised fields: `sleep_ms`, `stages` (status names reported in order),
    /// `fail` (error text), `panic` (panic message), `invalid` (fails validation),
    /// `steps`, `units`, `resource` (workload).
    pub struct ScriptedProcessor {
        kind: JobKind,
        calls: Mutex<Vec<JobId>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        loaded: Mutex<Option<String>>,
    }

    impl ScriptedProcessor {
        pub fn new(kind: JobKind) -> Self {
            Self {
                kind,
                calls: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                loaded: Mutex::new(None),
            }
        }

        pub fn calls(&self) -> Vec<JobId> {
            self.calls.lock().unwrap().clone()
        }

        pub fn call_count_for(&self, job_id: &str) -> usize {
            self.calls().iter().filter(|id| *id == job_id).count()
        }

        /// Highest number of simultaneous `process` calls observed
        pub fn max_concurrency(&self) -> usize {
            self.max_active.load(Ordering::SeqCst)
        }

        pub fn set_loaded_resource(&self, resource: Option<&str>) {
            *self.loaded.lock().unwrap() = resource.map(str::to_string);
        }
    }

    #[async_trait]
    impl Processor for ScriptedProcessor {
        type Payload = Value;
        type Output = Value;

        fn kind(&self) -> JobKind {
            self.kind
        }

        fn validate(&self, payload: &Value) -> Result<(), DomainError> {
            if payload["invalid"] == json!(true) {
                return Err(DomainError::Validation("payload marked invalid".to_string()));
            }
            Ok(())
        }

        fn workload(&self, payload: &Value) -> Workload {
            Workload {
                steps: payload["steps"].as_u64().unwrap_or(0) as u32,
                units: payload["units"].as_u64().unwrap_or(0) as u32,
                resource: payload["resource"].as_str().map(str::to_string),
            }
        }

        fn loaded_resource(&self) -> Option<String> {
            self.loaded.lock().unwrap().clone()
        }

        async fn process(
            &self,
            ctx: JobContext,
            payload: Value,
            progress: ProgressReporter,
        ) -> Result<Value, ProcessError> {
            self.calls.lock().unwrap().push(ctx.job_id.clone());
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now_active, Ordering::SeqCst);
            let _guard = ActiveGuard(&self.active);

            let stages: Vec<String> = payload["stages"]
                .as_array()
                .map(|s| {
                    s.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            let total = stages.len().max(1) as f32;
            for (i, stage) in stages.into_iter().enumerate() {
                progress
                    .report(JobStatus::from(stage), (i as f32 + 1.0) / total * 90.0)
                    .await;
            }

            if let Some(ms) = payload["sleep_ms"].as_u64() {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
            if let Some(msg) = payload["panic"].as_str() {
                panic!("{}", msg);
            }
            if let Some(msg) = payload["fail"].as_str() {
                return Err(ProcessError::Failed(msg.to_string()));
            }
            Ok(json!({ "job_id": ctx.job_id, "attempt": ctx.attempt }))
        }
    }
}
