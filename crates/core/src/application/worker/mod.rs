// Worker - single consumer of one kind's queue

pub mod constants;
mod panic_guard;
mod shutdown;

use constants::PANIC_ERROR_PREFIX;
pub use panic_guard::{execute_guarded_async, panic_message, PanicGuardResult};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::queue::JobQueue;
use crate::application::store::JobStore;
use crate::domain::{JobId, JobKind, JobStatus};
use crate::port::{JobContext, ProcessError, Processor, ProgressReporter, ProgressSink};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// ID of the job a worker is running, readable from any thread
#[derive(Clone, Default)]
pub struct CurrentJob(Arc<Mutex<Option<JobId>>>);

impl CurrentJob {
    pub fn get(&self) -> Option<JobId> {
        self.lock().clone()
    }

    fn set(&self, id: &str) {
        *self.lock() = Some(id.to_string());
    }

    fn clear(&self) {
        *self.lock() = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<JobId>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Worker processes one kind's jobs strictly one at a time
pub struct Worker<P: Processor> {
    kind: JobKind,
    processor: Arc<P>,
    store: Arc<JobStore<P::Payload, P::Output>>,
    queue: Arc<JobQueue>,
    current: CurrentJob,
    /// Optional execution slot shared with other kinds on the same device
    device_slot: Option<Arc<Semaphore>>,
}

impl<P: Processor> Worker<P> {
    pub fn new(
        processor: Arc<P>,
        store: Arc<JobStore<P::Payload, P::Output>>,
        queue: Arc<JobQueue>,
        current: CurrentJob,
        device_slot: Option<Arc<Semaphore>>,
    ) -> Self {
        Self {
            kind: processor.kind(),
            processor,
            store,
            queue,
            current,
            device_slot,
        }
    }

    /// Run worker loop with graceful shutdown support
    ///
    /// A job already running when shutdown arrives is finished first.
    pub async fn run(self, mut shutdown: ShutdownToken) {
        info!(kind = %self.kind, "Worker started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    info!(kind = %self.kind, "Worker interrupted during idle");
                    break;
                }
                id = self.queue.pop() => self.process_job(&id).await,
            }
        }
        info!(kind = %self.kind, "Worker stopped");
    }

    /// Drive one job from queued to a terminal status
    ///
    /// Never returns an error: every processing outcome becomes job state.
    pub async fn process_job(&self, id: &str) {
        let Some(job) = self.store.begin(id).await else {
            debug!(job_id = %id, kind = %self.kind, "Skipping job that is no longer queued");
            return;
        };
        self.current.set(id);
        info!(job_id = %id, kind = %self.kind, attempt = job.attempts, "Processing job");

        let ctx = JobContext {
            job_id: job.id.clone(),
            kind: self.kind,
            session_id: job.session_id.clone(),
            attempt: job.attempts,
        };
        let sink: Arc<dyn ProgressSink> = self.store.clone();
        let reporter = ProgressReporter::new(job.id.clone(), sink);
        let processor = Arc::clone(&self.processor);
        let device_slot = self.device_slot.clone();
        let payload = job.payload;

        // Spawned so a processor panic is caught at the join
        let outcome = execute_guarded_async(async move {
            let _permit = match device_slot {
                Some(slot) => Some(slot.acquire_owned().await.map_err(|_| {
                    ProcessError::ResourceUnavailable("device slot closed".to_string())
                })?),
                None => None,
            };
            processor.process(ctx, payload, reporter).await
        })
        .await;

        match outcome {
            PanicGuardResult::Success(Ok(output)) => self.finish(id, output).await,
            PanicGuardResult::Success(Err(e)) => {
                error!(job_id = %id, kind = %self.kind, error = %e, "Job failed");
                self.fail(id, e.to_string()).await;
            }
            PanicGuardResult::Panicked(msg) => {
                error!(job_id = %id, kind = %self.kind, panic_msg = %msg, "Job panicked");
                self.fail(id, format!("{}: {}", PANIC_ERROR_PREFIX, msg)).await;
            }
        }

        self.current.clear();
    }

    /// Success path: processing phase -> saving -> completed, one write each
    ///
    /// Processing is entered here when the processor never reported a stage of its own.
    async fn finish(&self, id: &str, output: P::Output) {
        let Some(job) = self.store.get(id).await else {
            warn!(job_id = %id, kind = %self.kind, "Finished job disappeared from store");
            return;
        };

        if job.status != JobStatus::Saving {
            if !job.status.is_processing_phase()
                && self
                    .store
                    .mutate(id, "processing", |job, now| job.transition(JobStatus::Processing, now))
                    .await
                    .is_none()
            {
                self.fail(id, "could not enter processing before saving").await;
                return;
            }
            if self
                .store
                .mutate(id, "saving", |job, now| job.transition(JobStatus::Saving, now))
                .await
                .is_none()
            {
                self.fail(id, "could not enter saving").await;
                return;
            }
        }

        match self
            .store
            .mutate(id, "complete", |job, now| job.complete(output, now))
            .await
        {
            Some(job) => info!(job_id = %id, kind = %self.kind, attempt = job.attempts, "Job completed"),
            None => self.fail(id, "could not record job result").await,
        }
    }

    async fn fail(&self, id: &str, error: impl Into<String>) {
        let error = error.into();
        if self
            .store
            .mutate(id, "fail", |job, now| job.fail(error, now))
            .await
            .is_none()
        {
            warn!(job_id = %id, kind = %self.kind, "Could not record job failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::processor::mocks::ScriptedProcessor;
    use crate::port::snapshot_store::mocks::MemorySnapshotStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use crate::domain::Job;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    struct Fixture {
        snapshots: Arc<MemorySnapshotStore>,
        store: Arc<JobStore<Value, Value>>,
        worker: Worker<ScriptedProcessor>,
    }

    fn fixture() -> Fixture {
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let clock = Arc::new(FixedTimeProvider::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let store = Arc::new(JobStore::new(JobKind::Image, snapshots.clone(), clock));
        let worker = Worker::new(
            Arc::new(ScriptedProcessor::new(JobKind::Image)),
            store.clone(),
            Arc::new(JobQueue::new()),
            CurrentJob::default(),
            None,
        );
        Fixture {
            snapshots,
            store,
            worker,
        }
    }

    async fn submit(store: &JobStore<Value, Value>, id: &str, payload: Value) {
        let created = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        store
            .put(Job::new(id, JobKind::Image, None, payload, created))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_success_walks_every_status() {
        let f = fixture();
        submit(&f.store, "j1", json!({})).await;

        f.worker.process_job("j1").await;

        let job = f.store.get("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"job_id": "j1", "attempt": 1})));
        assert!(job.has_consistent_outcome());
        assert_eq!(
            f.snapshots.status_history(JobKind::Image, "j1"),
            vec!["queued", "processing", "saving", "completed"]
        );
        assert!(f.worker.current.get().is_none());
    }

    #[tokio::test]
    async fn test_pre_stages_then_processing_before_saving() {
        let f = fixture();
        submit(&f.store, "j1", json!({"stages": ["downloading", "loading_resource"]})).await;

        f.worker.process_job("j1").await;

        assert_eq!(
            f.snapshots.status_history(JobKind::Image, "j1"),
            vec!["queued", "downloading", "loading_resource", "processing", "saving", "completed"]
        );
    }

    #[tokio::test]
    async fn test_single_pre_stage_precedes_processing() {
        let f = fixture();
        submit(&f.store, "j1", json!({"stages": ["downloading"]})).await;

        f.worker.process_job("j1").await;

        assert_eq!(
            f.snapshots.status_history(JobKind::Image, "j1"),
            vec!["queued", "downloading", "processing", "saving", "completed"]
        );
        let job = f.store.get("j1").await.unwrap();
        assert_eq!(job.attempts, 1);
        assert!(job.started_at.is_some());
    }

    #[tokio::test]
    async fn test_error_becomes_failed() {
        let f = fixture();
        submit(&f.store, "j1", json!({"fail": "CUDA out of memory"})).await;

        f.worker.process_job("j1").await;

        let job = f.store.get("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("CUDA out of memory"));
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_panic_becomes_failed() {
        let f = fixture();
        submit(&f.store, "j1", json!({"panic": "index out of bounds"})).await;

        f.worker.process_job("j1").await;

        let job = f.store.get("j1").await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Processor panicked: index out of bounds"));
    }

    #[tokio::test]
    async fn test_non_queued_job_is_skipped() {
        let f = fixture();
        submit(&f.store, "j1", json!({})).await;
        f.store.mutate("j1", "fail", |job, now| job.fail("cancelled", now)).await;

        f.worker.process_job("j1").await;

        assert!(f.worker.processor.calls().is_empty());
    }
}
