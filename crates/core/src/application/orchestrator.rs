// Orchestrator: one kind's store, queue and worker behind a submission API

use super::eta::EtaEstimator;
use super::queue::JobQueue;
use super::store::{JobStore, KindStats, LoadReport};
use super::worker::constants::DEFAULT_RETENTION_HOURS;
use super::worker::{CurrentJob, ShutdownToken, Worker};
use crate::domain::{Job, JobId, JobKind, SessionId, CANCELLED_MESSAGE};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, Processor, SnapshotStore, TimeProvider};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::info;

/// Collaborators shared by every orchestrator in a process
#[derive(Clone)]
pub struct EngineContext {
    pub snapshots: Arc<dyn SnapshotStore>,
    pub clock: Arc<dyn TimeProvider>,
    pub ids: Arc<dyn IdProvider>,
    pub estimator: Arc<EtaEstimator>,
}

#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Age after which terminal jobs are pruned and not reloaded
    pub retention: chrono::Duration,
    /// Cross-kind execution slot; `None` lets kinds run concurrently
    pub device_slot: Option<Arc<Semaphore>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::hours(DEFAULT_RETENTION_HOURS),
            device_slot: None,
        }
    }
}

pub type KindJob<P> = Job<<P as Processor>::Payload, <P as Processor>::Output>;

pub struct Orchestrator<P: Processor> {
    kind: JobKind,
    processor: Arc<P>,
    store: Arc<JobStore<P::Payload, P::Output>>,
    queue: Arc<JobQueue>,
    current: CurrentJob,
    ids: Arc<dyn IdProvider>,
    clock: Arc<dyn TimeProvider>,
    estimator: Arc<EtaEstimator>,
    retention: chrono::Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<P: Processor> Orchestrator<P> {
    /// Load persisted jobs, re-enqueue interrupted ones, then start the worker
    ///
    /// Recovered jobs are queued before the worker exists, so each runs once.
    pub async fn start(
        processor: P,
        ctx: EngineContext,
        config: OrchestratorConfig,
        shutdown: ShutdownToken,
    ) -> Arc<Self> {
        let kind = processor.kind();
        let processor = Arc::new(processor);
        let store = Arc::new(JobStore::new(kind, ctx.snapshots, ctx.clock.clone()));
        let queue = Arc::new(JobQueue::new());
        let current = CurrentJob::default();

        let LoadReport { requeued, .. } = store.load(config.retention).await;
        for id in requeued {
            queue.push(id);
        }

        let worker = Worker::new(
            processor.clone(),
            store.clone(),
            queue.clone(),
            current.clone(),
            config.device_slot,
        );
        let handle = tokio::spawn(worker.run(shutdown));

        info!(kind = %kind, queued = queue.len(), "Orchestrator started");
        Arc::new(Self {
            kind,
            processor,
            store,
            queue,
            current,
            ids: ctx.ids,
            clock: ctx.clock,
            estimator: ctx.estimator,
            retention: config.retention,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Validate, estimate, persist and enqueue
    ///
    /// The job is readable as soon as this returns; the worker is never awaited.
    ///
    /// # Errors
    /// - `Validation`: payload rejected, no job created
    /// - `Persistence`: job could not be written, no job created
    pub async fn submit(&self, payload: P::Payload, session_id: Option<SessionId>) -> Result<KindJob<P>> {
        self.processor
            .validate(&payload)
            .map_err(AppError::from_validation)?;

        let workload = self.processor.workload(&payload);
        let needs_load = workload.resource.is_some() && self.processor.loaded_resource() != workload.resource;
        let estimate = self.estimator.estimate_for(self.kind, &workload, needs_load);

        let job = Job::new(self.ids.generate_id(), self.kind, session_id, payload, self.clock.now())
            .with_estimate(estimate);
        self.store.put(job.clone()).await?;
        self.queue.push(job.id.clone());

        info!(
            job_id = %job.id,
            kind = %self.kind,
            eta_seconds = job.eta_seconds,
            queue_depth = self.queue.len(),
            "Job submitted"
        );
        Ok(job)
    }

    pub async fn get(&self, id: &str) -> Result<KindJob<P>> {
        self.store
            .get(id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.store.contains(id).await
    }

    pub async fn list_by_kind(&self) -> Vec<KindJob<P>> {
        self.store.list().await
    }

    pub async fn list_by_session(&self, session_id: &str) -> Vec<KindJob<P>> {
        self.store.list_by_session(session_id).await
    }

    pub async fn list_active(&self) -> Vec<KindJob<P>> {
        self.store.list_active().await
    }

    /// Job the worker is running right now
    pub fn current_job_id(&self) -> Option<JobId> {
        self.current.get()
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn queue_position(&self, id: &str) -> Option<usize> {
        self.queue.position(id)
    }

    /// Cancel a job the worker has not picked up yet
    ///
    /// # Errors
    /// - `NotFound`: unknown ID
    /// - `Conflict`: job already running or finished
    pub async fn cancel(&self, id: &str) -> Result<KindJob<P>> {
        let job = self.get(id).await?;
        if !job.is_waiting() || !self.queue.remove(id) {
            let state = if job.is_terminal() { job.status.to_string() } else { "running".to_string() };
            return Err(AppError::Conflict(format!(
                "Job {} is {}; only queued jobs can be cancelled",
                id, state
            )));
        }

        let cancelled = self
            .store
            .mutate(id, "cancel", |job, now| job.fail(CANCELLED_MESSAGE, now))
            .await
            .ok_or_else(|| AppError::Conflict(format!("Job {} changed while cancelling", id)))?;
        info!(job_id = %id, kind = %self.kind, "Job cancelled");
        Ok(cancelled)
    }

    /// Forget a finished job
    pub async fn remove(&self, id: &str) -> Result<KindJob<P>> {
        self.store.remove(id).await
    }

    pub async fn prune_expired(&self) -> usize {
        self.store.prune(self.retention).await
    }

    pub async fn stats(&self) -> KindStats {
        KindStats {
            queue_depth: self.queue.len(),
            current_job_id: self.current.get(),
            ..self.store.stats().await
        }
    }

    /// Wait for the worker loop to exit after shutdown was signalled
    pub async fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(kind = %self.kind, error = %e, "Worker task ended abnormally");
            }
        }
    }
}
