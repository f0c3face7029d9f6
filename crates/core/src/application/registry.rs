// Job Registry: type-erased access to every kind's orchestrator
//
// The API layer only sees JSON payloads and `JobView`s; each orchestrator keeps its
// typed payload and result.

use super::orchestrator::Orchestrator;
use super::store::KindStats;
use crate::domain::{Job, JobId, JobKind, JobView, SessionId};
use crate::error::{AppError, Result};
use crate::port::Processor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Object-safe face of an `Orchestrator<P>`
#[async_trait]
pub trait JobService: Send + Sync {
    fn kind(&self) -> JobKind;

    /// Deserialize the payload into the kind's type, then submit
    async fn submit_value(&self, payload: Value, session_id: Option<SessionId>) -> Result<JobView>;

    async fn get_view(&self, id: &str) -> Option<JobView>;

    async fn list_views(&self) -> Result<Vec<JobView>>;

    async fn list_session_views(&self, session_id: &str) -> Result<Vec<JobView>>;

    async fn list_active_views(&self) -> Result<Vec<JobView>>;

    async fn cancel_job(&self, id: &str) -> Result<JobView>;

    async fn remove_job(&self, id: &str) -> Result<JobView>;

    async fn prune(&self) -> usize;

    async fn kind_stats(&self) -> KindStats;

    fn running_job_id(&self) -> Option<JobId>;

    async fn join(&self);
}

/// A typed job that cannot be rendered as JSON is a bug in its kind, not bad input
fn view<P: Serialize, R: Serialize>(job: &Job<P, R>) -> Result<JobView> {
    job.to_view()
        .map_err(|e| AppError::Internal(format!("Job {} is not representable as JSON: {}", job.id, e)))
}

fn views<P: Serialize, R: Serialize>(jobs: Vec<Job<P, R>>) -> Result<Vec<JobView>> {
    jobs.iter().map(view).collect()
}

#[async_trait]
impl<P: Processor> JobService for Orchestrator<P> {
    fn kind(&self) -> JobKind {
        Orchestrator::kind(self)
    }

    async fn submit_value(&self, payload: Value, session_id: Option<SessionId>) -> Result<JobView> {
        let payload: P::Payload = serde_json::from_value(payload).map_err(|e| {
            AppError::Validation(format!("Invalid {} payload: {}", Orchestrator::kind(self), e))
        })?;
        view(&self.submit(payload, session_id).await?)
    }

    async fn get_view(&self, id: &str) -> Option<JobView> {
        self.get(id).await.ok().and_then(|job| view(&job).ok())
    }

    async fn list_views(&self) -> Result<Vec<JobView>> {
        views(self.list_by_kind().await)
    }

    async fn list_session_views(&self, session_id: &str) -> Result<Vec<JobView>> {
        views(self.list_by_session(session_id).await)
    }

    async fn list_active_views(&self) -> Result<Vec<JobView>> {
        views(self.list_active().await)
    }

    async fn cancel_job(&self, id: &str) -> Result<JobView> {
        view(&self.cancel(id).await?)
    }

    async fn remove_job(&self, id: &str) -> Result<JobView> {
        view(&self.remove(id).await?)
    }

    async fn prune(&self) -> usize {
        self.prune_expired().await
    }

    async fn kind_stats(&self) -> KindStats {
        self.stats().await
    }

    fn running_job_id(&self) -> Option<JobId> {
        self.current_job_id()
    }

    async fn join(&self) {
        self.join_worker().await
    }
}

/// Listing filter; all fields optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub kind: Option<JobKind>,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    /// Only non-terminal jobs
    #[serde(default)]
    pub active_only: bool,
}

/// One orchestrator per kind, constructed once at startup
#[derive(Default)]
pub struct JobRegistry {
    services: BTreeMap<JobKind, Arc<dyn JobService>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an orchestrator; a second one for the same kind replaces the first
    pub fn register(&mut self, service: Arc<dyn JobService>) {
        let kind = service.kind();
        if self.services.insert(kind, service).is_some() {
            tracing::warn!(kind = %kind, "Replaced orchestrator");
        } else {
            info!(kind = %kind, "Registered orchestrator");
        }
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        self.services.keys().copied().collect()
    }

    pub fn service(&self, kind: JobKind) -> Result<&Arc<dyn JobService>> {
        self.services
            .get(&kind)
            .ok_or_else(|| AppError::NotFound(format!("No orchestrator for kind {}", kind)))
    }

    pub async fn submit(&self, kind: JobKind, payload: Value, session_id: Option<SessionId>) -> Result<JobView> {
        self.service(kind)?.submit_value(payload, session_id).await
    }

    /// Look a job up across every kind
    pub async fn get(&self, id: &str) -> Result<JobView> {
        for service in self.services.values() {
            if let Some(job) = service.get_view(id).await {
                return Ok(job);
            }
        }
        Err(AppError::NotFound(format!("Job {} not found", id)))
    }

    /// Jobs matching `filter`, oldest first
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<JobView>> {
        let services: Vec<&Arc<dyn JobService>> = match filter.kind {
            Some(kind) => vec![self.service(kind)?],
            None => self.services.values().collect(),
        };

        let mut jobs = Vec::new();
        for service in services {
            let mut found = match (&filter.session_id, filter.active_only) {
                (Some(session), _) => service.list_session_views(session).await?,
                (None, true) => service.list_active_views().await?,
                (None, false) => service.list_views().await?,
            };
            if filter.session_id.is_some() && filter.active_only {
                found.retain(|job| !job.is_terminal());
            }
            jobs.extend(found);
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jobs)
    }

    pub async fn cancel(&self, id: &str) -> Result<JobView> {
        let job = self.get(id).await?;
        self.service(job.kind)?.cancel_job(id).await
    }

    pub async fn remove(&self, id: &str) -> Result<JobView> {
        let job = self.get(id).await?;
        self.service(job.kind)?.remove_job(id).await
    }

    pub async fn stats(&self) -> Vec<KindStats> {
        let mut stats = Vec::with_capacity(self.services.len());
        for service in self.services.values() {
            stats.push(service.kind_stats().await);
        }
        stats
    }

    /// Prune expired jobs of every kind; returns the total dropped
    pub async fn prune_all(&self) -> usize {
        let mut pruned = 0;
        for service in self.services.values() {
            pruned += service.prune().await;
        }
        pruned
    }

    /// Wait for every worker to stop after shutdown
    pub async fn join_all(&self) {
        for service in self.services.values() {
            service.join().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::eta::EtaEstimator;
    use crate::application::orchestrator::{EngineContext, OrchestratorConfig};
    use crate::application::worker::shutdown_channel;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::processor::mocks::ScriptedProcessor;
    use crate::port::snapshot_store::mocks::MemorySnapshotStore;
    use crate::port::time_provider::SystemTimeProvider;
    use serde_json::json;

    use crate::application::worker::ShutdownSender;

    async fn registry() -> (ShutdownSender, JobRegistry) {
        let (tx, token) = shutdown_channel();
        let ctx = EngineContext {
            snapshots: Arc::new(MemorySnapshotStore::new()),
            clock: Arc::new(SystemTimeProvider),
            ids: Arc::new(SequentialIdProvider::new("job")),
            estimator: Arc::new(EtaEstimator::default()),
        };
        let mut registry = JobRegistry::new();
        for kind in [JobKind::Image, JobKind::Video] {
            let orch = Orchestrator::start(
                ScriptedProcessor::new(kind),
                ctx.clone(),
                OrchestratorConfig::default(),
                token.clone(),
            )
            .await;
            registry.register(orch);
        }
        (tx, registry)
    }

    #[tokio::test]
    async fn test_routes_by_kind_and_finds_across_kinds() {
        let (_tx, registry) = registry().await;
        let image = registry.submit(JobKind::Image, json!({}), Some("s1".into())).await.unwrap();
        let video = registry.submit(JobKind::Video, json!({}), Some("s1".into())).await.unwrap();

        assert_eq!(registry.get(&image.id).await.unwrap().kind, JobKind::Image);
        assert_eq!(registry.get(&video.id).await.unwrap().kind, JobKind::Video);

        let session = registry
            .list(&JobFilter {
                session_id: Some("s1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(session.len(), 2);
    }

    #[test]
    fn test_unrenderable_job_is_an_internal_error() {
        let created = chrono::Utc::now();
        let mut job: Job<Value, BTreeMap<Vec<u8>, u8>> =
            Job::new("job-1", JobKind::Image, None, json!({}), created);
        job.result = Some(BTreeMap::from([(vec![1, 2], 3)]));

        let err = view(&job).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert!(err.to_string().contains("job-1"));
    }

    #[tokio::test]
    async fn test_unregistered_kind_is_not_found() {
        let (_tx, registry) = registry().await;
        let err = registry.submit(JobKind::Download, json!({}), None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(matches!(registry.get("nope").await, Err(AppError::NotFound(_))));
    }
}
