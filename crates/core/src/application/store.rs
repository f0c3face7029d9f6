// Job Store: in-memory job map with write-through persistence
//
// Every mutation is a read-modify-write under one async mutex, and the durable
// write happens before the mutex is released.

use crate::domain::{DomainError, Job, JobId, JobKind, ProgressUpdate};
use crate::error::{AppError, Result};
use crate::port::{ProgressSink, SnapshotStore, TimeProvider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Per-kind counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindStats {
    pub kind: Option<JobKind>,
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub queue_depth: usize,
    pub current_job_id: Option<JobId>,
}

/// Outcome of loading the persisted snapshot
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Interrupted jobs reset to queued, oldest first
    pub requeued: Vec<JobId>,
    pub restored: usize,
    pub expired: usize,
    pub corrupt: usize,
}

pub struct JobStore<P, R> {
    kind: JobKind,
    jobs: Mutex<HashMap<JobId, Job<P, R>>>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn TimeProvider>,
}

impl<P, R> JobStore<P, R>
where
    P: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(kind: JobKind, snapshots: Arc<dyn SnapshotStore>, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            kind,
            jobs: Mutex::new(HashMap::new()),
            snapshots,
            clock,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Rehydrate from the snapshot and run crash recovery
    ///
    /// Algorithm:
    /// 1. Unreadable document => start empty (logged)
    /// 2. Unreadable record, or finished record without exactly one of result/error => skipped (logged)
    /// 3. Non-terminal record => reset to queued, progress 0, returned for re-enqueue
    /// 4. Terminal record older than `retention` => not rehydrated
    pub async fn load(&self, retention: chrono::Duration) -> LoadReport {
        let mut report = LoadReport::default();
        let document = match self.snapshots.load(self.kind).await {
            Ok(Some(doc)) => doc,
            Ok(None) => {
                debug!(kind = %self.kind, "No persisted jobs");
                return report;
            }
            Err(e) => {
                error!(kind = %self.kind, error = %e, "Failed to load persisted jobs, starting empty");
                return report;
            }
        };

        let records = match document.get("jobs").and_then(Value::as_array) {
            Some(records) => records.clone(),
            None => {
                warn!(kind = %self.kind, "Persisted document has no job list, starting empty");
                return report;
            }
        };

        let now = self.clock.now();
        let mut loaded: Vec<Job<P, R>> = Vec::with_capacity(records.len());
        for record in records {
            match serde_json::from_value::<Job<P, R>>(record) {
                Ok(job) if job.is_terminal() && !job.has_consistent_outcome() => {
                    warn!(
                        job_id = %job.id,
                        kind = %self.kind,
                        status = %job.status,
                        "Skipping finished job without exactly one of result/error"
                    );
                    report.corrupt += 1;
                }
                Ok(job) => loaded.push(job),
                Err(e) => {
                    warn!(kind = %self.kind, error = %e, "Skipping corrupt job record");
                    report.corrupt += 1;
                }
            }
        }
        loaded.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut jobs = self.jobs.lock().await;
        for mut job in loaded {
            if job.kind != self.kind {
                warn!(job_id = %job.id, kind = %job.kind, expected = %self.kind, "Skipping job of another kind");
                report.corrupt += 1;
                continue;
            }
            if job.is_terminal() {
                if is_expired(&job, now, retention) {
                    report.expired += 1;
                    continue;
                }
            } else {
                let interrupted = job.status.clone();
                // requeue only fails on terminal jobs
                if job.requeue().is_ok() {
                    info!(job_id = %job.id, kind = %self.kind, previous_status = %interrupted, "Re-queued interrupted job");
                    report.requeued.push(job.id.clone());
                }
            }
            report.restored += 1;
            jobs.insert(job.id.clone(), job);
        }

        if !report.requeued.is_empty() || report.expired > 0 || report.corrupt > 0 {
            if let Err(e) = self.persist_locked(&jobs).await {
                error!(kind = %self.kind, error = %e, "Failed to persist recovered jobs");
            }
        }

        info!(
            kind = %self.kind,
            restored = report.restored,
            requeued = report.requeued.len(),
            expired = report.expired,
            corrupt = report.corrupt,
            "Job store loaded"
        );
        report
    }

    /// Insert a new job; on a failed write the insert is rolled back
    pub async fn put(&self, job: Job<P, R>) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
        }
        let id = job.id.clone();
        jobs.insert(id.clone(), job);
        if let Err(e) = self.persist_locked(&jobs).await {
            jobs.remove(&id);
            return Err(e);
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Job<P, R>> {
        self.jobs.lock().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.jobs.lock().await.contains_key(id)
    }

    /// All jobs, oldest first
    pub async fn list(&self) -> Vec<Job<P, R>> {
        self.select(|_| true).await
    }

    pub async fn list_by_session(&self, session_id: &str) -> Vec<Job<P, R>> {
        self.select(|job| job.session_id.as_deref() == Some(session_id))
            .await
    }

    /// Non-terminal jobs, oldest first
    pub async fn list_active(&self) -> Vec<Job<P, R>> {
        self.select(|job| !job.is_terminal()).await
    }

    async fn select(&self, keep: impl Fn(&Job<P, R>) -> bool) -> Vec<Job<P, R>> {
        let jobs = self.jobs.lock().await;
        let mut selected: Vec<Job<P, R>> = jobs.values().filter(|j| keep(j)).cloned().collect();
        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        selected
    }

    /// Read-modify-write of one job
    ///
    /// Returns the updated job, or `None` when the job is unknown or the change was
    /// rejected. Rejections are logged no-ops. A failed durable write is logged and
    /// the in-memory change kept; the next successful write carries it.
    pub async fn mutate<F>(&self, id: &str, op: &str, change: F) -> Option<Job<P, R>>
    where
        F: FnOnce(&mut Job<P, R>, DateTime<Utc>) -> std::result::Result<(), DomainError>,
    {
        let mut jobs = self.jobs.lock().await;
        let Some(current) = jobs.get(id) else {
            warn!(job_id = %id, kind = %self.kind, op = %op, "Update for unknown job ignored");
            return None;
        };

        let mut updated = current.clone();
        if let Err(e) = change(&mut updated, self.clock.now()) {
            warn!(job_id = %id, kind = %self.kind, op = %op, error = %e, "Rejected job update");
            return None;
        }

        jobs.insert(id.to_string(), updated.clone());
        if let Err(e) = self.persist_locked(&jobs).await {
            error!(job_id = %id, kind = %self.kind, op = %op, error = %e, "Failed to persist job update");
        }
        Some(updated)
    }

    /// Mark a queued job as picked up; `None` when it is no longer waiting
    pub async fn begin(&self, id: &str) -> Option<Job<P, R>> {
        self.mutate(id, "start", |job, now| job.start(now)).await
    }

    /// Drop a terminal job from tracking
    pub async fn remove(&self, id: &str) -> Result<Job<P, R>> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get(id)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
        if !job.is_terminal() {
            return Err(AppError::Conflict(format!(
                "Job {} is {}; only finished jobs can be removed",
                id, job.status
            )));
        }
        let removed = jobs.remove(id).ok_or_else(|| AppError::NotFound(id.to_string()))?;
        if let Err(e) = self.persist_locked(&jobs).await {
            jobs.insert(removed.id.clone(), removed);
            return Err(e);
        }
        Ok(removed)
    }

    /// Drop terminal jobs older than `retention`; returns how many were dropped
    pub async fn prune(&self, retention: chrono::Duration) -> usize {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.is_terminal() && is_expired(job, now, retention)));
        let pruned = before - jobs.len();
        if pruned > 0 {
            if let Err(e) = self.persist_locked(&jobs).await {
                error!(kind = %self.kind, error = %e, "Failed to persist after pruning");
            }
            info!(kind = %self.kind, pruned = pruned, "Pruned expired jobs");
        }
        pruned
    }

    pub async fn stats(&self) -> KindStats {
        let jobs = self.jobs.lock().await;
        let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
        for job in jobs.values() {
            *by_status.entry(job.status.to_string()).or_default() += 1;
        }
        KindStats {
            kind: Some(self.kind),
            total: jobs.len(),
            by_status,
            ..Default::default()
        }
    }

    /// Serialize the whole map and hand it to the snapshot store (mutex must be held)
    async fn persist_locked(&self, jobs: &HashMap<JobId, Job<P, R>>) -> Result<()> {
        let mut ordered: Vec<&Job<P, R>> = jobs.values().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let records = ordered
            .into_iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<Value>, _>>()?;
        self.snapshots
            .persist(self.kind, &json!({ "jobs": records }))
            .await
    }
}

/// Terminal jobs age out by creation time
fn is_expired<P, R>(job: &Job<P, R>, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
    now - job.created_at >= retention
}

#[async_trait]
impl<P, R> ProgressSink for JobStore<P, R>
where
    P: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn apply(&self, job_id: &str, update: ProgressUpdate) {
        self.mutate(job_id, "progress", |job, now| job.apply_progress(update, now))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;
    use crate::port::snapshot_store::mocks::MemorySnapshotStore;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use chrono::TimeZone;

    type TestJob = Job<Value, Value>;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn setup() -> (Arc<MemorySnapshotStore>, Arc<FixedTimeProvider>, JobStore<Value, Value>) {
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let clock = Arc::new(FixedTimeProvider::new(t0()));
        let store = JobStore::new(JobKind::Image, snapshots.clone(), clock.clone());
        (snapshots, clock, store)
    }

    fn job(id: &str, created_at: DateTime<Utc>) -> TestJob {
        Job::new(id, JobKind::Image, Some("s1".to_string()), json!({"n": id}), created_at)
    }

    #[tokio::test]
    async fn test_put_is_visible_and_persisted() {
        let (snapshots, _, store) = setup();
        store.put(job("a", t0())).await.unwrap();

        assert!(store.get("a").await.is_some());
        let doc = snapshots.document(JobKind::Image).unwrap();
        assert_eq!(doc["jobs"][0]["id"], "a");
        assert_eq!(doc["jobs"][0]["status"], "queued");
    }

    #[tokio::test]
    async fn test_put_rejects_duplicate_id() {
        let (_, _, store) = setup();
        store.put(job("a", t0())).await.unwrap();
        let err = store.put(job("a", t0())).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_put_rolls_back_when_write_fails() {
        let (snapshots, _, store) = setup();
        snapshots.set_fail_writes(true);
        assert!(store.put(job("a", t0())).await.is_err());
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_illegal_update_is_noop() {
        let (snapshots, _, store) = setup();
        store.put(job("a", t0())).await.unwrap();
        let writes_before = snapshots.revisions(JobKind::Image).len();

        let result = store
            .mutate("a", "save", |job, now| job.transition(JobStatus::Saving, now))
            .await;

        assert!(result.is_none());
        assert_eq!(store.get("a").await.unwrap().status, JobStatus::Queued);
        assert_eq!(snapshots.revisions(JobKind::Image).len(), writes_before);
    }

    #[tokio::test]
    async fn test_unknown_job_update_is_noop() {
        let (_, _, store) = setup();
        assert!(store.begin("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_load_requeues_interrupted_and_drops_expired() {
        let (snapshots, clock, store) = setup();
        let mut running = job("running", t0());
        running.start(t0()).unwrap();
        running.record_progress(60.0).unwrap();

        let mut old_done = job("old", t0() - chrono::Duration::hours(30));
        old_done.fail("boom", t0()).unwrap();
        let mut recent_done = job("recent", t0() - chrono::Duration::hours(2));
        recent_done.fail("boom", t0()).unwrap();

        snapshots.seed(
            JobKind::Image,
            json!({"jobs": [
                serde_json::to_value(&running).unwrap(),
                serde_json::to_value(&old_done).unwrap(),
                serde_json::to_value(&recent_done).unwrap(),
                {"id": "broken", "status": 42},
            ]}),
        );
        clock.advance(chrono::Duration::minutes(5));

        let report = store.load(chrono::Duration::hours(24)).await;
        assert_eq!(report.requeued, vec!["running".to_string()]);
        assert_eq!(report.expired, 1);
        assert_eq!(report.corrupt, 1);
        assert_eq!(report.restored, 2);

        let recovered = store.get("running").await.unwrap();
        assert_eq!(recovered.status, JobStatus::Queued);
        assert_eq!(recovered.progress, 0.0);
        assert!(store.get("old").await.is_none());
        assert!(store.get("recent").await.is_some());
    }

    #[tokio::test]
    async fn test_load_skips_finished_jobs_with_inconsistent_outcome() {
        let (snapshots, _, store) = setup();
        let base = serde_json::to_value(job("x", t0())).unwrap();
        let with = |id: &str, status: &str, result: Value, error: Value| {
            let mut record = base.clone();
            record["id"] = json!(id);
            record["status"] = json!(status);
            record["result"] = result;
            record["error"] = error;
            record
        };
        snapshots.seed(
            JobKind::Image,
            json!({"jobs": [
                with("failed-no-error", "failed", Value::Null, Value::Null),
                with("completed-both", "completed", json!({"asset": "a.png"}), json!("boom")),
                with("completed-ok", "completed", json!({"asset": "b.png"}), Value::Null),
            ]}),
        );

        let report = store.load(chrono::Duration::hours(24)).await;

        assert_eq!(report.corrupt, 2);
        assert_eq!(report.restored, 1);
        assert!(store.get("failed-no-error").await.is_none());
        assert!(store.get("completed-both").await.is_none());
        assert!(store.get("completed-ok").await.unwrap().has_consistent_outcome());
        let doc = snapshots.document(JobKind::Image).unwrap();
        assert_eq!(doc["jobs"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_load_survives_garbage_document() {
        let (snapshots, _, store) = setup();
        snapshots.seed(JobKind::Image, json!("not a job list"));
        let report = store.load(chrono::Duration::hours(24)).await;
        assert_eq!(report.restored, 0);
        assert!(store.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_only_terminal() {
        let (_, _, store) = setup();
        store.put(job("a", t0())).await.unwrap();
        assert!(matches!(store.remove("a").await, Err(AppError::Conflict(_))));

        store.mutate("a", "fail", |job, now| job.fail("x", now)).await.unwrap();
        assert_eq!(store.remove("a").await.unwrap().id, "a");
        assert!(matches!(store.remove("a").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_prune_keeps_active_jobs() {
        let (_, clock, store) = setup();
        store.put(job("active", t0())).await.unwrap();
        store.put(job("done", t0())).await.unwrap();
        store.mutate("done", "fail", |job, now| job.fail("x", now)).await.unwrap();

        clock.advance(chrono::Duration::hours(25));
        assert_eq!(store.prune(chrono::Duration::hours(24)).await, 1);
        assert!(store.get("active").await.is_some());
        assert!(store.get("done").await.is_none());
    }

    #[tokio::test]
    async fn test_session_and_active_listings() {
        let (_, _, store) = setup();
        store.put(job("a", t0())).await.unwrap();
        let mut other = job("b", t0() + chrono::Duration::seconds(1));
        other.session_id = Some("s2".to_string());
        store.put(other).await.unwrap();
        store.mutate("a", "fail", |job, now| job.fail("x", now)).await.unwrap();

        let s1: Vec<String> = store.list_by_session("s1").await.into_iter().map(|j| j.id).collect();
        assert_eq!(s1, vec!["a"]);
        let active: Vec<String> = store.list_active().await.into_iter().map(|j| j.id).collect();
        assert_eq!(active, vec!["b"]);

        let stats = store.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status.get("failed"), Some(&1));
        assert_eq!(stats.by_status.get("queued"), Some(&1));
    }
}
