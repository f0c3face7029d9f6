// Job Domain Model: generic envelope around a kind-specific payload and result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};
use super::kind::JobKind;
use super::status::JobStatus;

/// Job ID (UUID v4 in production)
pub type JobId = String;

/// Opaque grouping key supplied by clients
pub type SessionId = String;

/// Type-erased job, used wherever kinds are mixed (registry, API)
pub type JobView = Job<serde_json::Value, serde_json::Value>;

/// Error recorded on a queued job that was cancelled before the worker reached it
pub const CANCELLED_MESSAGE: &str = "cancelled before processing started";

/// Partial update reported by a processor while a job runs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub status: Option<JobStatus>,
    pub percent: Option<f32>,
    pub message: Option<String>,
}

/// Job Entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<P, R> {
    pub id: JobId,
    pub kind: JobKind,
    #[serde(default)]
    pub session_id: Option<SessionId>,
    pub status: JobStatus,

    // Progress reporting
    #[serde(default)]
    pub progress: f32,
    #[serde(default)]
    pub progress_message: Option<String>,
    #[serde(default)]
    pub eta_seconds: f64,
    #[serde(default)]
    pub estimated_seconds: f64,
    #[serde(default)]
    pub attempts: u32,

    pub payload: P,
    pub result: Option<R>,
    #[serde(default)]
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl<P, R> Job<P, R> {
    /// Create a new queued job
    ///
    /// ID and creation time are injected so tests stay deterministic.
    pub fn new(
        id: impl Into<String>,
        kind: JobKind,
        session_id: Option<SessionId>,
        payload: P,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            session_id,
            status: JobStatus::Queued,
            progress: 0.0,
            progress_message: None,
            eta_seconds: 0.0,
            estimated_seconds: 0.0,
            attempts: 0,
            payload,
            result: None,
            error: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Attach the submit-time duration estimate
    pub fn with_estimate(mut self, seconds: f64) -> Self {
        self.estimated_seconds = seconds.max(0.0);
        self.eta_seconds = self.estimated_seconds;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Exactly one of `result`/`error` is set on terminal jobs, neither otherwise
    pub fn has_consistent_outcome(&self) -> bool {
        let has_error = self.error.as_deref().is_some_and(|e| !e.is_empty());
        match self.status {
            JobStatus::Completed => self.result.is_some() && !has_error,
            JobStatus::Failed => self.result.is_none() && has_error,
            _ => self.result.is_none() && self.error.is_none(),
        }
    }

    fn reject(&self, to: &JobStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    /// Queued and not yet picked up by the worker
    pub fn is_waiting(&self) -> bool {
        self.status == JobStatus::Queued && self.started_at.is_none()
    }

    /// Worker picked the job up
    ///
    /// The status stays `queued` so the processor's first report can enter an
    /// optional pre-stage (downloading, loading_resource) or processing directly.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_waiting() {
            return Err(self.reject(&JobStatus::Processing));
        }
        self.started_at = Some(now);
        self.progress = 0.0;
        self.attempts += 1;
        Ok(())
    }

    /// Move between non-terminal statuses
    ///
    /// Terminal states are reached through `complete`/`fail` only.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<()> {
        if next.is_terminal() || !self.status.can_transition_to(&next) {
            return Err(self.reject(&next));
        }
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Record progress; never moves backwards within a run
    pub fn record_progress(&mut self, percent: f32) -> Result<()> {
        if self.is_terminal() {
            return Err(self.reject(&self.status.clone()));
        }
        if percent.is_finite() {
            self.progress = self.progress.max(percent.clamp(0.0, 100.0));
        }
        self.eta_seconds = self.estimated_seconds * f64::from(100.0 - self.progress) / 100.0;
        Ok(())
    }

    /// Apply a processor callback; the whole update is rejected on an illegal status
    pub fn apply_progress(&mut self, update: ProgressUpdate, now: DateTime<Utc>) -> Result<()> {
        if self.is_terminal() {
            return Err(self.reject(&update.status.unwrap_or_else(|| self.status.clone())));
        }
        // a status-less report from a started job means the work itself began
        let next = update.status.or_else(|| {
            (self.status == JobStatus::Queued && self.started_at.is_some())
                .then_some(JobStatus::Processing)
        });
        if let Some(status) = next {
            if status != self.status {
                self.transition(status, now)?;
            }
        }
        if let Some(percent) = update.percent {
            self.record_progress(percent)?;
        }
        if update.message.is_some() {
            self.progress_message = update.message;
        }
        Ok(())
    }

    /// Saving -> Completed with the processor's result
    pub fn complete(&mut self, result: R, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(&JobStatus::Completed) {
            return Err(self.reject(&JobStatus::Completed));
        }
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.progress = 100.0;
        self.eta_seconds = 0.0;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Any non-terminal status -> Failed
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> Result<()> {
        if self.is_terminal() {
            return Err(self.reject(&JobStatus::Failed));
        }
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "unknown error".to_string();
        }
        self.status = JobStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.eta_seconds = 0.0;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Crash recovery: put an interrupted job back in the queue
    pub fn requeue(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(self.reject(&JobStatus::Queued));
        }
        self.status = JobStatus::Queued;
        self.progress = 0.0;
        self.progress_message = None;
        self.eta_seconds = self.estimated_seconds;
        self.started_at = None;
        self.completed_at = None;
        self.result = None;
        self.error = None;
        Ok(())
    }
}

impl<P: Serialize, R: Serialize> Job<P, R> {
    /// Erase payload and result types
    pub fn to_view(&self) -> serde_json::Result<JobView> {
        Ok(Job {
            id: self.id.clone(),
            kind: self.kind,
            session_id: self.session_id.clone(),
            status: self.status.clone(),
            progress: self.progress,
            progress_message: self.progress_message.clone(),
            eta_seconds: self.eta_seconds,
            estimated_seconds: self.estimated_seconds,
            attempts: self.attempts,
            payload: serde_json::to_value(&self.payload)?,
            result: self.result.as_ref().map(serde_json::to_value).transpose()?,
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}
