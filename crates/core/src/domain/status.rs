// Job status state machine
//
// Queued -> {Downloading} -> {LoadingResource} -> Processing -> Saving -> {Completed | Failed}
// Processors may report their own stage names (e.g. "generating"); those count as processing.
// A job the worker has picked up stays queued (with started_at set) until its first report.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Queued,
    Downloading,
    LoadingResource,
    Processing,
    /// Processor-defined processing stage
    Stage(String),
    Saving,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Downloading => "downloading",
            JobStatus::LoadingResource => "loading_resource",
            JobStatus::Processing => "processing",
            JobStatus::Stage(name) => name,
            JobStatus::Saving => "saving",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_processing_phase(&self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::Stage(_))
    }

    /// Whether `next` is reachable from `self` in a single step
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            // only recovery puts a job back in the queue
            JobStatus::Queued => false,
            JobStatus::Saving => self.is_processing_phase() || *self == JobStatus::Saving,
            JobStatus::Completed => *self == JobStatus::Saving,
            JobStatus::Failed => true,
            JobStatus::Downloading
            | JobStatus::LoadingResource
            | JobStatus::Processing
            | JobStatus::Stage(_) => true,
        }
    }
}

impl From<String> for JobStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "queued" => JobStatus::Queued,
            "downloading" => JobStatus::Downloading,
            "loading_resource" => JobStatus::LoadingResource,
            "processing" => JobStatus::Processing,
            "saving" => JobStatus::Saving,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Stage(value),
        }
    }
}

impl From<&str> for JobStatus {
    fn from(value: &str) -> Self {
        JobStatus::from(value.to_string())
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Stage(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
