// Job kinds: one queue, one worker and one processor per kind

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::DomainError;

/// Category of long-running work handled by its own orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Image,
    Video,
    I2v,
    Upscale,
    Bulk,
    Workflow,
    Download,
}

impl JobKind {
    pub const ALL: [JobKind; 7] = [
        JobKind::Image,
        JobKind::Video,
        JobKind::I2v,
        JobKind::Upscale,
        JobKind::Bulk,
        JobKind::Workflow,
        JobKind::Download,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Image => "image",
            JobKind::Video => "video",
            JobKind::I2v => "i2v",
            JobKind::Upscale => "upscale",
            JobKind::Bulk => "bulk",
            JobKind::Workflow => "workflow",
            JobKind::Download => "download",
        }
    }

    /// Kinds that must pass the resource gate before submission
    pub fn requires_admission(&self) -> bool {
        matches!(self, JobKind::Video | JobKind::I2v)
    }

    /// File name of the persisted snapshot for this kind
    pub fn snapshot_file_name(&self) -> String {
        format!("{}_jobs.json", self.as_str())
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| DomainError::UnknownKind(s.to_string()))
    }
}
