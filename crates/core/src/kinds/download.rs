// Third-party model download payload; processed by the HTTP downloader adapter

use super::{check_filename, check_http_url, ValidationResult};
use crate::domain::DomainError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadCategory {
    Lora,
    Checkpoint,
}

impl DownloadCategory {
    /// Subdirectory of the download root
    pub fn dir_name(&self) -> &'static str {
        match self {
            DownloadCategory::Lora => "loras",
            DownloadCategory::Checkpoint => "checkpoints",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadPayload {
    pub url: String,
    pub filename: String,
    pub category: DownloadCategory,
    /// Size announced by the model host; used when the server sends no length
    #[serde(default)]
    pub expected_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadOutput {
    pub local_path: String,
    pub bytes: u64,
}

pub fn validate_download(p: &DownloadPayload) -> ValidationResult {
    check_http_url("url", &p.url)?;
    check_filename("filename", &p.filename)?;
    if p.expected_bytes == Some(0) {
        return Err(DomainError::Validation("expected_bytes must be positive".to_string()));
    }
    Ok(())
}
