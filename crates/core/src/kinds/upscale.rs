// Frame-by-frame video upscaling

use super::{check_count, require_text, MediaKind, ValidationResult};
use crate::domain::{DomainError, JobKind};
use crate::port::Workload;
use serde::{Deserialize, Serialize};

pub const MAX_UPSCALE_FRAMES: u32 = 100_000;

fn default_model() -> String {
    "realesrgan-x2plus".to_string()
}

fn default_scale() -> u32 {
    2
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpscalePayload {
    /// Asset ID or path of the video to upscale
    pub source_video: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_scale")]
    pub scale: u32,
    pub total_frames: u32,
}

pub struct UpscaleKind;

impl MediaKind for UpscaleKind {
    const KIND: JobKind = JobKind::Upscale;
    type Payload = UpscalePayload;

    fn validate(p: &UpscalePayload) -> ValidationResult {
        require_text("source_video", &p.source_video, 1024)?;
        require_text("model", &p.model, 128)?;
        if !matches!(p.scale, 2 | 4) {
            return Err(DomainError::Validation(format!("scale must be 2 or 4, got {}", p.scale)));
        }
        check_count("total_frames", p.total_frames, MAX_UPSCALE_FRAMES)
    }

    fn workload(p: &UpscalePayload) -> Workload {
        Workload {
            steps: 1,
            units: p.total_frames,
            resource: Some(p.model.clone()),
        }
    }
}
