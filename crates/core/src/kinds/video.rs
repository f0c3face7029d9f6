// Text-to-video generation (admission gated)

use super::image::check_guidance;
use super::{check_count, check_dimension, check_steps, require_text, MediaKind, ValidationResult};
use crate::domain::{DomainError, JobKind};
use crate::port::Workload;
use serde::{Deserialize, Serialize};

/// Model size assumed by the admission check when the caller gives none
pub const DEFAULT_VIDEO_MODEL_SIZE_GB: f64 = 20.0;

pub const MAX_FRAMES: u32 = 200;
pub const MAX_FPS: u32 = 60;

fn default_model() -> String {
    "cogvideox-5b".to_string()
}

fn default_width() -> u32 {
    720
}

fn default_height() -> u32 {
    480
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPayload {
    pub prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub num_frames: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    #[serde(default)]
    pub seed: Option<i64>,
    /// Weights size used by the admission check
    #[serde(default)]
    pub model_size_gb: Option<f64>,
}

pub struct VideoKind;

impl MediaKind for VideoKind {
    const KIND: JobKind = JobKind::Video;
    type Payload = VideoPayload;

    fn validate(p: &VideoPayload) -> ValidationResult {
        require_text("prompt", &p.prompt, super::image::MAX_PROMPT_CHARS)?;
        require_text("model", &p.model, 128)?;
        check_dimension("width", p.width)?;
        check_dimension("height", p.height)?;
        check_steps(p.steps)?;
        check_clip(p.num_frames, p.fps)?;
        check_model_size(p.model_size_gb)?;
        check_guidance(p.guidance_scale)
    }

    fn workload(p: &VideoPayload) -> Workload {
        Workload {
            steps: p.steps.unwrap_or(0),
            units: p.num_frames.unwrap_or(0),
            resource: Some(p.model.clone()),
        }
    }
}

pub(crate) fn check_clip(num_frames: Option<u32>, fps: Option<u32>) -> ValidationResult {
    if let Some(frames) = num_frames {
        check_count("num_frames", frames, MAX_FRAMES)?;
    }
    if let Some(fps) = fps {
        check_count("fps", fps, MAX_FPS)?;
    }
    Ok(())
}

pub(crate) fn check_model_size(size: Option<f64>) -> ValidationResult {
    match size {
        Some(gb) if !gb.is_finite() || gb <= 0.0 => Err(DomainError::Validation(format!(
            "model_size_gb must be positive, got {}",
            gb
        ))),
        _ => Ok(()),
    }
}
