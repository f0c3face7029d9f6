// Image-to-video generation (admission gated)

use super::image::MAX_PROMPT_CHARS;
use super::video::{check_clip, check_model_size};
use super::{check_steps, require_text, MediaKind, ValidationResult};
use crate::domain::JobKind;
use crate::port::Workload;
use serde::{Deserialize, Serialize};

fn default_model() -> String {
    "wan2.1-i2v".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct I2vPayload {
    pub prompt: String,
    /// Asset ID or path of the first frame
    pub source_image: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub num_frames: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub model_size_gb: Option<f64>,
}

pub struct I2vKind;

impl MediaKind for I2vKind {
    const KIND: JobKind = JobKind::I2v;
    type Payload = I2vPayload;

    fn validate(p: &I2vPayload) -> ValidationResult {
        require_text("prompt", &p.prompt, MAX_PROMPT_CHARS)?;
        require_text("source_image", &p.source_image, 1024)?;
        require_text("model", &p.model, 128)?;
        check_steps(p.steps)?;
        check_clip(p.num_frames, p.fps)?;
        check_model_size(p.model_size_gb)
    }

    fn workload(p: &I2vPayload) -> Workload {
        Workload {
            steps: p.steps.unwrap_or(0),
            units: p.num_frames.unwrap_or(0),
            resource: Some(p.model.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_image_required() {
        let p: I2vPayload =
            serde_json::from_value(json!({"prompt": "pan left", "source_image": ""})).unwrap();
        assert!(I2vKind::validate(&p).is_err());
        assert!(serde_json::from_value::<I2vPayload>(json!({"prompt": "pan left"})).is_err());
    }
}
