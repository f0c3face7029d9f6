// Text-to-image generation

use super::{check_count, check_dimension, check_steps, require_text, MediaKind, ValidationResult};
use crate::domain::{DomainError, JobKind};
use crate::port::Workload;
use serde::{Deserialize, Serialize};

pub const MAX_PROMPT_CHARS: usize = 2000;
pub const MAX_IMAGES_PER_JOB: u32 = 4;

fn default_model() -> String {
    "flux-schnell".to_string()
}

fn default_size() -> u32 {
    1024
}

fn default_num_images() -> u32 {
    4
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub prompt: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub negative_prompt: Option<String>,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default)]
    pub guidance_scale: Option<f32>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default = "default_num_images")]
    pub num_images: u32,
}

pub struct ImageKind;

impl MediaKind for ImageKind {
    const KIND: JobKind = JobKind::Image;
    type Payload = ImagePayload;

    fn validate(p: &ImagePayload) -> ValidationResult {
        require_text("prompt", &p.prompt, MAX_PROMPT_CHARS)?;
        if let Some(negative) = &p.negative_prompt {
            if negative.chars().count() > MAX_PROMPT_CHARS {
                return Err(DomainError::Validation(format!(
                    "negative_prompt exceeds {} characters",
                    MAX_PROMPT_CHARS
                )));
            }
        }
        require_text("model", &p.model, 128)?;
        check_dimension("width", p.width)?;
        check_dimension("height", p.height)?;
        check_steps(p.steps)?;
        check_count("num_images", p.num_images, MAX_IMAGES_PER_JOB)?;
        check_guidance(p.guidance_scale)
    }

    fn workload(p: &ImagePayload) -> Workload {
        Workload {
            steps: p.steps.unwrap_or(0),
            units: p.num_images,
            resource: Some(p.model.clone()),
        }
    }
}

pub(crate) fn check_guidance(scale: Option<f32>) -> ValidationResult {
    match scale {
        Some(g) if !(0.0..=20.0).contains(&g) => Err(DomainError::Validation(format!(
            "guidance_scale must be between 0 and 20, got {}",
            g
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_in() {
        let p: ImagePayload = serde_json::from_value(json!({"prompt": "a lighthouse"})).unwrap();
        assert_eq!(p.model, "flux-schnell");
        assert_eq!((p.width, p.height, p.num_images), (1024, 1024, 4));
        assert!(ImageKind::validate(&p).is_ok());

        let w = ImageKind::workload(&p);
        assert_eq!((w.steps, w.units), (0, 4));
        assert_eq!(w.resource.as_deref(), Some("flux-schnell"));
    }

    #[test]
    fn test_rejects_bad_input() {
        let base = json!({"prompt": "x"});
        let with = |patch: serde_json::Value| {
            let mut v = base.clone();
            for (k, val) in patch.as_object().unwrap() {
                v[k] = val.clone();
            }
            serde_json::from_value::<ImagePayload>(v).unwrap()
        };
        assert!(ImageKind::validate(&with(json!({"prompt": ""}))).is_err());
        assert!(ImageKind::validate(&with(json!({"width": 1000}))).is_err());
        assert!(ImageKind::validate(&with(json!({"steps": 500}))).is_err());
        assert!(ImageKind::validate(&with(json!({"num_images": 0}))).is_err());
        assert!(ImageKind::validate(&with(json!({"guidance_scale": 25.0}))).is_err());
    }
}
