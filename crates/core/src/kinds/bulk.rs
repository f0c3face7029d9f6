// Batch text-to-image over many prompts

use super::image::MAX_PROMPT_CHARS;
use super::{check_count, check_dimension, check_steps, require_text, MediaKind, ValidationResult};
use crate::domain::JobKind;
use crate::port::Workload;
use serde::{Deserialize, Serialize};

pub const MAX_BULK_PROMPTS: u32 = 100;
pub const MAX_IMAGES_PER_PROMPT: u32 = 4;

fn default_model() -> String {
    "flux-schnell".to_string()
}

fn default_size() -> u32 {
    1024
}

fn default_images_per_prompt() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkPayload {
    pub prompts: Vec<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub steps: Option<u32>,
    #[serde(default = "default_images_per_prompt")]
    pub images_per_prompt: u32,
    #[serde(default = "default_size")]
    pub width: u32,
    #[serde(default = "default_size")]
    pub height: u32,
}

pub struct BulkKind;

impl MediaKind for BulkKind {
    const KIND: JobKind = JobKind::Bulk;
    type Payload = BulkPayload;

    fn validate(p: &BulkPayload) -> ValidationResult {
        check_count("prompts", u32::try_from(p.prompts.len()).unwrap_or(u32::MAX), MAX_BULK_PROMPTS)?;
        for (i, prompt) in p.prompts.iter().enumerate() {
            require_text(&format!("prompts[{}]", i), prompt, MAX_PROMPT_CHARS)?;
        }
        require_text("model", &p.model, 128)?;
        check_steps(p.steps)?;
        check_count("images_per_prompt", p.images_per_prompt, MAX_IMAGES_PER_PROMPT)?;
        check_dimension("width", p.width)?;
        check_dimension("height", p.height)
    }

    fn workload(p: &BulkPayload) -> Workload {
        Workload {
            steps: p.steps.unwrap_or(0),
            units: p.prompts.len() as u32 * p.images_per_prompt,
            resource: Some(p.model.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_units_are_prompts_times_images() {
        let p: BulkPayload = serde_json::from_value(
            json!({"prompts": ["a", "b", "c"], "images_per_prompt": 2}),
        )
        .unwrap();
        assert!(BulkKind::validate(&p).is_ok());
        assert_eq!(BulkKind::workload(&p).units, 6);
    }

    #[test]
    fn test_empty_batch_or_prompt_rejected() {
        let empty: BulkPayload = serde_json::from_value(json!({"prompts": []})).unwrap();
        assert!(BulkKind::validate(&empty).is_err());
        let blank: BulkPayload = serde_json::from_value(json!({"prompts": ["ok", " "]})).unwrap();
        let err = BulkKind::validate(&blank).unwrap_err();
        assert!(err.to_string().contains("prompts[1]"));
    }
}
