// Per-kind payloads and the media processor shared by the generation kinds
//
// Each media kind only defines its payload, validation and workload; the actual
// work is delegated to a `MediaBackend`.

pub mod bulk;
pub mod download;
pub mod i2v;
pub mod image;
pub mod upscale;
pub mod video;
pub mod workflow;

pub use bulk::{BulkKind, BulkPayload};
pub use download::{DownloadCategory, DownloadOutput, DownloadPayload};
pub use i2v::{I2vKind, I2vPayload};
pub use image::{ImageKind, ImagePayload};
pub use upscale::{UpscaleKind, UpscalePayload};
pub use video::{VideoKind, VideoPayload, DEFAULT_VIDEO_MODEL_SIZE_GB};
pub use workflow::{WorkflowKind, WorkflowPayload};

use crate::domain::{DomainError, JobKind};
use crate::port::{
    JobContext, MediaBackend, MediaRequest, ProcessError, Processor, ProgressReporter, Workload,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

pub type ValidationResult = std::result::Result<(), DomainError>;

/// Static description of one media job kind
pub trait MediaKind: Send + Sync + 'static {
    const KIND: JobKind;
    type Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn validate(payload: &Self::Payload) -> ValidationResult;

    fn workload(payload: &Self::Payload) -> Workload;
}

/// One produced file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    pub asset_id: String,
    pub url: String,
    #[serde(default)]
    pub seed: Option<i64>,
}

/// Result of every media kind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaOutput {
    #[serde(default)]
    pub assets: Vec<GeneratedAsset>,
    /// Per-item failures of a partially successful batch
    #[serde(default)]
    pub failures: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Processor for a media kind, backed by an external engine
pub struct MediaProcessor<K: MediaKind> {
    backend: Arc<dyn MediaBackend>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: MediaKind> MediaProcessor<K> {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K: MediaKind> Processor for MediaProcessor<K> {
    type Payload = K::Payload;
    type Output = MediaOutput;

    fn kind(&self) -> JobKind {
        K::KIND
    }

    fn validate(&self, payload: &K::Payload) -> ValidationResult {
        K::validate(payload)
    }

    fn workload(&self, payload: &K::Payload) -> Workload {
        K::workload(payload)
    }

    fn loaded_resource(&self) -> Option<String> {
        self.backend.loaded_resource(K::KIND)
    }

    async fn process(
        &self,
        ctx: JobContext,
        payload: K::Payload,
        progress: ProgressReporter,
    ) -> Result<MediaOutput, ProcessError> {
        let request = MediaRequest {
            job_id: ctx.job_id,
            kind: K::KIND,
            payload: serde_json::to_value(&payload)
                .map_err(|e| ProcessError::InvalidPayload(e.to_string()))?,
        };
        let raw = self.backend.run(request, progress).await?;
        let output: MediaOutput = serde_json::from_value(raw)
            .map_err(|e| ProcessError::Backend(format!("unreadable result: {}", e)))?;

        if output.assets.is_empty() && !output.failures.is_empty() {
            return Err(ProcessError::Failed(output.failures.join("; ")));
        }
        Ok(output)
    }
}

// ============================================================================
// Validation helpers
// ============================================================================

fn invalid(message: impl Into<String>) -> ValidationResult {
    Err(DomainError::Validation(message.into()))
}

pub(crate) fn require_text(field: &str, value: &str, max_len: usize) -> ValidationResult {
    if value.trim().is_empty() {
        return invalid(format!("{} must not be empty", field));
    }
    if value.chars().count() > max_len {
        return invalid(format!("{} exceeds {} characters", field, max_len));
    }
    Ok(())
}

/// Multiple of 8 within 64..=2048
pub(crate) fn check_dimension(field: &str, value: u32) -> ValidationResult {
    if !(64..=2048).contains(&value) || value % 8 != 0 {
        return invalid(format!(
            "{} must be a multiple of 8 between 64 and 2048, got {}",
            field, value
        ));
    }
    Ok(())
}

pub(crate) fn check_steps(steps: Option<u32>) -> ValidationResult {
    match steps {
        Some(s) if !(1..=200).contains(&s) => invalid(format!("steps must be between 1 and 200, got {}", s)),
        _ => Ok(()),
    }
}

pub(crate) fn check_count(field: &str, value: u32, max: u32) -> ValidationResult {
    if value < 1 || value > max {
        return invalid(format!("{} must be between 1 and {}, got {}", field, max, value));
    }
    Ok(())
}

pub(crate) fn check_http_url(field: &str, value: &str) -> ValidationResult {
    let lower = value.trim().to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() => Ok(()),
        _ => invalid(format!("{} must be an http(s) URL", field)),
    }
}

pub(crate) fn check_filename(field: &str, value: &str) -> ValidationResult {
    require_text(field, value, 255)?;
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return invalid(format!("{} must be a plain file name", field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobStatus;
    use crate::port::processor::mocks::RecordingSink;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct FakeBackend {
        response: Value,
        requests: Mutex<Vec<MediaRequest>>,
    }

    #[async_trait]
    impl MediaBackend for FakeBackend {
        async fn run(&self, request: MediaRequest, progress: ProgressReporter) -> Result<Value, ProcessError> {
            progress.report(JobStatus::LoadingResource, 5.0).await;
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }

        fn loaded_resource(&self, kind: JobKind) -> Option<String> {
            (kind == JobKind::Image).then(|| "flux-schnell".to_string())
        }
    }

    fn ctx() -> JobContext {
        JobContext {
            job_id: "j1".into(),
            kind: JobKind::Image,
            session_id: None,
            attempt: 1,
        }
    }

    fn image_payload() -> ImagePayload {
        serde_json::from_value(json!({"prompt": "a red fox"})).unwrap()
    }

    #[tokio::test]
    async fn test_media_processor_round_trips_through_backend() {
        let backend = Arc::new(FakeBackend {
            response: json!({"assets": [{"asset_id": "a1", "url": "/assets/a1.png", "seed": 7}]}),
            requests: Mutex::new(Vec::new()),
        });
        let processor = MediaProcessor::<ImageKind>::new(backend.clone());
        let sink = Arc::new(RecordingSink::default());

        let output = processor
            .process(ctx(), image_payload(), ProgressReporter::new("j1", sink.clone()))
            .await
            .unwrap();

        assert_eq!(output.assets[0].seed, Some(7));
        assert_eq!(sink.updates()[0].status, Some(JobStatus::LoadingResource));
        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].kind, JobKind::Image);
        assert_eq!(requests[0].payload["prompt"], "a red fox");
        assert_eq!(processor.loaded_resource().as_deref(), Some("flux-schnell"));
    }

    #[tokio::test]
    async fn test_all_items_failed_is_an_error() {
        let backend = Arc::new(FakeBackend {
            response: json!({"assets": [], "failures": ["prompt 1: NSFW filter", "prompt 2: OOM"]}),
            requests: Mutex::new(Vec::new()),
        });
        let processor = MediaProcessor::<ImageKind>::new(backend);
        let err = processor
            .process(ctx(), image_payload(), ProgressReporter::noop("j1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "prompt 1: NSFW filter; prompt 2: OOM");
    }

    #[tokio::test]
    async fn test_unreadable_backend_result() {
        let backend = Arc::new(FakeBackend {
            response: json!({"assets": "nope"}),
            requests: Mutex::new(Vec::new()),
        });
        let processor = MediaProcessor::<ImageKind>::new(backend);
        let err = processor
            .process(ctx(), image_payload(), ProgressReporter::noop("j1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Backend(_)));
    }

    #[test]
    fn test_validation_helpers() {
        assert!(check_dimension("width", 512).is_ok());
        assert!(check_dimension("width", 500).is_err());
        assert!(check_dimension("width", 4096).is_err());
        assert!(check_steps(None).is_ok());
        assert!(check_steps(Some(0)).is_err());
        assert!(check_http_url("url", "https://civitai.com/api/download/1").is_ok());
        assert!(check_http_url("url", "file:///etc/passwd").is_err());
        assert!(check_filename("filename", "model.safetensors").is_ok());
        assert!(check_filename("filename", "../model.safetensors").is_err());
        assert!(require_text("prompt", "   ", 10).is_err());
    }
}
