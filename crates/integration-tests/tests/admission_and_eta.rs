//! Admission gate and ETA integration tests
//!
//! Real media kinds behind a stub backend; resources from the mock probe.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiln_api_rpc::error::code;
use kiln_api_rpc::rate_limiter::RateLimiter;
use kiln_api_rpc::types::SubmitRequest;
use kiln_api_rpc::RpcHandler;
use kiln_core::application::{
    shutdown_channel, EngineContext, EtaEstimator, GateConfig, JobFilter, JobRegistry, Orchestrator,
    OrchestratorConfig, Rejection, ResourceGate, ShutdownSender,
};
use kiln_core::domain::{JobKind, JobStatus};
use kiln_core::kinds::{ImageKind, ImagePayload, MediaProcessor, VideoKind};
use kiln_core::port::id_provider::mocks::SequentialIdProvider;
use kiln_core::port::snapshot_store::mocks::MemorySnapshotStore;
use kiln_core::port::system_probe::mocks::MockSystemProbe;
use kiln_core::port::time_provider::SystemTimeProvider;
use kiln_core::port::{MediaBackend, MediaRequest, ProcessError, ProgressReporter};
use serde_json::{json, Value};

/// Backend that reports halfway, pauses, then returns one asset
struct StubBackend {
    loaded: Mutex<Option<String>>,
    pause: Duration,
}

impl StubBackend {
    fn holding(model: Option<&str>, pause: Duration) -> Self {
        Self {
            loaded: Mutex::new(model.map(str::to_string)),
            pause,
        }
    }
}

#[async_trait]
impl MediaBackend for StubBackend {
    async fn run(&self, request: MediaRequest, progress: ProgressReporter) -> Result<Value, ProcessError> {
        progress.message(50.0, "image 1/2").await;
        tokio::time::sleep(self.pause).await;
        if let Some(model) = request.payload["model"].as_str() {
            *self.loaded.lock().unwrap() = Some(model.to_string());
        }
        Ok(json!({
            "assets": [{"asset_id": "a1", "url": "/outputs/a1.png", "seed": 7}],
        }))
    }

    fn loaded_resource(&self, _kind: JobKind) -> Option<String> {
        self.loaded.lock().unwrap().clone()
    }
}

fn context() -> EngineContext {
    EngineContext {
        snapshots: Arc::new(MemorySnapshotStore::new()),
        clock: Arc::new(SystemTimeProvider),
        ids: Arc::new(SequentialIdProvider::new("job")),
        estimator: Arc::new(EtaEstimator::default()),
    }
}

fn image_payload(model: &str, steps: u32, num_images: u32) -> ImagePayload {
    serde_json::from_value(json!({
        "prompt": "a lighthouse at dusk",
        "model": model,
        "steps": steps,
        "num_images": num_images,
    }))
    .unwrap()
}

#[tokio::test]
async fn test_eta_includes_model_load_only_when_needed() {
    let (_tx, token) = shutdown_channel();
    let backend = Arc::new(StubBackend::holding(Some("flux-schnell"), Duration::from_millis(10)));
    let orch = Orchestrator::start(
        MediaProcessor::<ImageKind>::new(backend),
        context(),
        OrchestratorConfig::default(),
        token,
    )
    .await;

    // flux-dev base 45s, doubled steps, two images, plus 30s load
    let cold = orch.submit(image_payload("flux-dev", 40, 2), None).await.unwrap();
    assert_eq!(cold.estimated_seconds, 210.0);
    assert_eq!(cold.eta_seconds, 210.0);

    for _ in 0..200 {
        if orch.get(&cold.id).await.unwrap().is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let warm = orch.submit(image_payload("flux-dev", 40, 2), None).await.unwrap();
    assert_eq!(warm.estimated_seconds, 180.0);

    // unknown model falls back to the kind's base time
    let other = orch.submit(image_payload("my-finetune", 20, 1), None).await.unwrap();
    assert_eq!(other.estimated_seconds, 60.0);
}

#[tokio::test]
async fn test_eta_tracks_progress_and_zeroes_at_end() {
    let (_tx, token) = shutdown_channel();
    let backend = Arc::new(StubBackend::holding(Some("flux-schnell"), Duration::from_millis(300)));
    let orch = Orchestrator::start(
        MediaProcessor::<ImageKind>::new(backend),
        context(),
        OrchestratorConfig::default(),
        token,
    )
    .await;

    let job = orch.submit(image_payload("flux-schnell", 20, 1), None).await.unwrap();
    assert_eq!(job.estimated_seconds, 30.0);

    let mut halfway = None;
    for _ in 0..100 {
        let seen = orch.get(&job.id).await.unwrap();
        if seen.progress >= 50.0 && !seen.is_terminal() {
            halfway = Some(seen);
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let halfway = halfway.expect("never observed the halfway report");
    assert_eq!(halfway.eta_seconds, 15.0);
    assert_eq!(halfway.progress_message.as_deref(), Some("image 1/2"));

    let mut done = orch.get(&job.id).await.unwrap();
    for _ in 0..200 {
        if done.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        done = orch.get(&job.id).await.unwrap();
    }
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.eta_seconds, 0.0);
    assert_eq!(done.result.unwrap().assets[0].asset_id, "a1");
}

#[tokio::test]
async fn test_gate_checks_in_priority_order() {
    let probe = Arc::new(MockSystemProbe::idle());
    let gate = ResourceGate::new(probe.clone(), GateConfig::default());

    // 64GB host: 20 + 5 overhead + 3.2 buffer = 28.2 needed
    let ok = gate.check_admission(20.0, "cogvideox-5b").await;
    assert!(ok.admitted);
    assert!((ok.required_memory_gb - 28.2).abs() < 1e-9);

    probe.set_cpu_percent(95.0);
    let cpu = gate.check_admission(20.0, "cogvideox-5b").await;
    assert_eq!(cpu.rejection, Some(Rejection::CpuBusy));

    probe.set_gpu_utilization(Some(85.0));
    let gpu = gate.check_admission(20.0, "cogvideox-5b").await;
    assert_eq!(gpu.rejection, Some(Rejection::GpuBusy));
    assert_eq!(
        gpu.reason.as_deref(),
        Some("GPU is busy (85% utilization). Please wait for the current task to complete.")
    );

    probe.set_available_memory(10.0);
    let memory = gate.check_admission(20.0, "cogvideox-5b").await;
    assert_eq!(memory.rejection, Some(Rejection::InsufficientMemory));
    assert!(memory.reason.unwrap().starts_with("Insufficient memory: 10.0GB available, need 28.2GB for cogvideox-5b"));
}

#[tokio::test]
async fn test_unknown_gpu_is_not_a_rejection() {
    let probe = Arc::new(MockSystemProbe::idle());
    probe.set_gpu_utilization(None);
    let gate = ResourceGate::new(probe, GateConfig::default());
    assert!(gate.check_admission(20.0, "wan2.1-i2v").await.admitted);
}

async fn video_handler(probe: Arc<MockSystemProbe>) -> (ShutdownSender, Arc<JobRegistry>, RpcHandler) {
    let (tx, token) = shutdown_channel();
    let backend = Arc::new(StubBackend::holding(None, Duration::from_millis(10)));
    let mut registry = JobRegistry::new();
    registry.register(
        Orchestrator::start(
            MediaProcessor::<VideoKind>::new(backend),
            context(),
            OrchestratorConfig::default(),
            token,
        )
        .await,
    );
    let registry = Arc::new(registry);
    let gate = Arc::new(ResourceGate::new(probe, GateConfig::default()));
    let handler = RpcHandler::new(registry.clone(), gate, RateLimiter::new(100, 100));
    (tx, registry, handler)
}

/// A rejected heavy job never reaches the store
#[tokio::test]
async fn test_rejected_video_submission_creates_no_job() {
    let probe = Arc::new(MockSystemProbe::idle());
    let (_tx, registry, handler) = video_handler(probe.clone()).await;

    let request = SubmitRequest {
        kind: JobKind::Video,
        payload: json!({"prompt": "waves", "model": "cogvideox-5b", "model_size_gb": 60.0}),
        session_id: None,
    };
    let err = handler.submit(request).await.unwrap_err();
    assert_eq!(err.code(), code::ADMISSION_REJECTED);
    assert!(err.message().contains("cogvideox-5b"));
    assert!(registry.list(&JobFilter::default()).await.unwrap().is_empty());

    let admitted = handler
        .submit(SubmitRequest {
            kind: JobKind::Video,
            payload: json!({"prompt": "waves", "model": "cogvideox-2b", "model_size_gb": 12.0}),
            session_id: Some("clip".into()),
        })
        .await
        .unwrap();
    assert!(admitted.admission.unwrap().admitted);
    assert_eq!(admitted.job.session_id.as_deref(), Some("clip"));
}
