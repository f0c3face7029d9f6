//! Kiln Daemon - Main Entry Point
//! Wires one orchestrator per job kind behind the JSON-RPC API

mod config;
mod logging;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use kiln_api_rpc::rate_limiter::RateLimiter;
use kiln_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use kiln_core::application::{
    shutdown_channel, EngineContext, EtaEstimator, JobRegistry, MaintenanceScheduler, Orchestrator,
    OrchestratorConfig, ResourceGate, ShutdownToken,
};
use kiln_core::kinds::{BulkKind, I2vKind, ImageKind, MediaProcessor, UpscaleKind, VideoKind, WorkflowKind};
use kiln_core::port::id_provider::UuidProvider;
use kiln_core::port::time_provider::SystemTimeProvider;
use kiln_core::port::{MediaBackend, Processor};
use kiln_infra_fs::JsonFileSnapshotStore;
use kiln_infra_system::{DisabledBackend, HttpDownloader, RunnerConfig, SubprocessBackend, SystemProbeImpl};

use crate::config::Settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (logging depends on log_dir)
    let settings = Settings::load()?;

    // 2. Initialize logging
    let _log_guard = logging::init(settings.log_dir().as_deref())?;

    info!("Kiln daemon v{} starting...", VERSION);

    // 3. Snapshot storage
    let data_dir = settings.data_dir();
    info!(data_dir = %data_dir.display(), "Opening job snapshots...");
    let snapshots = JsonFileSnapshotStore::new(&data_dir)
        .await
        .with_context(|| format!("Failed to open data dir {}", data_dir.display()))?;

    // 4. Setup dependencies (DI wiring)
    let ctx = EngineContext {
        snapshots: Arc::new(snapshots),
        clock: Arc::new(SystemTimeProvider),
        ids: Arc::new(UuidProvider),
        estimator: Arc::new(EtaEstimator::default()),
    };
    let orchestrator_config = OrchestratorConfig {
        retention: settings.retention(),
        device_slot: settings
            .shared_device_slot
            .then(|| Arc::new(Semaphore::new(1))),
    };

    let backend: Arc<dyn MediaBackend> = match &settings.media_runner {
        Some(program) => {
            let mut runner = RunnerConfig::new(shellexpand::tilde(program).into_owned());
            runner.args = settings.media_runner_args.clone();
            runner.timeout = settings.media_runner_timeout_secs.map(Duration::from_secs);
            info!(runner = %runner.program, "Media runner configured");
            Arc::new(SubprocessBackend::new(runner))
        }
        None => {
            warn!("No media_runner configured; media jobs will fail until one is set");
            Arc::new(DisabledBackend)
        }
    };

    // 5. Start one orchestrator per kind (recovery runs inside start)
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut registry = JobRegistry::new();
    let kinds = KindStarter {
        ctx: &ctx,
        config: &orchestrator_config,
        shutdown: &shutdown_rx,
    };
    kinds.start(&mut registry, MediaProcessor::<ImageKind>::new(backend.clone())).await;
    kinds.start(&mut registry, MediaProcessor::<VideoKind>::new(backend.clone())).await;
    kinds.start(&mut registry, MediaProcessor::<I2vKind>::new(backend.clone())).await;
    kinds.start(&mut registry, MediaProcessor::<UpscaleKind>::new(backend.clone())).await;
    kinds.start(&mut registry, MediaProcessor::<BulkKind>::new(backend.clone())).await;
    kinds.start(&mut registry, MediaProcessor::<WorkflowKind>::new(backend)).await;
    kinds.start(&mut registry, HttpDownloader::new(settings.download_dir())).await;
    let registry = Arc::new(registry);

    // 6. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let gate = Arc::new(ResourceGate::new(Arc::new(SystemProbeImpl::new()), settings.gate()));
    let handler = Arc::new(RpcHandler::new(
        registry.clone(),
        gate,
        RateLimiter::new(settings.rate_limit_burst, settings.rate_limit_rate),
    ));
    let rpc_config = RpcServerConfig {
        host: settings.rpc_host.clone(),
        port: settings.rpc_port,
    };
    let rpc_handle = RpcServer::new(rpc_config, handler)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    // 7. Start Maintenance Scheduler
    info!("Starting maintenance scheduler...");
    let maintenance = MaintenanceScheduler::new(registry.clone(), settings.maintenance_interval());
    let maintenance_handle = tokio::spawn(maintenance.run(shutdown_rx.clone()));

    info!(kinds = registry.kinds().len(), "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown: stop intake, then let workers finish their current job
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        registry.join_all().await;
        let _ = maintenance_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Workers still busy; in-flight jobs will be recovered on next start"
        );
    }

    info!("Shutdown complete.");

    Ok(())
}

/// Shared arguments for starting each kind's orchestrator
struct KindStarter<'a> {
    ctx: &'a EngineContext,
    config: &'a OrchestratorConfig,
    shutdown: &'a ShutdownToken,
}

impl KindStarter<'_> {
    async fn start<P: Processor>(&self, registry: &mut JobRegistry, processor: P) {
        let orchestrator = Orchestrator::start(
            processor,
            self.ctx.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        )
        .await;
        info!(
            kind = %orchestrator.kind(),
            queue_depth = orchestrator.queue_depth(),
            "Orchestrator started"
        );
        registry.register(orchestrator);
    }
}
