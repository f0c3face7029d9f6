// Application Layer - the generic job engine

pub mod eta;
pub mod gate;
pub mod maintenance;
pub mod orchestrator;
pub mod queue;
pub mod registry;
pub mod store;
pub mod worker;

// Re-exports
pub use eta::{EtaEstimator, KindProfile};
pub use gate::{evaluate, AdmissionDecision, GateConfig, Rejection, ResourceGate};
pub use maintenance::MaintenanceScheduler;
pub use orchestrator::{EngineContext, KindJob, Orchestrator, OrchestratorConfig};
pub use queue::JobQueue;
pub use registry::{JobFilter, JobRegistry, JobService};
pub use store::{JobStore, KindStats, LoadReport};
pub use worker::{shutdown_channel, CurrentJob, ShutdownSender, ShutdownToken, Worker};
