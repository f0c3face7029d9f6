// Port Layer - Interfaces for external collaborators

pub mod id_provider; // For deterministic testing
pub mod media_backend;
pub mod processor;
pub mod snapshot_store;
pub mod system_probe;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use media_backend::{MediaBackend, MediaRequest};
pub use processor::{
    JobContext, ProcessError, Processor, ProgressReporter, ProgressSink, ProgressUpdate, Workload,
};
pub use snapshot_store::SnapshotStore;
pub use system_probe::{ResourceSnapshot, SystemProbe};
pub use time_provider::TimeProvider;
