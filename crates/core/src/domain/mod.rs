// Domain Layer - Pure job model and state machine

pub mod error;
pub mod job;
pub mod kind;
pub mod status;

// Re-exports
pub use error::DomainError;
pub use job::{Job, JobId, JobView, ProgressUpdate, SessionId, CANCELLED_MESSAGE};
pub use kind::JobKind;
pub use status::JobStatus;
