// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("Invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Unknown job kind: {0}")]
    UnknownKind(String),

    #[error("{0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
