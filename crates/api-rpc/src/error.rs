//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use jsonrpsee::types::ErrorObjectOwned;
use kiln_core::application::AdmissionDecision;
use kiln_core::domain::DomainError;
use kiln_core::error::AppError;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const THROTTLED: i32 = 4003;
    pub const ADMISSION_REJECTED: i32 = 4004;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const PERSISTENCE_ERROR: i32 = 5001;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::Conflict(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        AppError::Persistence(msg) => {
            ErrorObjectOwned::owned(code::PERSISTENCE_ERROR, msg, None::<()>)
        }
        AppError::Domain(DomainError::Validation(msg)) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::Domain(e) => ErrorObjectOwned::owned(code::CONFLICT, e.to_string(), None::<()>),
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::Internal(msg) => {
            ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>)
        }
    }
}

/// Rejected admission, with the full decision attached as error data
pub fn admission_error(decision: &AdmissionDecision) -> ErrorObjectOwned {
    let message = decision
        .reason
        .clone()
        .unwrap_or_else(|| "Admission rejected".to_string());
    ErrorObjectOwned::owned(code::ADMISSION_REJECTED, message, Some(decision))
}

pub fn throttled() -> ErrorObjectOwned {
    ErrorObjectOwned::owned(
        code::THROTTLED,
        "Rate limit exceeded. Please slow down.",
        None::<()>,
    )
}
