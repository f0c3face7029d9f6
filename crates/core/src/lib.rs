// Kiln Core - Domain Logic, Ports & the generic job engine
// NO infrastructure dependencies: files, system probes and RPC live in adapter crates

pub mod application;
pub mod domain;
pub mod error;
pub mod kinds;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
