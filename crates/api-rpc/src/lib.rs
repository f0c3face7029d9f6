//! JSON-RPC API Layer
//!
//! Exposes the job registry and the resource gate over JSON-RPC 2.0.

pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod server;
pub mod types;

pub use handler::RpcHandler;
pub use server::{RpcServer, RpcServerConfig};
