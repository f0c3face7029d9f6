//! JSON-RPC Server
//!
//! Serves the job API over HTTP on a local TCP port.

use crate::handler::RpcHandler;
use crate::types::{AdmissionRequest, JobIdRequest, ListRequest, StatsRequest, SubmitRequest};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use jsonrpsee::RpcModule;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9537;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, handler: Arc<RpcHandler>) -> Self {
        Self { config, handler }
    }

    /// Build the method table
    pub fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.submit.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: SubmitRequest = params.parse()?;
                    handler.submit(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobIdRequest = params.parse()?;
                    handler.get(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.list.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: Option<ListRequest> = params.parse()?;
                    handler.list(req.unwrap_or_default()).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.cancel.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobIdRequest = params.parse()?;
                    handler.cancel(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.remove.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobIdRequest = params.parse()?;
                    handler.remove(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("system.resources.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { Ok::<_, ErrorObjectOwned>(handler.resources().await) }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("system.admission.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: AdmissionRequest = params.parse()?;
                    Ok::<_, ErrorObjectOwned>(handler.admission(req).await)
                }
            })
            .map_err(|e| e.to_string())?;

        // Admin APIs
        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |_, _, _| {
                let handler = handler.clone();
                async move { Ok::<_, ErrorObjectOwned>(handler.stats(StatsRequest::default()).await) }
            })
            .map_err(|e| e.to_string())?;

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Security: binds to the configured host, 127.0.0.1 by default (no external access)
    pub async fn start(self) -> Result<ServerHandle, String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;

        let module = self.module()?;
        let handle = server.start(module);

        info!("JSON-RPC server started successfully");
        Ok(handle)
    }
}
