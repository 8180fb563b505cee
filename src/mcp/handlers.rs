//! MCP server startup. The engine itself is built in main.rs.

use anyhow::{anyhow, Result};
use rmcp::{transport::stdio, ServiceExt};
use std::sync::Arc;
use tracing::{error, info};

use crate::engine::ConstructorService;

use super::server::ConstructorMcpServer;

/// Serve the engine over stdio until the client disconnects.
pub async fn run_mcp_server(service: Arc<ConstructorService>) -> Result<()> {
    info!("🔧 Starting Constructor MCP server (stdio, rmcp)");

    let server = ConstructorMcpServer::new(service);
    let running = server.serve(stdio()).await.map_err(|e| {
        error!("Failed to start MCP service: {:?}", e);
        anyhow!("Failed to start MCP service: {:?}", e)
    })?;
    info!("🔗 Ready for MCP client connections");

    let reason = running.waiting().await.map_err(|e| {
        error!("MCP service error: {:?}", e);
        anyhow!("MCP service error: {:?}", e)
    })?;

    info!("MCP server shutting down ({:?})", reason);
    Ok(())
}
