//! MCP (Model Context Protocol) server implementation using rmcp.
//!
//! Exposes the constructor engine as tools over stdio: message processing,
//! session inspection, checkpoints and change-impact analysis.

mod handlers;
mod server;
mod tools;
pub mod types;

pub use handlers::run_mcp_server;
