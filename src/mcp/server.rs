//! MCP server implementation.
//!
//! This module contains the ConstructorMcpServer struct and its tool routing.

use rmcp::{
    handler::server::router::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::engine::ConstructorService;

use super::tools;
use super::types::*;

/// Constructor MCP Server
#[derive(Clone)]
pub struct ConstructorMcpServer {
    service: Arc<ConstructorService>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ConstructorMcpServer {
    pub fn new(service: Arc<ConstructorService>) -> Self {
        Self {
            service,
            tool_router: Self::tool_router(),
        }
    }

    /// Process one message in the user's conversation
    #[tool(
        name = "process_message",
        description = "Send a message to the AI constructor. A new request is classified and planned; clarification questions and the execution plan come back with awaitingInput=true and are answered by sending another message (answer the questions, or reply yes / no / what to adjust to the plan). Returns phase, response text, plan, written files, verification and, when execution failed after retries, a needsHelp payload."
    )]
    async fn process_message(
        &self,
        Parameters(args): Parameters<ProcessMessageArgs>,
    ) -> Result<CallToolResult, McpError> {
        let start_time = Instant::now();
        let result = tools::process_message(&self.service, args).await;
        debug!(
            "process_message finished in {} ms",
            start_time.elapsed().as_millis()
        );
        result
    }

    #[tool(
        name = "get_session_status",
        description = "Get the user's session: current phase, intent, workflow, pending questions, plan, tasks and the phase flow log."
    )]
    async fn get_session_status(
        &self,
        Parameters(args): Parameters<UserArgs>,
    ) -> Result<CallToolResult, McpError> {
        tools::get_session_status(&self.service, args).await
    }

    #[tool(
        name = "reset_session",
        description = "Discard the user's conversation and start a fresh session."
    )]
    async fn reset_session(
        &self,
        Parameters(args): Parameters<UserArgs>,
    ) -> Result<CallToolResult, McpError> {
        tools::reset_session(&self.service, args).await
    }

    #[tool(
        name = "get_generated_files",
        description = "Get the files generated for the user's last request, keyed by file name."
    )]
    async fn get_generated_files(
        &self,
        Parameters(args): Parameters<UserArgs>,
    ) -> Result<CallToolResult, McpError> {
        tools::get_generated_files(&self.service, args).await
    }

    #[tool(
        name = "get_tasks",
        description = "Get the user's task list with per-task status and a summary. Safe to poll while a message is being processed."
    )]
    fn get_tasks(&self, Parameters(args): Parameters<UserArgs>) -> Result<CallToolResult, McpError> {
        tools::get_tasks(&self.service, args)
    }

    #[tool(
        name = "list_checkpoints",
        description = "List the retained file checkpoints, newest last."
    )]
    fn list_checkpoints(
        &self,
        Parameters(args): Parameters<ListCheckpointsArgs>,
    ) -> Result<CallToolResult, McpError> {
        tools::list_checkpoints(&self.service, args)
    }

    #[tool(
        name = "rollback_checkpoint",
        description = "Restore every file recorded in a checkpoint. Reports restored files and per-file failures."
    )]
    fn rollback_checkpoint(
        &self,
        Parameters(args): Parameters<RollbackCheckpointArgs>,
    ) -> Result<CallToolResult, McpError> {
        tools::rollback_checkpoint(&self.service, args)
    }

    #[tool(
        name = "analyze_impact",
        description = "Estimate the impact of changing a file: importers, symbol usages, related tests, breaking-change hints and a risk level."
    )]
    fn analyze_impact(
        &self,
        Parameters(args): Parameters<AnalyzeImpactArgs>,
    ) -> Result<CallToolResult, McpError> {
        tools::analyze_impact(&self.service, args)
    }
}

#[tool_handler]
impl ServerHandler for ConstructorMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "constructor".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Constructor turns natural-language requests into files in the workspace. Drive a conversation with process_message and inspect it with the session, task and checkpoint tools."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{GenerationResult, Generator, SandboxToolkit};
    use crate::config::EngineConfig;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Unavailable;

    #[async_trait]
    impl Generator for Unavailable {
        async fn generate(&self, _user_id: &str, _prompt: &str) -> Result<GenerationResult> {
            Ok(GenerationResult::failed("offline"))
        }
    }

    fn server(workspace: &TempDir, data: &TempDir) -> ConstructorMcpServer {
        let mut config = EngineConfig::with_dirs(workspace.path(), data.path());
        config.backoff_unit = Duration::ZERO;
        let toolkit = SandboxToolkit::new(workspace.path(), Duration::from_secs(5)).unwrap();
        let service =
            ConstructorService::new(config, Arc::new(Unavailable), Arc::new(toolkit)).unwrap();
        ConstructorMcpServer::new(Arc::new(service))
    }

    fn text(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_server_info() {
        let (ws, data) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let info = server(&ws, &data).get_info();
        assert_eq!(info.server_info.name, "constructor");
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_process_message_returns_json() {
        let (ws, data) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let server = server(&ws, &data);
        let result = server
            .process_message(Parameters(ProcessMessageArgs {
                user_id: "u1".to_string(),
                message: "Necesito crear una landing page para mi restaurante".to_string(),
            }))
            .await
            .unwrap();
        assert_ne!(result.is_error, Some(true));

        let value: serde_json::Value = serde_json::from_str(&text(&result)).unwrap();
        assert_eq!(value["awaitingInput"], true);
        assert_eq!(value["phaseName"], "clarification");
    }

    #[tokio::test]
    async fn test_unknown_session_and_checkpoint_are_errors() {
        let (ws, data) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let server = server(&ws, &data);

        let status = server
            .get_session_status(Parameters(UserArgs {
                user_id: "nobody".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(status.is_error, Some(true));

        let rollback = server
            .rollback_checkpoint(Parameters(RollbackCheckpointArgs {
                checkpoint_id: "cp_missing".to_string(),
            }))
            .unwrap();
        assert_eq!(rollback.is_error, Some(true));
        assert!(text(&rollback).contains("not found"));
    }

    #[test]
    fn test_blank_file_path_is_rejected() {
        let (ws, data) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let result = server(&ws, &data)
            .analyze_impact(Parameters(AnalyzeImpactArgs {
                file_path: "  ".to_string(),
                change_description: String::new(),
            }))
            .unwrap();
        assert_eq!(result.is_error, Some(true));
    }
}
