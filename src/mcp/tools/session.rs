//! Conversation and session tools.

use rmcp::{model::*, ErrorData as McpError};

use crate::engine::ConstructorService;
use crate::mcp::types::{ProcessMessageArgs, UserArgs};

use super::common::{json_result, require_non_empty, tool_error};

/// Feed one message into the user's conversation.
pub async fn process_message(
    service: &ConstructorService,
    args: ProcessMessageArgs,
) -> Result<CallToolResult, McpError> {
    if let Err(e) = require_non_empty("user_id", &args.user_id) {
        return Ok(e);
    }
    let result = service.process_message(&args.user_id, &args.message).await;
    // Engine failures are part of the payload so clients can show needsHelp.
    Ok(json_result(&result))
}

pub async fn get_session_status(
    service: &ConstructorService,
    args: UserArgs,
) -> Result<CallToolResult, McpError> {
    match service.get_session_status(&args.user_id).await {
        Some(status) => Ok(json_result(&status)),
        None => Ok(tool_error(format!(
            "Error: no session for user {}",
            args.user_id
        ))),
    }
}

pub async fn reset_session(
    service: &ConstructorService,
    args: UserArgs,
) -> Result<CallToolResult, McpError> {
    if let Err(e) = require_non_empty("user_id", &args.user_id) {
        return Ok(e);
    }
    let snapshot = service.reset_session(&args.user_id).await;
    Ok(json_result(&snapshot))
}

pub async fn get_generated_files(
    service: &ConstructorService,
    args: UserArgs,
) -> Result<CallToolResult, McpError> {
    let files = service.get_generated_files(&args.user_id).await;
    Ok(json_result(&files))
}

pub fn get_tasks(service: &ConstructorService, args: UserArgs) -> Result<CallToolResult, McpError> {
    Ok(json_result(&service.get_tasks(&args.user_id)))
}
