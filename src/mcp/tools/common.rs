//! Common utilities for MCP tools.

use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

/// Error result for tool failures
pub fn tool_error(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

/// Pretty-printed JSON success result.
pub fn json_result<T: Serialize>(value: &T) -> CallToolResult {
    match serde_json::to_string_pretty(value) {
        Ok(text) => CallToolResult::success(vec![Content::text(text)]),
        Err(e) => tool_error(format!("Error: could not serialize result: {}", e)),
    }
}

/// Reject blank identifiers before they reach the engine.
pub fn require_non_empty(name: &str, value: &str) -> Result<(), CallToolResult> {
    if value.trim().is_empty() {
        return Err(tool_error(format!("Error: {} must not be empty", name)));
    }
    Ok(())
}
