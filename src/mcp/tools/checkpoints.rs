//! Checkpoint tools.

use rmcp::{model::*, ErrorData as McpError};

use crate::engine::{ConstructorService, EngineError};
use crate::mcp::types::{ListCheckpointsArgs, RollbackCheckpointArgs};
use crate::recovery::CheckpointError;

use super::common::{json_result, tool_error};

pub fn list_checkpoints(
    service: &ConstructorService,
    _args: ListCheckpointsArgs,
) -> Result<CallToolResult, McpError> {
    Ok(json_result(&service.list_checkpoints()))
}

/// Restore every file recorded in a checkpoint.
pub fn rollback_checkpoint(
    service: &ConstructorService,
    args: RollbackCheckpointArgs,
) -> Result<CallToolResult, McpError> {
    match service.rollback_checkpoint(args.checkpoint_id.trim()) {
        Ok(report) if report.failed.is_empty() => Ok(json_result(&report)),
        Ok(report) => {
            // Partial restores still return the report so the client sees what failed.
            let mut result = json_result(&report);
            result.is_error = Some(true);
            Ok(result)
        }
        Err(EngineError::Checkpoint(CheckpointError::NotFound(id))) => {
            Ok(tool_error(format!("Error: checkpoint {} not found", id)))
        }
        Err(e) => Ok(tool_error(format!("Error rolling back: {}", e))),
    }
}
