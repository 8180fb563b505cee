//! MCP tool parameter types.
//!
//! These types are used with rmcp's `Parameters<T>` wrapper for automatic
//! deserialization and JSON schema generation.

use schemars::JsonSchema;
use serde::Deserialize;

/// Parameters for the process_message tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ProcessMessageArgs {
    /// Stable identifier of the user; one conversation is kept per user
    pub user_id: String,
    /// The user's message: a new request, a clarification answer or a plan reply
    pub message: String,
}

/// Parameters for tools that only need the user
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UserArgs {
    /// Identifier of the user whose session to inspect
    pub user_id: String,
}

/// Parameters for the list_checkpoints tool (no arguments needed)
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListCheckpointsArgs {}

/// Parameters for the rollback_checkpoint tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RollbackCheckpointArgs {
    /// Checkpoint id as returned by list_checkpoints
    pub checkpoint_id: String,
}

/// Parameters for the analyze_impact tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AnalyzeImpactArgs {
    /// File to change, relative to the workspace root
    pub file_path: String,
    /// What the change does, e.g. "rename function calcularTotal"
    #[serde(default)]
    pub change_description: String,
}
