//! MCP tool implementations.

mod checkpoints;
mod common;
mod impact;
mod session;

pub use checkpoints::{list_checkpoints, rollback_checkpoint};
pub use impact::analyze_impact;
pub use session::{get_generated_files, get_session_status, get_tasks, process_message, reset_session};
