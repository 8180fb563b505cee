//! Failure recovery: bounded retries and file checkpoints.

mod checkpoint;
mod retry;

pub use checkpoint::{CheckpointError, CheckpointStore, RollbackReport};
pub use retry::{HelpRequest, Outcome, RetryExecutor, RetryReport};
