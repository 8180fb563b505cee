mod chat;
mod checkpoints;
mod inspect;
mod send;

pub use chat::run_chat;
pub use checkpoints::{run_checkpoints, run_rollback};
pub use inspect::{run_classify, run_impact};
pub use send::run_send;
