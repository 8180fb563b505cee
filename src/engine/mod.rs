//! Conversation orchestration.
//!
//! A request moves through up to eight phases: analysis, research,
//! clarification, prompt construction, plan confirmation, execution,
//! verification and delivery. Which phases run is decided by the workflow
//! chosen for the classified intent.

mod clarify;
mod deliver;
mod execute;
mod plan;
mod prompt;
mod research;
mod service;
mod session;
mod verify;


pub use service::{ConstructorService, EngineError, MessageResult};
