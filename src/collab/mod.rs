//! External collaborators: text generation and the sandboxed toolkit.

mod generation;
mod http;
mod sandbox;
mod toolkit;

pub use generation::{GenerationResult, Generator, HttpGenerator};
pub use sandbox::{confine, is_writable_extension, normalize, SandboxToolkit, MAX_FILE_SIZE};
pub use toolkit::{DetectedIssue, PackageManager, Severity, Toolkit};
