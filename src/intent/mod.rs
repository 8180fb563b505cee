//! Intent classification and request analysis.
//!
//! Classification is deterministic pattern matching over an ordered rule
//! table; analysis adds the domain context and the missing specification
//! fields that drive the research and clarification phases.

mod analysis;
mod classifier;
pub mod extract;

pub use analysis::{analyze, missing_fields, DetailLevel, DomainContext, RequestAnalysis, SpecField};
pub use classifier::{ClassificationRecord, IntentClassifier};
pub use extract::{Language, Urgency};
