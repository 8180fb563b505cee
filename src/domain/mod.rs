//! Domain types shared across modules.
//!
//! This module contains data structures that are used by multiple
//! parts of the engine (classifier, workflow, validator, recovery, MCP tools).
//! Keeping them here avoids circular dependencies between modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Category of a user request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    CreateLanding,
    CreateWebApp,
    CreateBot,
    CreateApi,
    ModifyExisting,
    DebugFix,
    Explain,
    Question,
    Deploy,
    Ambiguous,
}

impl IntentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::CreateLanding => "create_landing",
            IntentType::CreateWebApp => "create_web_app",
            IntentType::CreateBot => "create_bot",
            IntentType::CreateApi => "create_api",
            IntentType::ModifyExisting => "modify_existing",
            IntentType::DebugFix => "debug_fix",
            IntentType::Explain => "explain",
            IntentType::Question => "question",
            IntentType::Deploy => "deploy",
            IntentType::Ambiguous => "ambiguous",
        }
    }

    /// Intents that produce new files from scratch.
    pub fn is_creation(&self) -> bool {
        matches!(
            self,
            IntentType::CreateLanding
                | IntentType::CreateWebApp
                | IntentType::CreateBot
                | IntentType::CreateApi
        )
    }

    /// Intents that change files which already exist.
    pub fn is_modification(&self) -> bool {
        matches!(self, IntentType::ModifyExisting | IntentType::DebugFix)
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified user intent. Built once per message and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    #[serde(rename = "type")]
    pub intent_type: IntentType,
    pub confidence: f64,
    /// Ordered, de-duplicated keywords
    pub keywords: Vec<String>,
    pub target_file: Option<String>,
    pub target_function: Option<String>,
    pub original_message: String,
}

/// Named unit of work inside a decided workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    UnderstandProject,
    ReadTarget,
    RunDiagnostics,
    Research,
    Clarify,
    AnalyzeImpact,
    PlanChanges,
    CreateCheckpoint,
    CreateFiles,
    EditFiles,
    InstallDependencies,
    Answer,
    Verify,
    Deliver,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStep::UnderstandProject => "understand_project",
            WorkflowStep::ReadTarget => "read_target",
            WorkflowStep::RunDiagnostics => "run_diagnostics",
            WorkflowStep::Research => "research",
            WorkflowStep::Clarify => "clarify",
            WorkflowStep::AnalyzeImpact => "analyze_impact",
            WorkflowStep::PlanChanges => "plan_changes",
            WorkflowStep::CreateCheckpoint => "create_checkpoint",
            WorkflowStep::CreateFiles => "create_files",
            WorkflowStep::EditFiles => "edit_files",
            WorkflowStep::InstallDependencies => "install_dependencies",
            WorkflowStep::Answer => "answer",
            WorkflowStep::Verify => "verify",
            WorkflowStep::Deliver => "deliver",
        }
    }
}

/// A decided workflow: an owned copy of a catalog template plus a cursor.
///
/// Invariant: `0 <= current_step <= steps.len()`. Once the cursor reaches
/// the end the workflow is terminal and `advance` stops recording results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    pub current_step: usize,
    pub results: BTreeMap<WorkflowStep, String>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.into(),
            steps,
            current_step: 0,
            results: BTreeMap::new(),
        }
    }

    /// Step under the cursor, `None` once terminal.
    pub fn current(&self) -> Option<WorkflowStep> {
        self.steps.get(self.current_step).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.current_step >= self.steps.len()
    }

    pub fn contains(&self, step: WorkflowStep) -> bool {
        self.steps.contains(&step)
    }

    /// Record `result` for the current step and move the cursor forward.
    ///
    /// Returns `false` once the cursor has reached the end (including the
    /// call that moves it there); a terminal workflow is left untouched.
    pub fn advance(&mut self, result: impl Into<String>) -> bool {
        let Some(step) = self.current() else {
            return false;
        };
        self.results.insert(step, result.into());
        self.current_step += 1;
        self.current_step < self.steps.len()
    }

    /// Fraction of completed steps in `[0, 100]`.
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return 100;
        }
        ((self.current_step * 100) / self.steps.len()) as u8
    }
}

/// Outcome of a pre-execution check list. `valid` holds exactly when `errors` is empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub checks: BTreeMap<String, bool>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            ..Default::default()
        }
    }

    pub fn check(&mut self, name: &str, passed: bool) {
        self.checks.insert(name.to_string(), passed);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        self.valid = false;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// A bare occurrence of a symbol somewhere in the project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub file: String,
    pub line: usize,
    pub usage: String,
}

/// Estimated blast radius of a change. Always recomputed, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    pub file: String,
    pub importers: Vec<String>,
    pub usages: Vec<Usage>,
    pub tests: Vec<String>,
    pub breaking_changes: Vec<String>,
    pub risk_level: RiskLevel,
}

/// Immutable snapshot of named files. Content is raw bytes, stored as
/// base64 so binary assets survive a round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: String,
    #[serde(with = "base64_files")]
    pub files: BTreeMap<String, Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub description: String,
}

mod base64_files {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        files: &BTreeMap<String, Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        files
            .iter()
            .map(|(path, bytes)| (path.as_str(), STANDARD.encode(bytes)))
            .collect::<BTreeMap<&str, String>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Vec<u8>>, D::Error> {
        BTreeMap::<String, String>::deserialize(deserializer)?
            .into_iter()
            .map(|(path, encoded)| {
                STANDARD
                    .decode(encoded.as_bytes())
                    .map(|bytes| (path, bytes))
                    .map_err(serde::de::Error::custom)
            })
            .collect()
    }
}

/// Index entry for a live checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub files: Vec<String>,
}

impl From<&Checkpoint> for CheckpointSummary {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            id: cp.id.clone(),
            description: cp.description.clone(),
            created_at: cp.created_at,
            files: cp.files.keys().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Allowed moves: pending -> in_progress -> {completed | failed},
    /// cancelled from pending or in_progress. Terminal states never move.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::InProgress, TaskStatus::Completed)
                | (TaskStatus::InProgress, TaskStatus::Failed)
                | (TaskStatus::InProgress, TaskStatus::Cancelled)
        )
    }
}

/// A user-visible unit of progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_workflow() -> Workflow {
        Workflow::new(
            "sample",
            vec![
                WorkflowStep::PlanChanges,
                WorkflowStep::CreateFiles,
                WorkflowStep::Deliver,
            ],
        )
    }

    #[test]
    fn test_advance_returns_false_on_last_step() {
        let mut wf = sample_workflow();
        assert!(wf.advance("planned"));
        assert!(wf.advance("written"));
        assert!(!wf.advance("delivered"));
        assert_eq!(wf.current_step, wf.steps.len());
        assert!(wf.is_complete());
        assert_eq!(wf.results.len(), 3);
    }

    #[test]
    fn test_advance_on_terminal_workflow_is_noop() {
        let mut wf = sample_workflow();
        while wf.advance("ok") {}
        let before = wf.results.clone();
        assert!(!wf.advance("extra"));
        assert_eq!(wf.current_step, 3);
        assert_eq!(wf.results, before);
    }

    #[test]
    fn test_validation_result_validity_tracks_errors() {
        let mut result = ValidationResult::new();
        result.warn("style");
        assert!(result.valid);
        result.error("missing");
        assert!(!result.valid);
    }

    #[test]
    fn test_task_status_transitions() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Cancelled));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::InProgress));
    }
}
