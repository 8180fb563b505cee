//! Per-user session aggregate.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::collab::DetectedIssue;
use crate::domain::{Impact, Intent, Workflow, WorkflowStep};
use crate::intent::RequestAnalysis;

use super::execute::DependencyReport;
use super::plan::ExecutionPlan;
use super::research::ResearchNotes;
use super::verify::VerificationReport;

/// The eight pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Analysis,
    Research,
    Clarification,
    Prompt,
    Plan,
    Execution,
    Verification,
    Delivery,
}

impl Phase {
    pub fn number(&self) -> u8 {
        match self {
            Phase::Analysis => 1,
            Phase::Research => 2,
            Phase::Clarification => 3,
            Phase::Prompt => 4,
            Phase::Plan => 5,
            Phase::Execution => 6,
            Phase::Verification => 7,
            Phase::Delivery => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Phase::Analysis => "analysis",
            Phase::Research => "research",
            Phase::Clarification => "clarification",
            Phase::Prompt => "prompt",
            Phase::Plan => "plan",
            Phase::Execution => "execution",
            Phase::Verification => "verification",
            Phase::Delivery => "delivery",
        }
    }

    /// Phase a workflow step belongs to.
    pub fn of_step(step: WorkflowStep) -> Phase {
        match step {
            WorkflowStep::UnderstandProject
            | WorkflowStep::ReadTarget
            | WorkflowStep::RunDiagnostics
            | WorkflowStep::AnalyzeImpact => Phase::Analysis,
            WorkflowStep::Research => Phase::Research,
            WorkflowStep::Clarify => Phase::Clarification,
            WorkflowStep::PlanChanges => Phase::Plan,
            WorkflowStep::CreateCheckpoint
            | WorkflowStep::CreateFiles
            | WorkflowStep::EditFiles
            | WorkflowStep::InstallDependencies
            | WorkflowStep::Answer => Phase::Execution,
            WorkflowStep::Verify => Phase::Verification,
            WorkflowStep::Deliver => Phase::Delivery,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub role: &'static str,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// One user's constructor state. Replaced wholesale on reset.
#[derive(Debug, Clone)]
pub struct ConstructorSession {
    pub session_id: String,
    pub user_id: String,
    pub phase: Phase,
    pub analysis: Option<RequestAnalysis>,
    pub workflow: Option<Workflow>,
    pub research: Option<ResearchNotes>,
    /// Clarification replies and plan adjustments, in arrival order
    pub answers: Vec<String>,
    pub prompt: Option<String>,
    pub plan: Option<ExecutionPlan>,
    pub target_content: Option<String>,
    pub diagnostics: Vec<DetectedIssue>,
    pub impact: Option<Impact>,
    pub checkpoint_id: Option<String>,
    pub generated_files: BTreeMap<String, String>,
    pub written_files: Vec<String>,
    pub rejected_files: Vec<(String, String)>,
    pub dependencies: Option<DependencyReport>,
    pub answer: Option<String>,
    pub verification: Option<VerificationReport>,
    pub report: Option<String>,
    pub awaiting_clarification: bool,
    pub awaiting_confirmation: bool,
    pub pending_questions: Vec<String>,
    pub task_ids: BTreeMap<WorkflowStep, String>,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
}

impl ConstructorSession {
    pub fn new(user_id: &str) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            phase: Phase::Analysis,
            analysis: None,
            workflow: None,
            research: None,
            answers: Vec::new(),
            prompt: None,
            plan: None,
            target_content: None,
            diagnostics: Vec::new(),
            impact: None,
            checkpoint_id: None,
            generated_files: BTreeMap::new(),
            written_files: Vec::new(),
            rejected_files: Vec::new(),
            dependencies: None,
            answer: None,
            verification: None,
            report: None,
            awaiting_clarification: false,
            awaiting_confirmation: false,
            pending_questions: Vec::new(),
            task_ids: BTreeMap::new(),
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Drop everything tied to the previous request. History survives.
    pub fn begin_request(&mut self) {
        let history = std::mem::take(&mut self.history);
        let session_id = std::mem::take(&mut self.session_id);
        let created_at = self.created_at;
        let user_id = self.user_id.clone();
        *self = Self::new(&user_id);
        self.session_id = session_id;
        self.created_at = created_at;
        self.history = history;
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.analysis.as_ref().map(|a| &a.intent)
    }

    /// A request is open while its workflow still has steps left.
    pub fn has_open_request(&self) -> bool {
        self.workflow
            .as_ref()
            .map(|w| !w.is_complete())
            .unwrap_or(false)
    }

    pub fn awaiting_input(&self) -> bool {
        self.awaiting_clarification || self.awaiting_confirmation
    }

    pub fn push_history(&mut self, role: &'static str, text: &str) {
        self.history.push(HistoryEntry {
            role,
            text: text.to_string(),
            at: Utc::now(),
        });
    }

    /// Original message plus every clarification answer.
    pub fn merged_request(&self) -> String {
        let mut text = self
            .intent()
            .map(|i| i.original_message.clone())
            .unwrap_or_default();
        for answer in &self.answers {
            text.push('\n');
            text.push_str(answer);
        }
        text
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            phase: self.phase.number(),
            phase_name: self.phase.name().to_string(),
            intent: self.intent().cloned(),
            workflow: self.workflow.clone(),
            progress: self.workflow.as_ref().map(Workflow::progress).unwrap_or(0),
            awaiting_clarification: self.awaiting_clarification,
            awaiting_confirmation: self.awaiting_confirmation,
            pending_questions: self.pending_questions.clone(),
            plan: self.plan.clone(),
            checkpoint_id: self.checkpoint_id.clone(),
            generated_files: self.generated_files.keys().cloned().collect(),
            written_files: self.written_files.clone(),
            verification: self.verification.clone(),
            history_length: self.history.len(),
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a session for client polling.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub user_id: String,
    pub phase: u8,
    pub phase_name: String,
    pub intent: Option<Intent>,
    pub workflow: Option<Workflow>,
    /// Percentage of workflow steps finished
    pub progress: u8,
    pub awaiting_clarification: bool,
    pub awaiting_confirmation: bool,
    pub pending_questions: Vec<String>,
    pub plan: Option<ExecutionPlan>,
    pub checkpoint_id: Option<String>,
    pub generated_files: Vec<String>,
    pub written_files: Vec<String>,
    pub verification: Option<VerificationReport>,
    pub history_length: usize,
    pub created_at: DateTime<Utc>,
}
