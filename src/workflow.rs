//! Static workflow catalog.
//!
//! Maps every intent type to an ordered template of steps. Deciding a
//! workflow always hands out a fresh copy, so a running workflow can never
//! change the catalog.

use crate::domain::{Intent, IntentType, Workflow, WorkflowStep};

use WorkflowStep::*;

const CREATE: &[WorkflowStep] = &[
    UnderstandProject,
    Research,
    Clarify,
    PlanChanges,
    CreateCheckpoint,
    CreateFiles,
    InstallDependencies,
    Verify,
    Deliver,
];

const MODIFY: &[WorkflowStep] = &[
    UnderstandProject,
    ReadTarget,
    AnalyzeImpact,
    PlanChanges,
    CreateCheckpoint,
    EditFiles,
    Verify,
    Deliver,
];

const DEBUG: &[WorkflowStep] = &[
    UnderstandProject,
    ReadTarget,
    RunDiagnostics,
    PlanChanges,
    CreateCheckpoint,
    EditFiles,
    Verify,
    Deliver,
];

const EXPLAIN: &[WorkflowStep] = &[ReadTarget, Answer, Deliver];

const QUESTION: &[WorkflowStep] = &[Answer, Deliver];

const DEPLOY: &[WorkflowStep] = &[
    UnderstandProject,
    RunDiagnostics,
    PlanChanges,
    CreateCheckpoint,
    CreateFiles,
    Verify,
    Deliver,
];

const AMBIGUOUS: &[WorkflowStep] = &[Clarify];

pub struct WorkflowCatalog;

impl WorkflowCatalog {
    /// Template for an intent type.
    pub fn template(intent_type: IntentType) -> &'static [WorkflowStep] {
        match intent_type {
            IntentType::CreateLanding
            | IntentType::CreateWebApp
            | IntentType::CreateBot
            | IntentType::CreateApi => CREATE,
            IntentType::ModifyExisting => MODIFY,
            IntentType::DebugFix => DEBUG,
            IntentType::Explain => EXPLAIN,
            IntentType::Question => QUESTION,
            IntentType::Deploy => DEPLOY,
            IntentType::Ambiguous => AMBIGUOUS,
        }
    }

    /// Fresh workflow for `intent`, cursor at step 0.
    pub fn decide_workflow(intent: &Intent) -> Workflow {
        Workflow::new(
            intent.intent_type.as_str(),
            Self::template(intent.intent_type).to_vec(),
        )
    }
}
