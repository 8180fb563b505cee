//! Orchestration service.
//!
//! Owns every engine component and drives one session per user through its
//! decided workflow. Each `process_message` call holds its session's lock for
//! the whole call, so messages from the same user never interleave.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

use crate::collab::{DetectedIssue, Generator, Severity, Toolkit};
use crate::config::EngineConfig;
use crate::domain::{CheckpointSummary, Impact, IntentType, Task, Workflow, WorkflowStep};
use crate::flow_log::{FlowEvent, FlowLog};
use crate::impact::ChangeImpactAnalyzer;
use crate::intent::{
    analyze, missing_fields, ClassificationRecord, IntentClassifier, Language, RequestAnalysis,
};
use crate::recovery::{
    CheckpointError, CheckpointStore, HelpRequest, Outcome, RetryExecutor, RetryReport,
    RollbackReport,
};
use crate::tasks::{TaskProgressTracker, TaskSummary};
use crate::validator::{check_syntax, Action, PreExecutionValidator};
use crate::workflow::WorkflowCatalog;

use super::clarify;
use super::deliver::build_report;
use super::execute::{
    detect_dependencies, install_plan, parse_files, sanitize_files, AcceptedFile,
    DependencyReport, ParsedResponse,
};
use super::plan::{build_plan, parse_reply, step_title, ExecutionPlan, PlanReply};
use super::prompt::{build_answer_prompt, build_prompt, PromptInputs};
use super::research::research;
use super::session::{ConstructorSession, Phase, SessionSnapshot};
use super::verify::{language_of, verify, VerificationReport};

/// Outcome recorded for conditional steps that did not apply.
const SKIPPED: &str = "skipped";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("inconsistent session state: {0}")]
    InconsistentState(&'static str),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Reply to one inbound message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResult {
    pub success: bool,
    pub response: String,
    pub phase: u8,
    pub phase_name: String,
    pub awaiting_input: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub questions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub needs_help: Option<HelpRequest>,
    pub session: SessionSnapshot,
}

/// Polling view of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session: SessionSnapshot,
    pub tasks: Vec<Task>,
    pub task_summary: TaskSummary,
    pub flow: Vec<FlowEvent>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskList {
    pub tasks: Vec<Task>,
    pub summary: TaskSummary,
}

enum StepOutcome {
    /// Advance the workflow with this result
    Done(String),
    /// Return to the caller without advancing
    Stop(MessageResult),
}

#[derive(Clone)]
struct SessionEntry {
    session_id: String,
    state: Arc<AsyncMutex<ConstructorSession>>,
}

impl SessionEntry {
    fn new(user_id: &str) -> Self {
        let session = ConstructorSession::new(user_id);
        Self {
            session_id: session.session_id.clone(),
            state: Arc::new(AsyncMutex::new(session)),
        }
    }
}

pub struct ConstructorService {
    config: EngineConfig,
    classifier: Mutex<IntentClassifier>,
    validator: PreExecutionValidator,
    retry: RetryExecutor,
    checkpoints: CheckpointStore,
    impact: ChangeImpactAnalyzer,
    tasks: TaskProgressTracker,
    flow: FlowLog,
    generator: Arc<dyn Generator>,
    toolkit: Arc<dyn Toolkit>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl ConstructorService {
    pub fn new(
        config: EngineConfig,
        generator: Arc<dyn Generator>,
        toolkit: Arc<dyn Toolkit>,
    ) -> Result<Self, EngineError> {
        let checkpoints = CheckpointStore::open(
            config.checkpoint_dir(),
            toolkit.root(),
            config.checkpoint_cap,
        )?;
        let impact = ChangeImpactAnalyzer::new(toolkit.root().to_path_buf());
        let flow = FlowLog::new(config.flow_log_cap);
        if !flow.is_enabled() {
            info!("Flow log disabled");
        }
        info!(
            "Constructor engine ready (workspace {:?}, output {})",
            toolkit.root(),
            config.output_dir
        );
        Ok(Self {
            classifier: Mutex::new(IntentClassifier::with_history_cap(
                config.classifier_history_cap,
            )),
            validator: PreExecutionValidator::new(),
            retry: RetryExecutor::new(config.max_attempts, config.backoff_unit),
            checkpoints,
            impact,
            tasks: TaskProgressTracker::new(),
            flow,
            generator,
            toolkit,
            sessions: Mutex::new(HashMap::new()),
            config,
        })
    }

    fn sessions(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        // A poisoned map still holds valid entries.
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entry(&self, user_id: &str) -> SessionEntry {
        self.sessions()
            .entry(user_id.to_string())
            .or_insert_with(|| SessionEntry::new(user_id))
            .clone()
    }

    /// Classify and analyse a message without touching any session.
    pub fn analyze_message(&self, text: &str) -> RequestAnalysis {
        let intent = self
            .classifier
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .classify(text);
        analyze(intent, None)
    }

    /// Most recent classifications, newest last.
    pub fn classification_history(&self, limit: usize) -> Vec<ClassificationRecord> {
        let classifier = self.classifier.lock().unwrap_or_else(|e| e.into_inner());
        let records: Vec<ClassificationRecord> = classifier.history().cloned().collect();
        let skip = records.len().saturating_sub(limit);
        records.into_iter().skip(skip).collect()
    }

    /// Single entry point for user messages. Never fails: errors become
    /// `success: false` results.
    pub async fn process_message(&self, user_id: &str, text: &str) -> MessageResult {
        let entry = self.entry(user_id);
        let mut session = entry.state.lock().await;
        session.push_history("user", text);

        let result = match self.dispatch(&mut session, text).await {
            Ok(result) => result,
            Err(e) => {
                error!("Message from {} failed: {}", user_id, e);
                self.tasks.fail_current(&session.session_id, &e.to_string());
                session.awaiting_clarification = false;
                session.awaiting_confirmation = false;
                let response = match &e {
                    EngineError::InconsistentState(_) => {
                        format!("{}. Please start the request again.", e)
                    }
                    _ => format!("Something went wrong: {}", e),
                };
                self.result(&session, false, response)
            }
        };

        session.push_history("assistant", &result.response);
        result
    }

    /// Waits for an in-flight message on the same session to finish.
    pub async fn get_session_status(&self, user_id: &str) -> Option<SessionStatus> {
        let entry = self.sessions().get(user_id).cloned()?;
        let session = entry.state.lock().await;
        Some(SessionStatus {
            session: session.snapshot(),
            tasks: self.tasks.tasks(&entry.session_id),
            task_summary: self.tasks.summary(&entry.session_id),
            flow: self.flow.for_session(&entry.session_id).await,
        })
    }

    /// Replace the user's session with a fresh one.
    pub async fn reset_session(&self, user_id: &str) -> SessionSnapshot {
        let fresh = SessionEntry::new(user_id);
        let old = self.sessions().insert(user_id.to_string(), fresh.clone());
        if let Some(old) = old {
            self.tasks.clear(&old.session_id);
            info!("Reset session {} for {}", old.session_id, user_id);
        }
        let session = fresh.state.lock().await;
        session.snapshot()
    }

    pub async fn get_generated_files(&self, user_id: &str) -> BTreeMap<String, String> {
        let Some(entry) = self.sessions().get(user_id).cloned() else {
            return BTreeMap::new();
        };
        let session = entry.state.lock().await;
        session.generated_files.clone()
    }

    /// Task list for polling. Does not wait on the session lock.
    pub fn get_tasks(&self, user_id: &str) -> TaskList {
        let session_id = self.sessions().get(user_id).map(|e| e.session_id.clone());
        match session_id {
            Some(id) => TaskList {
                tasks: self.tasks.tasks(&id),
                summary: self.tasks.summary(&id),
            },
            None => TaskList {
                tasks: Vec::new(),
                summary: TaskSummary::default(),
            },
        }
    }

    pub fn list_checkpoints(&self) -> Vec<CheckpointSummary> {
        self.checkpoints.list_checkpoints()
    }

    pub fn rollback_checkpoint(&self, id: &str) -> Result<RollbackReport, EngineError> {
        Ok(self.checkpoints.rollback_to_checkpoint(id)?)
    }

    pub fn analyze_impact(&self, file_path: &str, change_description: &str) -> Impact {
        self.impact.analyze_impact(file_path, change_description)
    }

    #[cfg(test)]
    pub(super) async fn edit_session<R>(
        &self,
        user_id: &str,
        edit: impl FnOnce(&mut ConstructorSession) -> R,
    ) -> R {
        let entry = self.entry(user_id);
        let mut session = entry.state.lock().await;
        edit(&mut session)
    }

    async fn dispatch(
        &self,
        session: &mut ConstructorSession,
        text: &str,
    ) -> Result<MessageResult, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(self.result(session, false, "Empty message."));
        }
        if session.awaiting_clarification {
            return self.handle_clarification(session, text).await;
        }
        if session.awaiting_confirmation {
            return self.handle_confirmation(session, text).await;
        }
        self.start_request(session, text).await
    }

    async fn start_request(
        &self,
        session: &mut ConstructorSession,
        text: &str,
    ) -> Result<MessageResult, EngineError> {
        if session.has_open_request() {
            debug!("Abandoning open request in session {}", session.session_id);
            self.tasks.cancel_all(&session.session_id);
        }
        session.begin_request();
        self.open_request(session, text).await;
        self.drive(session).await
    }

    /// Phase 1: classify, analyse and decide the workflow.
    async fn open_request(&self, session: &mut ConstructorSession, text: &str) {
        let analysis = self.analyze_message(text);
        let workflow = WorkflowCatalog::decide_workflow(&analysis.intent);
        let detail = format!(
            "intent {} ({:.2}), workflow {}",
            analysis.intent.intent_type,
            analysis.intent.confidence,
            workflow.name
        );
        self.enter_phase(session, Phase::Analysis, &detail).await;

        let items: Vec<(String, String)> = workflow
            .steps
            .iter()
            .map(|s| (step_title(*s).to_string(), s.as_str().to_string()))
            .collect();
        let ids = self.tasks.create_tasks(&session.session_id, &items);
        session.task_ids = workflow.steps.iter().copied().zip(ids).collect();
        session.analysis = Some(analysis);
        session.workflow = Some(workflow);
    }

    /// Run workflow steps until the workflow ends or a step stops.
    async fn drive(&self, session: &mut ConstructorSession) -> Result<MessageResult, EngineError> {
        while let Some(step) = session.workflow.as_ref().and_then(Workflow::current) {
            self.start_task(session, step);
            match self.run_step(session, step).await? {
                StepOutcome::Done(outcome) => {
                    self.finish_task(session, step, &outcome);
                    let workflow = session
                        .workflow
                        .as_mut()
                        .ok_or(EngineError::InconsistentState("workflow disappeared"))?;
                    if !workflow.advance(outcome) {
                        break;
                    }
                }
                StepOutcome::Stop(result) => return Ok(result),
            }
        }
        Ok(self.completion_result(session))
    }

    async fn run_step(
        &self,
        session: &mut ConstructorSession,
        step: WorkflowStep,
    ) -> Result<StepOutcome, EngineError> {
        self.enter_phase(session, Phase::of_step(step), step.as_str())
            .await;
        match step {
            WorkflowStep::UnderstandProject => Ok(self.understand_project(session)),
            WorkflowStep::ReadTarget => Ok(self.read_target(session)),
            WorkflowStep::RunDiagnostics => Ok(self.run_diagnostics(session)),
            WorkflowStep::Research => self.research(session),
            WorkflowStep::Clarify => self.clarify(session),
            WorkflowStep::AnalyzeImpact => self.analyze_target_impact(session),
            WorkflowStep::PlanChanges => self.plan_changes(session).await,
            WorkflowStep::CreateCheckpoint => self.create_checkpoint(session),
            WorkflowStep::CreateFiles | WorkflowStep::EditFiles => {
                self.generate_files(session, step).await
            }
            WorkflowStep::InstallDependencies => Ok(self.install_dependencies(session).await),
            WorkflowStep::Answer => self.answer(session).await,
            WorkflowStep::Verify => self.verify(session),
            WorkflowStep::Deliver => Ok(self.deliver(session)),
        }
    }

    fn understand_project(&self, session: &mut ConstructorSession) -> StepOutcome {
        match self.toolkit.analyze_project() {
            Ok(summary) => {
                let description = summary.describe();
                if let Some(analysis) = session.analysis.as_mut() {
                    analysis.project_summary = Some(description.clone());
                }
                StepOutcome::Done(description)
            }
            Err(e) => {
                warn!("Project analysis failed: {:#}", e);
                StepOutcome::Done(format!("project analysis unavailable: {:#}", e))
            }
        }
    }

    fn read_target(&self, session: &mut ConstructorSession) -> StepOutcome {
        let Some(target) = session.intent().and_then(|i| i.target_file.clone()) else {
            return StepOutcome::Done("no target file".to_string());
        };
        match self.toolkit.read_file(&target) {
            Ok(content) => {
                let outcome = format!("read {} ({} bytes)", target, content.len());
                session.target_content = Some(content);
                StepOutcome::Done(outcome)
            }
            Err(e) => {
                warn!("Could not read target {}: {:#}", target, e);
                StepOutcome::Done(format!("could not read {}: {:#}", target, e))
            }
        }
    }

    fn run_diagnostics(&self, session: &mut ConstructorSession) -> StepOutcome {
        let target = session.intent().and_then(|i| i.target_file.clone());
        let (Some(target), Some(content)) = (target, session.target_content.as_deref()) else {
            return StepOutcome::Done("no target to diagnose".to_string());
        };

        let mut issues = Vec::new();
        if let Err(e) = check_syntax(Path::new(&target), content) {
            issues.push(DetectedIssue {
                line: 0,
                severity: Severity::Error,
                message: format!("syntax: {}", e),
            });
        }
        if let Some(language) = language_of(&target) {
            let lines: Vec<&str> = content.lines().collect();
            issues.extend(self.toolkit.detect_errors(&lines, language));
        }
        let outcome = format!("{} issue(s) in {}", issues.len(), target);
        session.diagnostics = issues;
        StepOutcome::Done(outcome)
    }

    fn research(&self, session: &mut ConstructorSession) -> Result<StepOutcome, EngineError> {
        let analysis = session
            .analysis
            .as_ref()
            .ok_or(EngineError::InconsistentState("research without an analysis"))?;
        if !analysis.requires_research {
            return Ok(StepOutcome::Done(SKIPPED.to_string()));
        }
        let notes = research(analysis);
        let summary = notes.summary();
        session.research = Some(notes);
        Ok(StepOutcome::Done(summary))
    }

    fn clarify(&self, session: &mut ConstructorSession) -> Result<StepOutcome, EngineError> {
        let analysis = session
            .analysis
            .as_ref()
            .ok_or(EngineError::InconsistentState("clarification without an analysis"))?;
        if !clarify::needs_clarification(analysis) {
            return Ok(StepOutcome::Done(SKIPPED.to_string()));
        }
        let questions = clarify::questions(analysis);
        if questions.is_empty() {
            return Ok(StepOutcome::Done(SKIPPED.to_string()));
        }

        let mut response = clarify::intro(analysis.language).to_string();
        for (i, question) in questions.iter().enumerate() {
            response.push_str(&format!("\n{}. {}", i + 1, question));
        }
        session.pending_questions = questions;
        session.awaiting_clarification = true;
        Ok(StepOutcome::Stop(self.result(session, true, response)))
    }

    async fn handle_clarification(
        &self,
        session: &mut ConstructorSession,
        text: &str,
    ) -> Result<MessageResult, EngineError> {
        let intent_type = session
            .intent()
            .map(|i| i.intent_type)
            .ok_or(EngineError::InconsistentState("clarification without an intent"))?;
        session.awaiting_clarification = false;
        session.pending_questions.clear();
        session.answers.push(text.to_string());

        if intent_type == IntentType::Ambiguous {
            // Re-analyse the original message together with the reply.
            let merged = session.merged_request();
            self.tasks.cancel_all(&session.session_id);
            session.begin_request();
            self.open_request(session, &merged).await;
            return self.drive(session).await;
        }

        let merged = session.merged_request();
        if let Some(analysis) = session.analysis.as_mut() {
            analysis.missing_fields = missing_fields(&merged);
            analysis.requires_clarification = false;
        }
        if session.workflow.as_ref().and_then(Workflow::current) != Some(WorkflowStep::Clarify) {
            return Err(EngineError::InconsistentState(
                "clarification reply outside the clarify step",
            ));
        }
        self.enter_phase(session, Phase::Clarification, "answers received")
            .await;
        self.finish_task(session, WorkflowStep::Clarify, "answered");
        if let Some(workflow) = session.workflow.as_mut() {
            workflow.advance("answered");
        }
        self.drive(session).await
    }

    /// Phases 4 and 5: assemble the prompt, present the plan, suspend.
    async fn plan_changes(
        &self,
        session: &mut ConstructorSession,
    ) -> Result<StepOutcome, EngineError> {
        self.enter_phase(session, Phase::Prompt, "building prompt")
            .await;
        let plan = Self::rebuild_plan(session)?;
        self.enter_phase(session, Phase::Plan, "awaiting confirmation")
            .await;

        session.awaiting_confirmation = true;
        let mut result = self.result(session, true, plan.render(Self::language(session)));
        result.plan = Some(plan);
        Ok(StepOutcome::Stop(result))
    }

    fn rebuild_plan(session: &mut ConstructorSession) -> Result<ExecutionPlan, EngineError> {
        let analysis = session
            .analysis
            .as_ref()
            .ok_or(EngineError::InconsistentState("planning without an analysis"))?;
        let workflow = session
            .workflow
            .as_ref()
            .ok_or(EngineError::InconsistentState("planning without a workflow"))?;

        let prompt = build_prompt(&PromptInputs {
            analysis,
            research: session.research.as_ref(),
            answers: &session.answers,
            target_content: session.target_content.as_deref(),
            diagnostics: &session.diagnostics,
            impact: session.impact.as_ref(),
        });
        let plan = build_plan(
            analysis,
            session.research.as_ref(),
            session.impact.as_ref(),
            workflow,
        );
        session.prompt = Some(prompt);
        session.plan = Some(plan.clone());
        Ok(plan)
    }

    async fn handle_confirmation(
        &self,
        session: &mut ConstructorSession,
        text: &str,
    ) -> Result<MessageResult, EngineError> {
        match parse_reply(text) {
            PlanReply::Confirm => {
                let current = session
                    .workflow
                    .as_ref()
                    .and_then(Workflow::current)
                    .ok_or(EngineError::InconsistentState(
                        "confirmation without an open workflow",
                    ))?;
                session.awaiting_confirmation = false;
                // After a failed execution step the cursor stays on that step,
                // so confirming again retries it.
                if current == WorkflowStep::PlanChanges {
                    self.finish_task(session, current, "confirmed");
                    if let Some(workflow) = session.workflow.as_mut() {
                        workflow.advance("confirmed");
                    }
                } else {
                    self.requeue_task(session, current);
                }
                self.drive(session).await
            }
            PlanReply::Cancel => {
                session.awaiting_confirmation = false;
                self.tasks.cancel_all(&session.session_id);
                session.workflow = None;
                self.enter_phase(session, Phase::Plan, "cancelled by user")
                    .await;
                let response = match Self::language(session) {
                    Language::Es => "Plan cancelado. Envía una nueva solicitud cuando quieras.",
                    Language::En => "Plan cancelled. Send a new request whenever you like.",
                };
                Ok(self.result(session, true, response))
            }
            PlanReply::Adjust(adjustment) => {
                session.answers.push(adjustment);
                let merged = session.merged_request();
                if let Some(analysis) = session.analysis.as_mut() {
                    analysis.missing_fields = missing_fields(&merged);
                }
                self.enter_phase(session, Phase::Prompt, "adjusting plan")
                    .await;
                let plan = Self::rebuild_plan(session)?;
                self.enter_phase(session, Phase::Plan, "awaiting confirmation")
                    .await;
                let mut result = self.result(session, true, plan.render(Self::language(session)));
                result.plan = Some(plan);
                Ok(result)
            }
        }
    }

    /// Relative directory generated files are written to.
    fn write_dir(&self, session: &ConstructorSession) -> String {
        let target = session.intent().and_then(|i| i.target_file.as_deref());
        let modifying = session
            .intent()
            .map(|i| i.intent_type.is_modification())
            .unwrap_or(false);
        if let (true, Some(target), Some(_)) = (modifying, target, &session.target_content) {
            return Path::new(target)
                .parent()
                .map(|p| p.to_string_lossy().to_string())
                .unwrap_or_default();
        }
        self.config.output_dir.clone()
    }

    fn target_path(&self, session: &ConstructorSession) -> Option<PathBuf> {
        session.target_content.as_ref()?;
        let target = session.intent()?.target_file.as_deref()?;
        Some(crate::collab::normalize(&self.toolkit.root().join(target)))
    }

    fn create_checkpoint(
        &self,
        session: &mut ConstructorSession,
    ) -> Result<StepOutcome, EngineError> {
        let root = self.toolkit.root().to_path_buf();
        let dir = self.write_dir(session);
        let listing = if dir.is_empty() { "." } else { dir.as_str() };

        let mut paths: Vec<PathBuf> = match self.toolkit.list_directory(listing) {
            Ok(entries) => entries
                .iter()
                .filter(|e| !e.is_dir)
                .map(|e| root.join(&dir).join(&e.name))
                .collect(),
            Err(e) => {
                debug!("Nothing to snapshot in {}: {:#}", listing, e);
                Vec::new()
            }
        };
        if let Some(target) = self.target_path(session) {
            if !paths.contains(&target) {
                paths.push(target);
            }
        }

        let description = match session.intent() {
            Some(intent) => format!(
                "before {}: {}",
                intent.intent_type,
                intent.original_message.chars().take(80).collect::<String>()
            ),
            None => "before execution".to_string(),
        };
        let checkpoint = self.checkpoints.create_checkpoint(&paths, &description)?;
        let outcome = format!("checkpoint {} ({} file(s))", checkpoint.id, checkpoint.files.len());
        session.checkpoint_id = Some(checkpoint.id);
        Ok(StepOutcome::Done(outcome))
    }

    fn action_for(&self, session: &ConstructorSession, file: &AcceptedFile) -> Action {
        let is_target = self
            .target_path(session)
            .map(|t| t == file.absolute)
            .unwrap_or(false);
        match (is_target, &session.target_content) {
            (true, Some(original)) => Action::Edit {
                path: file.absolute.clone(),
                old: Some(original.clone()),
                new: file.content.clone(),
            },
            _ => Action::Write {
                path: file.absolute.clone(),
                content: file.content.clone(),
            },
        }
    }

    /// Phase 6: generate, sanitize, validate and write.
    async fn generate_files(
        &self,
        session: &mut ConstructorSession,
        step: WorkflowStep,
    ) -> Result<StepOutcome, EngineError> {
        let prompt = session
            .prompt
            .clone()
            .ok_or(EngineError::InconsistentState("execution without a prompt"))?;
        let user_id = session.user_id.clone();
        let generator = Arc::clone(&self.generator);

        let outcome = self
            .retry
            .execute("generate files", |_| {
                let generator = Arc::clone(&generator);
                let prompt = prompt.clone();
                let user_id = user_id.clone();
                async move {
                    let result = generator.generate(&user_id, &prompt).await?;
                    if let Some(reason) = result.failure() {
                        anyhow::bail!(reason);
                    }
                    let files = parse_files(&result.text);
                    Ok(ParsedResponse {
                        text: result.text,
                        files,
                    })
                }
            })
            .await;
        let Some(parsed) = outcome.value else {
            return Ok(StepOutcome::Stop(
                self.execution_failure(session, step, &outcome.report).await,
            ));
        };
        debug!(
            "Generator returned {} file(s) in {} bytes",
            parsed.files.len(),
            parsed.text.len()
        );

        let root = self.toolkit.root().to_path_buf();
        let target_dir = root.join(self.write_dir(session));
        let sanitized = sanitize_files(&parsed.files, &target_dir, &root);
        for (file, reason) in &sanitized.rejected {
            warn!("Rejected generated file {}: {}", file, reason);
        }
        session.rejected_files = sanitized.rejected.clone();
        let step_task = session.task_ids.get(&step).cloned();
        let total = sanitized.accepted.len().max(1);
        session.generated_files = sanitized
            .accepted
            .iter()
            .map(|f| (f.name.clone(), f.content.clone()))
            .collect();
        session.written_files.clear();

        for file in &sanitized.accepted {
            let validation = self.validator.validate(&self.action_for(session, file));
            for warning in &validation.warnings {
                debug!("{}: {}", file.relative, warning);
            }
            if !validation.valid {
                warn!(
                    "Validation blocked {}: {}",
                    file.relative,
                    validation.errors.join("; ")
                );
                session
                    .rejected_files
                    .push((file.name.clone(), validation.errors.join("; ")));
                continue;
            }

            let toolkit = Arc::clone(&self.toolkit);
            let relative = file.relative.clone();
            let content = file.content.clone();
            let outcome = self
                .retry
                .execute(&format!("write {}", file.relative), |_| {
                    let toolkit = Arc::clone(&toolkit);
                    let relative = relative.clone();
                    let content = content.clone();
                    async move { toolkit.write_file(&relative, &content).map(|_| ()) }
                })
                .await;
            if !outcome.success() {
                return Ok(StepOutcome::Stop(
                    self.execution_failure(session, step, &outcome.report).await,
                ));
            }
            session.written_files.push(file.relative.clone());
            if let Some(task_id) = &step_task {
                let progress = (session.written_files.len() * 100 / total).min(100) as u8;
                if let Err(e) = self.tasks.update_progress(&session.session_id, task_id, progress) {
                    debug!("Progress update skipped: {}", e);
                }
            }
        }

        if session.written_files.is_empty() {
            let report = RetryReport {
                action: "write files".to_string(),
                success: false,
                attempts: 1,
                errors: vec!["no generated file passed sanitization and validation".to_string()],
                strategies: Vec::new(),
                error_kind: None,
                final_strategy: None,
            };
            return Ok(StepOutcome::Stop(
                self.execution_failure(session, step, &report).await,
            ));
        }

        Ok(StepOutcome::Done(format!(
            "{} file(s) written, {} rejected",
            session.written_files.len(),
            session.rejected_files.len()
        )))
    }

    /// Exhausted retries: roll back, fail the task and ask for help. The
    /// workflow stays on the failed step so a "yes" retries it.
    async fn execution_failure(
        &self,
        session: &mut ConstructorSession,
        step: WorkflowStep,
        report: &RetryReport,
    ) -> MessageResult {
        let help = report.help_request(step_title(step));
        let last_error = report.errors.last().cloned().unwrap_or_default();
        if let Some(task_id) = session.task_ids.get(&step) {
            if let Err(e) = self.tasks.fail(&session.session_id, task_id, &last_error) {
                debug!("Task update skipped: {}", e);
            }
        }

        let mut response = format!("{}\n{}", help.title, help.summary);
        if let Some(id) = session.checkpoint_id.clone() {
            match self.checkpoints.auto_rollback_on_error(&id, &last_error) {
                Ok(rollback) => {
                    response.push_str(&format!(
                        "\nRestored {} file(s) from checkpoint {}.",
                        rollback.restored.len(),
                        id
                    ));
                    for (path, reason) in &rollback.failed {
                        response.push_str(&format!("\nCould not restore {}: {}", path, reason));
                    }
                }
                Err(e) => warn!("Automatic rollback to {} failed: {}", id, e),
            }
        }
        for suggestion in &help.suggestions {
            response.push_str(&format!("\n- {}", suggestion));
        }

        session.awaiting_confirmation = true;
        self.enter_phase(session, Phase::Execution, "failed, awaiting retry")
            .await;
        let mut result = self.result(session, false, response);
        result.needs_help = Some(help);
        result
    }

    async fn install_dependencies(&self, session: &mut ConstructorSession) -> StepOutcome {
        let detected = detect_dependencies(&session.generated_files);
        let (install, manual) = install_plan(&detected);
        let mut report = DependencyReport {
            detected: detected.iter().map(|(_, name)| name.clone()).collect(),
            manual,
            ..Default::default()
        };

        for (manager, name) in install {
            let toolkit = Arc::clone(&self.toolkit);
            let package = name.clone();
            let outcome = self
                .retry
                .execute(&format!("install {}", name), |_| {
                    let toolkit = Arc::clone(&toolkit);
                    let package = package.clone();
                    async move { toolkit.install_package(&package, manager).await }
                })
                .await;
            if outcome.success() {
                report.installed.push(name);
            } else {
                report
                    .manual
                    .push(format!("{} install {}", manager.as_str(), name));
                report.failed.push(name);
            }
        }

        let outcome = format!(
            "{} detected, {} installed, {} manual",
            report.detected.len(),
            report.installed.len(),
            report.manual.len()
        );
        session.dependencies = Some(report);
        StepOutcome::Done(outcome)
    }

    async fn answer(&self, session: &mut ConstructorSession) -> Result<StepOutcome, EngineError> {
        let analysis = session
            .analysis
            .as_ref()
            .ok_or(EngineError::InconsistentState("answer without an analysis"))?;
        let prompt = build_answer_prompt(analysis, session.target_content.as_deref());
        session.prompt = Some(prompt.clone());
        let user_id = session.user_id.clone();
        let generator = Arc::clone(&self.generator);

        let outcome = self
            .retry
            .execute("answer", |_| {
                let generator = Arc::clone(&generator);
                let prompt = prompt.clone();
                let user_id = user_id.clone();
                async move { generator.generate(&user_id, &prompt).await }
            })
            .await;
        match outcome.value {
            Some(generated) => {
                session.answer = Some(generated.text);
                Ok(StepOutcome::Done("answered".to_string()))
            }
            None => Ok(StepOutcome::Stop(
                self.execution_failure(session, WorkflowStep::Answer, &outcome.report)
                    .await,
            )),
        }
    }

    /// Phase 7. Impact is recomputed here for modifications of a known file.
    fn verify(&self, session: &mut ConstructorSession) -> Result<StepOutcome, EngineError> {
        let planned = session
            .workflow
            .as_ref()
            .map(|w| w.contains(WorkflowStep::PlanChanges))
            .unwrap_or(false);
        if planned && session.plan.is_none() {
            return Err(EngineError::InconsistentState("verification without a plan"));
        }
        let intent = session
            .intent()
            .ok_or(EngineError::InconsistentState("verification without an intent"))?;
        let impact = match (&intent.target_file, intent.intent_type.is_modification()) {
            (Some(target), true) => Some(
                self.impact
                    .analyze_impact(target, &intent.original_message),
            ),
            _ => None,
        };
        let report = verify(&session.generated_files, self.toolkit.as_ref(), impact);
        let summary = report.summary();
        session.verification = Some(report);
        Ok(StepOutcome::Done(summary))
    }

    fn deliver(&self, session: &mut ConstructorSession) -> StepOutcome {
        self.tasks.complete_all(&session.session_id);
        let summary = self.tasks.summary(&session.session_id);
        let report = match &session.answer {
            Some(answer) => answer.clone(),
            None => build_report(session, &summary),
        };
        session.report = Some(report);
        StepOutcome::Done("delivered".to_string())
    }

    fn analyze_target_impact(
        &self,
        session: &mut ConstructorSession,
    ) -> Result<StepOutcome, EngineError> {
        let intent = session
            .intent()
            .ok_or(EngineError::InconsistentState("impact without an intent"))?;
        let Some(target) = intent.target_file.clone() else {
            return Ok(StepOutcome::Done(SKIPPED.to_string()));
        };
        let impact = self.impact.analyze_impact(&target, &intent.original_message);
        let outcome = format!("{} risk for {}", impact.risk_level.as_str(), target);
        session.impact = Some(impact);
        Ok(StepOutcome::Done(outcome))
    }

    async fn enter_phase(&self, session: &mut ConstructorSession, phase: Phase, detail: &str) {
        if session.phase != phase {
            info!(
                "Session {} -> phase {} ({})",
                session.session_id,
                phase.number(),
                phase.name()
            );
        }
        session.phase = phase;
        self.flow
            .record(&session.session_id, phase.number(), phase.name(), detail)
            .await;
    }

    fn start_task(&self, session: &ConstructorSession, step: WorkflowStep) {
        let Some(task_id) = session.task_ids.get(&step) else {
            return;
        };
        if let Err(e) = self.tasks.start(&session.session_id, task_id) {
            debug!("Task for {} not started: {}", step.as_str(), e);
        }
    }

    /// Failed tasks stay as history; a retried step gets a new task.
    fn requeue_task(&self, session: &mut ConstructorSession, step: WorkflowStep) {
        let title = format!("{} (retry)", step_title(step));
        match self
            .tasks
            .append_task(&session.session_id, &title, step.as_str())
        {
            Ok(id) => {
                session.task_ids.insert(step, id);
            }
            Err(e) => debug!("No retry task for {}: {}", step.as_str(), e),
        }
    }

    fn finish_task(&self, session: &ConstructorSession, step: WorkflowStep, outcome: &str) {
        let Some(task_id) = session.task_ids.get(&step) else {
            return;
        };
        let result = if outcome == SKIPPED {
            self.tasks.cancel(&session.session_id, task_id)
        } else {
            self.tasks.complete(&session.session_id, task_id)
        };
        if let Err(e) = result {
            debug!("Task for {} not finished: {}", step.as_str(), e);
        }
    }

    fn language(session: &ConstructorSession) -> Language {
        session
            .analysis
            .as_ref()
            .map(|a| a.language)
            .unwrap_or(Language::Es)
    }

    fn result(
        &self,
        session: &ConstructorSession,
        success: bool,
        response: impl Into<String>,
    ) -> MessageResult {
        MessageResult {
            success,
            response: response.into(),
            phase: session.phase.number(),
            phase_name: session.phase.name().to_string(),
            awaiting_input: session.awaiting_input(),
            questions: session.pending_questions.clone(),
            plan: None,
            files: None,
            verification: None,
            needs_help: None,
            session: session.snapshot(),
        }
    }

    fn completion_result(&self, session: &ConstructorSession) -> MessageResult {
        let response = session
            .report
            .clone()
            .unwrap_or_else(|| "Request completed.".to_string());
        let mut result = self.result(session, true, response);
        if !session.generated_files.is_empty() {
            result.files = Some(session.written_files.clone());
        }
        result.verification = session.verification.clone();
        result
    }
}
