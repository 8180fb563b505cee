//! Execution plan and confirmation replies.

use serde::Serialize;

use crate::domain::{Impact, IntentType, RiskLevel, Workflow, WorkflowStep};
use crate::intent::{DetailLevel, Language, RequestAnalysis, SpecField, Urgency};

use super::research::ResearchNotes;

const YES_WORDS: &[&str] = &[
    "si", "sí", "yes", "ok", "okay", "dale", "adelante", "confirmo", "confirm", "go",
    "perfecto", "procede", "proceed", "listo", "hazlo", "do it", "sure", "vale",
];

const NO_WORDS: &[&str] = &[
    "no", "cancel", "cancela", "cancelar", "stop", "detener", "nope", "olvidalo",
    "olvídalo",
];

const ADJUST_WORDS: &[&str] = &[
    "cambia", "cambiar", "ajusta", "ajustar", "modifica", "agrega", "añade", "quita", "pero",
    "mejor", "change", "adjust", "add", "remove", "instead", "but", "prefer", "prefiero",
];

/// Replies this short that contain a "no" word cancel the plan.
const MAX_CANCEL_WORDS: usize = 4;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTask {
    pub step: WorkflowStep,
    pub title: String,
}

/// What the engine will do once the user confirms.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub title: String,
    pub tasks: Vec<PlanTask>,
    pub estimated_minutes: u32,
    pub risks: Vec<String>,
    pub files_to_create: Vec<String>,
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanReply {
    Confirm,
    Cancel,
    Adjust(String),
}

/// Human-readable title for a workflow step.
pub fn step_title(step: WorkflowStep) -> &'static str {
    match step {
        WorkflowStep::UnderstandProject => "Analyze the project",
        WorkflowStep::ReadTarget => "Read the target file",
        WorkflowStep::RunDiagnostics => "Run diagnostics",
        WorkflowStep::Research => "Research references",
        WorkflowStep::Clarify => "Clarify requirements",
        WorkflowStep::AnalyzeImpact => "Analyze change impact",
        WorkflowStep::PlanChanges => "Plan the changes",
        WorkflowStep::CreateCheckpoint => "Create a checkpoint",
        WorkflowStep::CreateFiles => "Generate and write files",
        WorkflowStep::EditFiles => "Generate and apply edits",
        WorkflowStep::InstallDependencies => "Install dependencies",
        WorkflowStep::Answer => "Prepare the answer",
        WorkflowStep::Verify => "Verify the result",
        WorkflowStep::Deliver => "Deliver the report",
    }
}

/// Files the generator is expected to return for an intent.
pub fn expected_files(analysis: &RequestAnalysis) -> Vec<String> {
    let names: &[&str] = match analysis.intent.intent_type {
        IntentType::CreateLanding => &["index.html", "styles.css", "script.js"],
        IntentType::CreateWebApp => &["index.html", "styles.css", "app.js"],
        IntentType::CreateBot => &["bot.py", "requirements.txt"],
        IntentType::CreateApi => &["app.py", "requirements.txt"],
        IntentType::Deploy => &["deploy.yml", "README.md"],
        IntentType::ModifyExisting | IntentType::DebugFix => {
            return analysis.intent.target_file.iter().cloned().collect();
        }
        IntentType::Explain | IntentType::Question | IntentType::Ambiguous => &[],
    };
    names.iter().map(|s| s.to_string()).collect()
}

fn expected_dependencies(intent_type: IntentType) -> Vec<String> {
    let deps: &[&str] = match intent_type {
        IntentType::CreateBot => &["python-telegram-bot"],
        IntentType::CreateApi => &["flask"],
        _ => &[],
    };
    deps.iter().map(|s| s.to_string()).collect()
}

fn base_minutes(intent_type: IntentType) -> u32 {
    match intent_type {
        IntentType::CreateLanding => 3,
        IntentType::CreateWebApp => 6,
        IntentType::CreateBot | IntentType::CreateApi => 5,
        IntentType::ModifyExisting | IntentType::DebugFix => 2,
        IntentType::Deploy => 4,
        IntentType::Explain | IntentType::Question | IntentType::Ambiguous => 1,
    }
}

fn risks(analysis: &RequestAnalysis, impact: Option<&Impact>) -> Vec<String> {
    let mut risks = Vec::new();
    if analysis.detail_level == DetailLevel::Low {
        risks.push("The request is brief; the result may need adjustments.".to_string());
    }
    if analysis.intent.intent_type.is_creation()
        && analysis.missing_fields.contains(&SpecField::Resources)
    {
        risks.push("No assets were provided; placeholder content will be used.".to_string());
    }
    if analysis.intent.intent_type.is_modification() {
        risks.push("Existing code will change; a checkpoint is taken first.".to_string());
    }
    if let Some(impact) = impact {
        if impact.risk_level != RiskLevel::Low {
            risks.push(format!(
                "Change impact is {} ({} importer(s), {} usage(s)).",
                impact.risk_level.as_str(),
                impact.importers.len(),
                impact.usages.len()
            ));
        }
    }
    if analysis.urgency == Urgency::Alta {
        risks.push("Urgent request: scope is kept minimal.".to_string());
    }
    risks
}

/// Build the plan from what the analysis, research and impact steps found.
pub fn build_plan(
    analysis: &RequestAnalysis,
    research: Option<&ResearchNotes>,
    impact: Option<&Impact>,
    workflow: &Workflow,
) -> ExecutionPlan {
    let tasks: Vec<PlanTask> = workflow
        .steps
        .iter()
        .skip_while(|s| **s != WorkflowStep::PlanChanges)
        .skip(1)
        .map(|s| PlanTask {
            step: *s,
            title: step_title(*s).to_string(),
        })
        .collect();

    let mut minutes = base_minutes(analysis.intent.intent_type);
    if research.is_some() {
        minutes += 1;
    }
    if workflow.contains(WorkflowStep::InstallDependencies) {
        minutes += 1;
    }

    let title = match (analysis.language, research) {
        (Language::Es, Some(notes)) => format!(
            "Plan para {} ({})",
            analysis.intent.intent_type.as_str(),
            notes.context.as_str()
        ),
        (Language::Es, None) => format!("Plan para {}", analysis.intent.intent_type.as_str()),
        (Language::En, Some(notes)) => format!(
            "Plan for {} ({})",
            analysis.intent.intent_type.as_str(),
            notes.context.as_str()
        ),
        (Language::En, None) => format!("Plan for {}", analysis.intent.intent_type.as_str()),
    };

    ExecutionPlan {
        title,
        tasks,
        estimated_minutes: minutes,
        risks: risks(analysis, impact),
        files_to_create: expected_files(analysis),
        dependencies: expected_dependencies(analysis.intent.intent_type),
    }
}

impl ExecutionPlan {
    pub fn render(&self, language: Language) -> String {
        let mut out = format!("{}\n", self.title);
        for (i, task) in self.tasks.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, task.title));
        }
        if !self.files_to_create.is_empty() {
            out.push_str(&format!("Files: {}\n", self.files_to_create.join(", ")));
        }
        if !self.dependencies.is_empty() {
            out.push_str(&format!("Dependencies: {}\n", self.dependencies.join(", ")));
        }
        for risk in &self.risks {
            out.push_str(&format!("Risk: {}\n", risk));
        }
        out.push_str(&format!("Estimated time: ~{} min\n", self.estimated_minutes));
        out.push_str(match language {
            Language::Es => "¿Procedo? Responde sí, no, o indica qué ajustar.",
            Language::En => "Shall I proceed? Reply yes, no, or tell me what to adjust.",
        });
        out
    }
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_any(words: &[String], lowered: &str, table: &[&str]) -> bool {
    table.iter().any(|needle| {
        if needle.contains(' ') {
            lowered.contains(needle)
        } else {
            words.iter().any(|w| w == needle)
        }
    })
}

/// Keyword-match a confirmation reply.
///
/// Adjustment words win over yes/no, so "sí, pero cambia el color" is an
/// adjustment. Anything unrecognised is treated as an adjustment too.
pub fn parse_reply(text: &str) -> PlanReply {
    let lowered = text.trim().to_lowercase();
    let words = words(&lowered);

    if contains_any(&words, &lowered, ADJUST_WORDS) {
        return PlanReply::Adjust(text.trim().to_string());
    }
    if contains_any(&words, &lowered, NO_WORDS) && words.len() <= MAX_CANCEL_WORDS {
        return PlanReply::Cancel;
    }
    if contains_any(&words, &lowered, YES_WORDS) {
        return PlanReply::Confirm;
    }
    PlanReply::Adjust(text.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Intent;
    use crate::intent::analyze;
    use crate::workflow::WorkflowCatalog;

    fn analysis(intent_type: IntentType, message: &str) -> RequestAnalysis {
        analyze(
            Intent {
                intent_type,
                confidence: 0.6,
                keywords: Vec::new(),
                target_file: None,
                target_function: None,
                original_message: message.to_string(),
            },
            None,
        )
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply("Sí"), PlanReply::Confirm);
        assert_eq!(parse_reply("ok, adelante"), PlanReply::Confirm);
        assert_eq!(parse_reply("no"), PlanReply::Cancel);
        assert_eq!(parse_reply("no gracias"), PlanReply::Cancel);
        assert_eq!(
            parse_reply("sí, pero cambia el color a azul"),
            PlanReply::Adjust("sí, pero cambia el color a azul".to_string())
        );
        assert!(matches!(
            parse_reply("usa tonos verdes en el fondo"),
            PlanReply::Adjust(_)
        ));
    }

    #[test]
    fn test_plan_lists_steps_after_planning() {
        let a = analysis(IntentType::CreateLanding, "landing para mi restaurante");
        let workflow = WorkflowCatalog::decide_workflow(&a.intent);
        let plan = build_plan(&a, None, None, &workflow);

        let steps: Vec<WorkflowStep> = plan.tasks.iter().map(|t| t.step).collect();
        assert_eq!(
            steps,
            vec![
                WorkflowStep::CreateCheckpoint,
                WorkflowStep::CreateFiles,
                WorkflowStep::InstallDependencies,
                WorkflowStep::Verify,
                WorkflowStep::Deliver,
            ]
        );
        assert_eq!(plan.files_to_create, vec!["index.html", "styles.css", "script.js"]);
        assert!(!plan.risks.is_empty());
        assert!(plan.render(Language::Es).contains("¿Procedo?"));
    }
}
