//! Deterministic generation prompts.

use crate::collab::DetectedIssue;
use crate::domain::{Impact, IntentType};
use crate::intent::{Language, RequestAnalysis, Urgency};

use super::research::ResearchNotes;

/// Longest target file excerpt embedded in a prompt, in bytes.
const MAX_TARGET_EXCERPT: usize = 12_000;

/// Everything the build prompt is assembled from.
pub struct PromptInputs<'a> {
    pub analysis: &'a RequestAnalysis,
    pub research: Option<&'a ResearchNotes>,
    pub answers: &'a [String],
    pub target_content: Option<&'a str>,
    pub diagnostics: &'a [DetectedIssue],
    pub impact: Option<&'a Impact>,
}

fn deliverable(intent_type: IntentType) -> &'static str {
    match intent_type {
        IntentType::CreateLanding => {
            "a single-page landing site (index.html, styles.css, script.js)"
        }
        IntentType::CreateWebApp => "a small web application (index.html, styles.css, app.js)",
        IntentType::CreateBot => "a Telegram bot in Python (bot.py, requirements.txt)",
        IntentType::CreateApi => "a REST API in Python with Flask (app.py, requirements.txt)",
        IntentType::ModifyExisting => "the modified version of the existing file(s)",
        IntentType::DebugFix => "the corrected version of the existing file(s)",
        IntentType::Deploy => "deployment configuration files (deploy.yml, README.md)",
        IntentType::Explain | IntentType::Question | IntentType::Ambiguous => "an answer",
    }
}

fn excerpt(content: &str) -> &str {
    if content.len() <= MAX_TARGET_EXCERPT {
        return content;
    }
    let mut end = MAX_TARGET_EXCERPT;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    &content[..end]
}

/// Build the code generation prompt. Same inputs always give the same text.
pub fn build_prompt(inputs: &PromptInputs<'_>) -> String {
    let analysis = inputs.analysis;
    let intent = &analysis.intent;
    let mut out = String::new();

    out.push_str("## Task\n");
    out.push_str(&format!("Build {}.\n", deliverable(intent.intent_type)));
    out.push_str(&format!("Request: {}\n", intent.original_message.trim()));
    for answer in inputs.answers {
        out.push_str(&format!("Additional detail: {}\n", answer.trim()));
    }

    out.push_str("\n## Context\n");
    out.push_str(&format!("Domain: {}\n", analysis.context.as_str()));
    if !intent.keywords.is_empty() {
        out.push_str(&format!("Keywords: {}\n", intent.keywords.join(", ")));
    }
    if let Some(summary) = &analysis.project_summary {
        out.push_str(&format!("Project: {}\n", summary));
    }
    if analysis.urgency == Urgency::Alta {
        out.push_str("Priority: urgent, keep the solution simple.\n");
    }

    if let Some(notes) = inputs.research {
        out.push_str("\n## Design guidance\n");
        out.push_str(&format!("Style: {}\n", notes.style));
        out.push_str(&format!("Palette: {}\n", notes.palette.join(", ")));
        out.push_str(&format!("Sections: {}\n", notes.sections.join(", ")));
        out.push_str(&format!("Features: {}\n", notes.features.join(", ")));
    }

    if let (Some(file), Some(content)) = (&intent.target_file, inputs.target_content) {
        out.push_str(&format!("\n## Current content of {}\n```\n", file));
        out.push_str(excerpt(content));
        out.push_str("\n```\n");
        if let Some(function) = &intent.target_function {
            out.push_str(&format!("Focus on `{}`.\n", function));
        }
    }

    if !inputs.diagnostics.is_empty() {
        out.push_str("\n## Detected issues\n");
        for issue in inputs.diagnostics {
            out.push_str(&format!("- line {}: {}\n", issue.line, issue.message));
        }
    }

    if let Some(impact) = inputs.impact {
        if !impact.importers.is_empty() {
            out.push_str(&format!(
                "\nKeep the public interface stable; imported by: {}\n",
                impact.importers.join(", ")
            ));
        }
    }

    out.push_str("\n## Requirements\n");
    out.push_str("- Responsive, mobile-first layout where there is a UI.\n");
    out.push_str("- Modern syntax (const/let, semantic HTML5, f-strings).\n");
    out.push_str("- No placeholder TODOs; complete, runnable files.\n");
    match analysis.language {
        Language::Es => out.push_str("- User-facing text in Spanish.\n"),
        Language::En => out.push_str("- User-facing text in English.\n"),
    }
    out.push_str(
        "- Reply with a ```json block containing {\"files\": [{\"path\": ..., \"content\": ...}]} using plain file names.\n",
    );
    out
}

/// Prompt for explain/question intents. No files are expected back.
pub fn build_answer_prompt(analysis: &RequestAnalysis, target_content: Option<&str>) -> String {
    let intent = &analysis.intent;
    let mut out = String::new();
    out.push_str("Answer the following in plain text. Do not produce files or a JSON block.\n");
    match analysis.language {
        Language::Es => out.push_str("Reply in Spanish.\n"),
        Language::En => out.push_str("Reply in English.\n"),
    }
    out.push_str(&format!("\nQuestion: {}\n", intent.original_message.trim()));
    if let (Some(file), Some(content)) = (&intent.target_file, target_content) {
        out.push_str(&format!("\nContent of {}:\n```\n{}\n```\n", file, excerpt(content)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Intent;
    use crate::intent::analyze;

    fn analysis(intent_type: IntentType, message: &str, target: Option<&str>) -> RequestAnalysis {
        analyze(
            Intent {
                intent_type,
                confidence: 0.6,
                keywords: vec!["landing".to_string()],
                target_file: target.map(str::to_string),
                target_function: None,
                original_message: message.to_string(),
            },
            None,
        )
    }

    #[test]
    fn test_prompt_is_deterministic_and_includes_answers() {
        let a = analysis(IntentType::CreateLanding, "landing para mi restaurante", None);
        let answers = vec!["objetivo: recibir reservas".to_string()];
        let inputs = PromptInputs {
            analysis: &a,
            research: None,
            answers: &answers,
            target_content: None,
            diagnostics: &[],
            impact: None,
        };
        let first = build_prompt(&inputs);
        assert_eq!(first, build_prompt(&inputs));
        assert!(first.contains("Additional detail: objetivo: recibir reservas"));
        assert!(first.contains("Domain: restaurant"));
        assert!(first.contains("Spanish"));
    }

    #[test]
    fn test_answer_prompt_embeds_target() {
        let a = analysis(IntentType::Explain, "explain app.py", Some("app.py"));
        let prompt = build_answer_prompt(&a, Some("print('hi')"));
        assert!(prompt.contains("Content of app.py"));
        assert!(prompt.contains("print('hi')"));
    }
}
