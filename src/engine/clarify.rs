//! Clarification questions.

use crate::domain::IntentType;
use crate::intent::{Language, RequestAnalysis, SpecField};

/// At most this many questions per round.
pub const MAX_QUESTIONS: usize = 3;

fn field_question(field: SpecField, language: Language) -> &'static str {
    match (field, language) {
        (SpecField::Objective, Language::Es) => {
            "¿Cuál es el objetivo principal? (vender, captar clientes, recibir reservas, informar...)"
        }
        (SpecField::Objective, Language::En) => {
            "What is the main goal? (sell, capture leads, take bookings, inform...)"
        }
        (SpecField::Resources, Language::Es) => {
            "¿Tienes logo, fotos o textos que quieras usar, o uso contenido de ejemplo?"
        }
        (SpecField::Resources, Language::En) => {
            "Do you have a logo, photos or copy to use, or should I use placeholder content?"
        }
        (SpecField::Style, Language::Es) => {
            "¿Qué estilo prefieres? (moderno, minimalista, elegante, colores concretos...)"
        }
        (SpecField::Style, Language::En) => {
            "Which style do you prefer? (modern, minimal, elegant, specific colors...)"
        }
    }
}

fn generic_questions(language: Language) -> Vec<String> {
    let questions: &[&str] = match language {
        Language::Es => &[
            "¿Qué te gustaría que haga exactamente: crear algo nuevo, modificar un archivo o resolver un error?",
            "¿Para qué tipo de proyecto es (web, bot, API)?",
        ],
        Language::En => &[
            "What exactly should I do: build something new, change a file or fix an error?",
            "What kind of project is it (website, bot, API)?",
        ],
    };
    questions.iter().map(|q| q.to_string()).collect()
}

/// Questions for the fields the request still lacks, or generic ones when
/// the intent itself is unclear.
pub fn questions(analysis: &RequestAnalysis) -> Vec<String> {
    if analysis.intent.intent_type == IntentType::Ambiguous {
        return generic_questions(analysis.language);
    }
    analysis
        .missing_fields
        .iter()
        .take(MAX_QUESTIONS)
        .map(|f| field_question(*f, analysis.language).to_string())
        .collect()
}

/// Whether the clarification step has to suspend for this analysis.
pub fn needs_clarification(analysis: &RequestAnalysis) -> bool {
    analysis.intent.intent_type == IntentType::Ambiguous || analysis.requires_clarification
}

pub fn intro(language: Language) -> &'static str {
    match language {
        Language::Es => "Antes de empezar necesito algunos detalles:",
        Language::En => "Before I start I need a few details:",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Intent;
    use crate::intent::analyze;

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
    fn test_questions_follow_missing_fields() {
        let a = analysis(
            IntentType::CreateLanding,
            "Necesito crear una landing page para mi restaurante con reservas",
        );
        let qs = questions(&a);
        assert_eq!(qs.len(), 3);
        assert!(qs[0].contains("objetivo"));
        assert!(needs_clarification(&a));
    }

    #[test]
    fn test_ambiguous_gets_generic_questions() {
        let a = analysis(IntentType::Ambiguous, "hello there, how is the weather");
        let qs = questions(&a);
        assert_eq!(qs.len(), 2);
        assert!(qs[0].starts_with("What exactly"));
        assert!(needs_clarification(&a));
    }
}
