//! Request analysis built on top of the classified intent.
//!
//! Decides whether the research and clarification phases are needed by
//! looking for the specification fields a creation request usually lacks.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::domain::Intent;

use super::extract::{self, Language, Urgency};

/// Requests shorter than this many words are considered low detail.
const LOW_DETAIL_WORDS: usize = 15;

/// Ordered (context, keywords) table. First match wins.
const CONTEXTS: &[(DomainContext, &[&str])] = &[
    (
        DomainContext::Restaurant,
        &["restaurante", "restaurant", "cafetería", "cafeteria", "café", "bar", "comida", "menú", "menu", "pizzería", "pizzeria", "reservas"],
    ),
    (
        DomainContext::Ecommerce,
        &["tienda", "shop", "store", "ecommerce", "e-commerce", "productos", "products", "vender", "carrito", "catálogo", "catalogo"],
    ),
    (
        DomainContext::Portfolio,
        &["portafolio", "portfolio", "currículum", "curriculum", "cv", "fotógrafo", "fotografo", "diseñador", "designer"],
    ),
    (
        DomainContext::Saas,
        &["saas", "startup", "software", "suscripción", "suscripcion", "subscription", "plataforma", "platform"],
    ),
    (
        DomainContext::Health,
        &["clínica", "clinica", "clinic", "médico", "medico", "doctor", "dentista", "dentist", "salud", "health", "spa"],
    ),
    (
        DomainContext::Fitness,
        &["gimnasio", "gym", "fitness", "entrenador", "trainer", "yoga", "crossfit"],
    ),
    (
        DomainContext::Education,
        &["curso", "cursos", "course", "academia", "academy", "escuela", "school", "clases", "tutor"],
    ),
    (
        DomainContext::RealEstate,
        &["inmobiliaria", "real estate", "propiedades", "properties", "departamentos", "apartments", "casas"],
    ),
];

/// Business domain guessed from the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainContext {
    Restaurant,
    Ecommerce,
    Portfolio,
    Saas,
    Health,
    Fitness,
    Education,
    RealEstate,
    General,
}

impl DomainContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainContext::Restaurant => "restaurant",
            DomainContext::Ecommerce => "ecommerce",
            DomainContext::Portfolio => "portfolio",
            DomainContext::Saas => "saas",
            DomainContext::Health => "health",
            DomainContext::Fitness => "fitness",
            DomainContext::Education => "education",
            DomainContext::RealEstate => "real_estate",
            DomainContext::General => "general",
        }
    }
}

/// Specification fields a creation request should state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecField {
    Objective,
    Resources,
    Style,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Low,
    High,
}

/// Everything phase 1 learns about a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAnalysis {
    pub intent: Intent,
    pub context: DomainContext,
    pub language: Language,
    pub urgency: Urgency,
    pub detail_level: DetailLevel,
    pub missing_fields: Vec<SpecField>,
    pub requires_research: bool,
    pub requires_clarification: bool,
    /// Summary handed over by the project-analysis collaborator
    pub project_summary: Option<String>,
}

fn field_regex(field: SpecField) -> &'static Regex {
    static OBJECTIVE: OnceLock<Regex> = OnceLock::new();
    static RESOURCES: OnceLock<Regex> = OnceLock::new();
    static STYLE: OnceLock<Regex> = OnceLock::new();

    let (cell, pattern) = match field {
        SpecField::Objective => (
            &OBJECTIVE,
            r"(?i)\b(objetivo|meta|goal|purpose|prop[oó]sito)\b|\bpara (vender|captar|conseguir|aumentar|generar|atraer|mostrar)\b|\bto (sell|attract|increase|generate|get|showcase)\b|\bquiero que\b",
        ),
        SpecField::Resources => (
            &RESOURCES,
            r"(?i)\b(tengo|cuento con|i have|logo|fotos|im[aá]genes|images|photos|textos|contenido|content|copy)\b",
        ),
        SpecField::Style => (
            &STYLE,
            r"(?i)\b(estilo|style|moderno|modern|minimalista|minimal|elegante|elegant|oscuro|dark|claro|light|colores|colors|colou?r|r[uú]stico|rustic|corporativo|corporate)\b",
        ),
    };
    cell.get_or_init(|| Regex::new(pattern).expect("spec field regex is valid"))
}

pub fn detect_context(message: &str) -> DomainContext {
    let lowered = message.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .collect();
    for (context, keywords) in CONTEXTS {
        let hit = keywords.iter().any(|kw| {
            if kw.contains(' ') {
                lowered.contains(kw)
            } else {
                words.contains(kw)
            }
        });
        if hit {
            return *context;
        }
    }
    DomainContext::General
}

pub fn missing_fields(message: &str) -> Vec<SpecField> {
    [SpecField::Objective, SpecField::Resources, SpecField::Style]
        .into_iter()
        .filter(|f| !field_regex(*f).is_match(message))
        .collect()
}

/// Build the phase 1 analysis for an already classified intent.
pub fn analyze(intent: Intent, project_summary: Option<String>) -> RequestAnalysis {
    let message = intent.original_message.clone();
    let missing = missing_fields(&message);
    let word_count = message.split_whitespace().count();

    let detail_level = if word_count < LOW_DETAIL_WORDS || missing.len() >= 2 {
        DetailLevel::Low
    } else {
        DetailLevel::High
    };

    let is_creation = intent.intent_type.is_creation();
    let requires_research = is_creation && detail_level == DetailLevel::Low;
    let requires_clarification = is_creation && missing.contains(&SpecField::Objective);

    RequestAnalysis {
        context: detect_context(&message),
        language: extract::language(&message),
        urgency: extract::urgency(&message),
        detail_level,
        missing_fields: missing,
        requires_research,
        requires_clarification,
        project_summary,
        intent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IntentType;
    use crate::intent::IntentClassifier;

    #[test]
    fn test_restaurant_landing_requires_clarification() {
        let mut classifier = IntentClassifier::new();
        let intent =
            classifier.classify("Necesito crear una landing page para mi restaurante con reservas");
        let analysis = analyze(intent, None);

        assert_eq!(analysis.intent.intent_type, IntentType::CreateLanding);
        assert_eq!(analysis.context, DomainContext::Restaurant);
        assert!(analysis.requires_clarification);
        assert!(analysis.requires_research);
        assert!(analysis.missing_fields.contains(&SpecField::Objective));
        assert_eq!(analysis.language, Language::Es);
    }

    #[test]
    fn test_explicit_objective_skips_clarification() {
        let mut classifier = IntentClassifier::new();
        let intent = classifier.classify(
            "Crea una landing para mi gimnasio, el objetivo es captar socios, estilo moderno y oscuro, tengo logo",
        );
        let analysis = analyze(intent, None);
        assert_eq!(analysis.context, DomainContext::Fitness);
        assert!(!analysis.requires_clarification);
        assert!(analysis.missing_fields.is_empty());
    }

    #[test]
    fn test_non_creation_never_needs_research() {
        let mut classifier = IntentClassifier::new();
        let intent = classifier.classify("arregla el error en app.py");
        let analysis = analyze(intent, None);
        assert!(!analysis.requires_research);
        assert!(!analysis.requires_clarification);
    }

    #[test]
    fn test_context_matches_whole_words_only() {
        assert_eq!(detect_context("a barbershop page"), DomainContext::General);
        assert_eq!(detect_context("página para mi bar"), DomainContext::Restaurant);
    }
}
