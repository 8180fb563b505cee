//! Pattern-based intent classification.
//!
//! Every intent owns an ordered list of regular expressions. Each hit adds
//! `HIT_WEIGHT` to that intent's score (capped at 1.0). The highest score
//! wins and ties go to whichever rule is declared first in `RULES`.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::domain::{Intent, IntentType};

use super::extract;

/// Score contributed by a single pattern match.
pub const HIT_WEIGHT: f64 = 0.3;

/// Scores below this are reported as ambiguous.
pub const MIN_CONFIDENCE: f64 = 0.3;

/// Default number of classifications kept for inspection.
pub const DEFAULT_HISTORY_CAP: usize = 200;

/// Ordered (intent, patterns) table. Order is the tie-break.
const RULES: &[(IntentType, &[&str])] = &[
    (
        IntentType::CreateLanding,
        &[
            r"\blanding\b",
            r"p[aá]gina de (aterrizaje|inicio|presentaci[oó]n)",
            r"\b(crea|crear|cr[eé]ame|haz|hazme|hacer|necesito|quiero|build|create|make)\b.{0,40}\b(landing|p[aá]gina|web ?site|sitio)\b",
            r"\bone[- ]?page\b",
        ],
    ),
    (
        IntentType::CreateWebApp,
        &[
            r"\b(aplicaci[oó]n|app|webapp|dashboard|panel)\b",
            r"\b(crea|crear|haz|hazme|hacer|build|create|make)\b.{0,40}\b(aplicaci[oó]n|app|dashboard|sistema|system)\b",
            r"\b(login|registro|carrito|cart|crud)\b",
        ],
    ),
    (
        IntentType::CreateBot,
        &[
            r"\bbot\b",
            r"\b(telegram|discord|whatsapp|chatbot)\b",
            r"\b(crea|crear|haz|hacer|build|create|make)\b.{0,40}\b(bot|asistente|assistant)\b",
        ],
    ),
    (
        IntentType::CreateApi,
        &[
            r"\bapi\b",
            r"\b(endpoint|endpoints|rest|graphql|backend|servidor|server)\b",
            r"\b(crea|crear|haz|hacer|build|create|make)\b.{0,40}\b(api|endpoint|backend|servicio|service)\b",
        ],
    ),
    (
        IntentType::ModifyExisting,
        &[
            r"\b(modifica|modificar|cambia|cambiar|actualiza|actualizar|agrega|agregar|a[nñ]ade|a[nñ]adir|elimina|eliminar|quita|quitar|renombra|renombrar)\b",
            r"\b(modify|change|update|add|remove|rename|refactor|edit)\b",
            r"\b(en el archivo|in the file|existente|existing)\b",
        ],
    ),
    (
        IntentType::DebugFix,
        &[
            r"\b(error|errores|bug|bugs|fallo|falla|crash|exception|excepci[oó]n|traceback)\b",
            r"\b(arregla|arreglar|corrige|corregir|repara|reparar|fix|debug|depura|depurar)\b",
            r"\b(no funciona|no sirve|doesn'?t work|not working|broken|roto)\b",
        ],
    ),
    (
        IntentType::Explain,
        &[
            r"\b(explica|expl[ií]came|explicar|explain|describe|describir)\b",
            r"\b(c[oó]mo funciona|how does|what does|qu[eé] hace)\b",
        ],
    ),
    (
        IntentType::Question,
        &[
            r"^\s*¿",
            r"\?\s*$",
            r"\b(qu[eé]|c[oó]mo|cu[aá]l|cu[aá]ndo|d[oó]nde|por qu[eé]|what|how|which|when|where|why)\b",
        ],
    ),
    (
        IntentType::Deploy,
        &[
            r"\b(deploy|despliega|desplegar|despliegue|publica|publicar|publish)\b",
            r"\b(hosting|servidor en producci[oó]n|production|producci[oó]n|vercel|netlify|heroku|docker)\b",
        ],
    ),
];

/// One recorded classification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationRecord {
    pub message: String,
    pub intent_type: IntentType,
    pub confidence: f64,
    pub classified_at: DateTime<Utc>,
}

/// Deterministic classifier with a bounded record of past decisions.
pub struct IntentClassifier {
    rules: Vec<(IntentType, Vec<Regex>)>,
    history: VecDeque<ClassificationRecord>,
    history_cap: usize,
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self::with_history_cap(DEFAULT_HISTORY_CAP)
    }

    pub fn with_history_cap(history_cap: usize) -> Self {
        let rules = RULES
            .iter()
            .map(|(intent_type, patterns)| {
                let compiled = patterns
                    .iter()
                    .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!("Invalid intent pattern '{}': {}", p, e);
                            None
                        }
                    })
                    .collect();
                (*intent_type, compiled)
            })
            .collect();

        Self {
            rules,
            history: VecDeque::new(),
            history_cap,
        }
    }

    /// Score `message` against every rule. Scores keep declaration order.
    pub fn scores(&self, message: &str) -> Vec<(IntentType, f64)> {
        let lowered = message.to_lowercase();
        self.rules
            .iter()
            .map(|(intent_type, patterns)| {
                let hits: usize = patterns.iter().map(|p| p.find_iter(&lowered).count()).sum();
                (*intent_type, (hits as f64 * HIT_WEIGHT).min(1.0))
            })
            .collect()
    }

    /// Classify a raw message.
    pub fn classify(&mut self, message: &str) -> Intent {
        let scores = self.scores(message);

        // Strict `>` keeps the first declared rule on ties.
        let mut best: Option<(IntentType, f64)> = None;
        for (intent_type, score) in &scores {
            if *score > best.map(|(_, s)| s).unwrap_or(0.0) {
                best = Some((*intent_type, *score));
            }
        }

        let keywords = extract::keywords(message);
        let (intent_type, confidence) = match best {
            None => (IntentType::Ambiguous, 0.0),
            Some((_, score)) if score < MIN_CONFIDENCE => (IntentType::Ambiguous, score),
            Some(found) => found,
        };

        let intent = Intent {
            intent_type,
            confidence,
            keywords,
            target_file: extract::file_reference(message),
            target_function: extract::function_reference(message),
            original_message: message.to_string(),
        };

        debug!(
            "Classified message as {} (confidence {:.2})",
            intent.intent_type, intent.confidence
        );
        self.record(&intent);
        intent
    }

    fn record(&mut self, intent: &Intent) {
        if self.history_cap == 0 {
            return;
        }
        if self.history.len() >= self.history_cap {
            self.history.pop_front();
        }
        self.history.push_back(ClassificationRecord {
            message: intent.original_message.clone(),
            intent_type: intent.intent_type,
            confidence: intent.confidence,
            classified_at: Utc::now(),
        });
    }

    pub fn history(&self) -> impl Iterator<Item = &ClassificationRecord> {
        self.history.iter()
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_is_ambiguous_with_zero_confidence() {
        let mut classifier = IntentClassifier::new();
        let intent = classifier.classify("zzz qqq 123");
        assert_eq!(intent.intent_type, IntentType::Ambiguous);
        assert_eq!(intent.confidence, 0.0);
    }

    #[test]
    fn test_confidence_is_capped() {
        let mut classifier = IntentClassifier::new();
        let intent = classifier
            .classify("error bug fallo crash, arregla el error, fix the bug, no funciona, broken");
        assert_eq!(intent.intent_type, IntentType::DebugFix);
        assert!(intent.confidence <= 1.0);
        assert_eq!(intent.confidence, 1.0);
    }

    #[test]
    fn test_landing_request() {
        let mut classifier = IntentClassifier::new();
        let intent =
            classifier.classify("Necesito crear una landing page para mi restaurante con reservas");
        assert_eq!(intent.intent_type, IntentType::CreateLanding);
        assert!(intent.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn test_tie_break_follows_declaration_order() {
        let classifier = IntentClassifier::new();
        // "bot" and "api" each score exactly one hit.
        let scores = classifier.scores("bot api");
        let bot = scores.iter().find(|(t, _)| *t == IntentType::CreateBot).unwrap();
        let api = scores.iter().find(|(t, _)| *t == IntentType::CreateApi).unwrap();
        assert_eq!(bot.1, api.1);

        let mut classifier = IntentClassifier::new();
        let intent = classifier.classify("bot api");
        assert_eq!(intent.intent_type, IntentType::CreateBot);
    }

    #[test]
    fn test_extracts_target_file() {
        let mut classifier = IntentClassifier::new();
        let intent = classifier.classify("arregla el error en app.py");
        assert_eq!(intent.intent_type, IntentType::DebugFix);
        assert_eq!(intent.target_file.as_deref(), Some("app.py"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut classifier = IntentClassifier::with_history_cap(2);
        classifier.classify("one landing");
        classifier.classify("two bot");
        classifier.classify("three api");
        let messages: Vec<_> = classifier.history().map(|r| r.message.clone()).collect();
        assert_eq!(messages, vec!["two bot", "three api"]);
    }

    #[test]
    fn test_confidence_always_in_range() {
        let mut classifier = IntentClassifier::new();
        for msg in [
            "",
            "?",
            "crea una app con login y registro y carrito y dashboard",
            "deploy to production with docker on heroku",
        ] {
            let intent = classifier.classify(msg);
            assert!((0.0..=1.0).contains(&intent.confidence), "{}", msg);
        }
    }
}
