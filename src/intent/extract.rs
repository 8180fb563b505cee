//! Secondary extractions that run independently of the intent score.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Maximum number of keywords kept per message.
pub const MAX_KEYWORDS: usize = 10;

const STOP_WORDS: &[&str] = &[
    // es
    "el", "la", "los", "las", "un", "una", "unos", "unas", "de", "del", "al", "en", "con", "por",
    "para", "que", "y", "o", "a", "mi", "mis", "tu", "su", "se", "es", "me", "lo", "le", "les",
    "como", "más", "mas", "pero", "sin", "sobre", "este", "esta", "esto", "ese", "esa", "eso",
    "necesito", "quiero", "hazme", "favor", "por favor",
    // en
    "the", "an", "of", "to", "in", "on", "for", "with", "and", "or", "is", "are", "my", "your",
    "it", "this", "that", "i", "me", "please", "need", "want", "can", "you",
];

const SPANISH_WORDS: &[&str] = &[
    "el", "la", "los", "las", "una", "para", "con", "que", "necesito", "quiero", "crear", "haz",
    "página", "pagina", "mi", "por", "archivo", "error", "cómo", "como", "del",
];

const ENGLISH_WORDS: &[&str] = &[
    "the", "a", "an", "for", "with", "that", "need", "want", "create", "make", "page", "my",
    "please", "file", "how", "build", "of", "is",
];

const URGENT_WORDS: &[&str] = &[
    "urgente", "urgent", "asap", "ya mismo", "rápido", "rapido", "inmediato", "immediately",
    "hoy", "today", "cuanto antes",
];

/// Detected message language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Es,
    En,
}

/// Coarse urgency flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Alta,
    Media,
}

fn file_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b([\w./-]+\.(?:py|js|jsx|ts|tsx|mjs|html|htm|css|scss|json|md|txt|yml|yaml|toml|rs|go|java|php|rb|vue|svelte|sh|sql|xml))\b",
        )
        .expect("file reference regex is valid")
    })
}

fn function_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:funci[oó]n|function|m[eé]todo|method|clase|class|def|fn)\s+`?([A-Za-z_][A-Za-z0-9_]*)`?|\b([A-Za-z_][A-Za-z0-9_]*)\(\)",
        )
        .expect("function reference regex is valid")
    })
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}_]+").expect("word regex is valid"))
}

/// First file-looking token, e.g. `src/app.py`.
pub fn file_reference(message: &str) -> Option<String> {
    file_regex()
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_start_matches("./").to_string())
}

/// Function or class named in the message, e.g. `función calcularTotal` or `main()`.
pub fn function_reference(message: &str) -> Option<String> {
    function_regex().captures(message).and_then(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().to_string())
    })
}

/// Ordered, de-duplicated, stop-word filtered keywords.
pub fn keywords(message: &str) -> Vec<String> {
    let lowered = message.to_lowercase();
    let mut out: Vec<String> = Vec::new();
    for word in word_regex().find_iter(&lowered) {
        let word = word.as_str();
        if word.chars().count() < 3 || STOP_WORDS.contains(&word) {
            continue;
        }
        if out.iter().any(|w| w == word) {
            continue;
        }
        out.push(word.to_string());
        if out.len() >= MAX_KEYWORDS {
            break;
        }
    }
    out
}

/// Two bag-of-words vote. Ties and empty input default to Spanish.
pub fn language(message: &str) -> Language {
    let lowered = message.to_lowercase();
    let words: Vec<&str> = word_regex().find_iter(&lowered).map(|m| m.as_str()).collect();
    let es = words.iter().filter(|w| SPANISH_WORDS.contains(w)).count();
    let en = words.iter().filter(|w| ENGLISH_WORDS.contains(w)).count();
    if en > es {
        Language::En
    } else {
        Language::Es
    }
}

pub fn urgency(message: &str) -> Urgency {
    let lowered = message.to_lowercase();
    if URGENT_WORDS.iter().any(|w| lowered.contains(w)) {
        Urgency::Alta
    } else {
        Urgency::Media
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_reference() {
        assert_eq!(
            file_reference("revisa ./src/utils/helpers.js por favor").as_deref(),
            Some("src/utils/helpers.js")
        );
        assert_eq!(file_reference("sin archivo"), None);
    }

    #[test]
    fn test_function_reference() {
        assert_eq!(
            function_reference("elimina la función calcularTotal").as_deref(),
            Some("calcularTotal")
        );
        assert_eq!(
            function_reference("why does parse_args() fail").as_deref(),
            Some("parse_args")
        );
        assert_eq!(function_reference("nothing here"), None);
    }

    #[test]
    fn test_keywords_are_filtered_and_capped() {
        let kws = keywords("Necesito crear una landing page para mi restaurante con reservas");
        assert_eq!(kws, vec!["crear", "landing", "page", "restaurante", "reservas"]);

        let long = (0..30).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        assert_eq!(keywords(&long).len(), MAX_KEYWORDS);
    }

    #[test]
    fn test_language_guess() {
        assert_eq!(language("Necesito crear una página para mi tienda"), Language::Es);
        assert_eq!(language("Please create a page for my shop"), Language::En);
    }

    #[test]
    fn test_urgency() {
        assert_eq!(urgency("lo necesito URGENTE"), Urgency::Alta);
        assert_eq!(urgency("cuando puedas"), Urgency::Media);
    }
}
