//! Static knowledge base used by the research phase.

use serde::Serialize;

use crate::intent::{DomainContext, RequestAnalysis};

struct Knowledge {
    style: &'static str,
    palette: &'static [&'static str],
    sections: &'static [&'static str],
    features: &'static [&'static str],
}

const KNOWLEDGE: &[(DomainContext, Knowledge)] = &[
    (
        DomainContext::Restaurant,
        Knowledge {
            style: "warm, appetizing, large food photography",
            palette: &["#8B2E16", "#F4E9D8", "#2F2F2F", "#D9A441"],
            sections: &["hero with signature dish", "menu", "reservations", "location and hours", "reviews"],
            features: &["reservation form", "click-to-call button", "embedded map"],
        },
    ),
    (
        DomainContext::Ecommerce,
        Knowledge {
            style: "clean grid, strong product focus, clear calls to action",
            palette: &["#111827", "#FFFFFF", "#F97316", "#E5E7EB"],
            sections: &["hero with offer", "featured products", "categories", "testimonials", "shipping info"],
            features: &["product cards", "cart counter", "newsletter signup"],
        },
    ),
    (
        DomainContext::Portfolio,
        Knowledge {
            style: "minimal, generous whitespace, work first",
            palette: &["#0F172A", "#F8FAFC", "#6366F1"],
            sections: &["intro", "selected work", "about", "contact"],
            features: &["project gallery", "contact form"],
        },
    ),
    (
        DomainContext::Saas,
        Knowledge {
            style: "modern gradient hero, product screenshots, trust signals",
            palette: &["#1E3A8A", "#FFFFFF", "#22D3EE", "#F1F5F9"],
            sections: &["hero with value proposition", "features", "pricing", "faq", "call to action"],
            features: &["pricing table", "signup form", "feature comparison"],
        },
    ),
    (
        DomainContext::Health,
        Knowledge {
            style: "calm, trustworthy, soft colors",
            palette: &["#0E7490", "#ECFEFF", "#FFFFFF", "#334155"],
            sections: &["hero", "services", "team", "appointments", "contact"],
            features: &["appointment form", "opening hours", "emergency contact"],
        },
    ),
    (
        DomainContext::Fitness,
        Knowledge {
            style: "energetic, high contrast, bold typography",
            palette: &["#111111", "#FACC15", "#FFFFFF", "#EF4444"],
            sections: &["hero", "classes", "schedule", "trainers", "membership plans"],
            features: &["class schedule", "membership pricing", "trial signup"],
        },
    ),
    (
        DomainContext::Education,
        Knowledge {
            style: "friendly, structured, readable",
            palette: &["#1D4ED8", "#FEF3C7", "#FFFFFF", "#1F2937"],
            sections: &["hero", "courses", "methodology", "instructors", "enrollment"],
            features: &["course catalog", "enrollment form", "testimonials"],
        },
    ),
    (
        DomainContext::RealEstate,
        Knowledge {
            style: "elegant, photo-led, spacious",
            palette: &["#0B3954", "#FFFFFF", "#BFD7EA", "#E0A458"],
            sections: &["hero with search", "featured listings", "services", "agents", "contact"],
            features: &["listing cards", "property filter", "contact form"],
        },
    ),
];

const GENERAL: Knowledge = Knowledge {
    style: "modern, clean, mobile-first",
    palette: &["#111827", "#FFFFFF", "#3B82F6", "#F3F4F6"],
    sections: &["hero", "about", "features", "contact"],
    features: &["contact form", "responsive navigation"],
};

/// Recommendations produced by the research phase.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchNotes {
    pub context: DomainContext,
    pub style: String,
    pub palette: Vec<String>,
    pub sections: Vec<String>,
    pub features: Vec<String>,
}

pub fn research(analysis: &RequestAnalysis) -> ResearchNotes {
    let knowledge = KNOWLEDGE
        .iter()
        .find(|(context, _)| *context == analysis.context)
        .map(|(_, k)| k)
        .unwrap_or(&GENERAL);

    let to_vec = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    ResearchNotes {
        context: analysis.context,
        style: knowledge.style.to_string(),
        palette: to_vec(knowledge.palette),
        sections: to_vec(knowledge.sections),
        features: to_vec(knowledge.features),
    }
}

impl ResearchNotes {
    pub fn summary(&self) -> String {
        format!(
            "{} style; sections: {}",
            self.style,
            self.sections.join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Intent, IntentType};
    use crate::intent::analyze;

    fn analysis_for(message: &str) -> RequestAnalysis {
        analyze(
            Intent {
                intent_type: IntentType::CreateLanding,
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
    fn test_restaurant_knowledge() {
        let notes = research(&analysis_for("landing para mi restaurante"));
        assert_eq!(notes.context, DomainContext::Restaurant);
        assert!(notes.sections.iter().any(|s| s == "reservations"));
    }

    #[test]
    fn test_unknown_context_uses_general() {
        let notes = research(&analysis_for("una landing bonita"));
        assert_eq!(notes.context, DomainContext::General);
        assert_eq!(notes.style, "modern, clean, mobile-first");
    }
}
