//! Query Classifier (C6)
//!
//! A deterministic, dependency-free keyword classifier — no ML model, no
//! regex crate. Plain lowercase/`contains` matching is enough for a closed
//! set of intents, and keeps the instant-response loop's p50 well under the
//! VLM's round trip.
//!
//! Locale is detected with a coarse non-ASCII heuristic (second supported
//! locale is Spanish) rather than a full language-id model — good enough
//! to pick between two keyword lists.

/// The closed set of recognizable query intents (spec.md §4.6's seven
/// intents — CURRENT_STEP, NEXT_STEP, REQUIRED_TOOLS, COMPLETION_STATUS,
/// PROGRESS_OVERVIEW, HELP, UNKNOWN — unchanged from the original spec).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryIntent {
    WhatStepAmIOn,
    WhatsNext,
    AmIDoneWithThisStep,
    WhatToolsNeeded,
    ProgressOverview,
    Help,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    English,
    Spanish,
}

/// One intent's weighted phrase lists. Matching is substring-based; the
/// first intent whose phrase list matches at least once (in declaration
/// order) wins. Confidence is `matched_count / max_matches`, clipped to
/// `1.0` — recognizing one clear keyword phrase is already enough to act
/// on (a single hit clears `max_matches == 2` at `0.5`), and a query that
/// hits several of an intent's phrases saturates to full confidence.
struct IntentPhrases {
    intent: QueryIntent,
    max_matches: usize,
    english: &'static [&'static str],
    spanish: &'static [&'static str],
}

const INTENT_TABLE: &[IntentPhrases] = &[
    IntentPhrases {
        intent: QueryIntent::Help,
        max_matches: 2,
        english: &["help", "what can you do", "what commands", "how does this work"],
        spanish: &["ayuda", "que puedes hacer", "como funciona esto"],
    },
    IntentPhrases {
        intent: QueryIntent::WhatStepAmIOn,
        max_matches: 2,
        english: &["what step am i on", "where am i", "current step", "what step"],
        spanish: &["en que paso estoy", "donde estoy", "paso actual"],
    },
    IntentPhrases {
        intent: QueryIntent::WhatsNext,
        max_matches: 2,
        english: &["what's next", "whats next", "next step", "what do i do next"],
        spanish: &["que sigue", "siguiente paso", "que hago despues"],
    },
    IntentPhrases {
        intent: QueryIntent::ProgressOverview,
        max_matches: 2,
        english: &["how am i doing", "show my progress", "progress overview", "overall progress"],
        spanish: &["como voy", "mi progreso", "resumen del progreso"],
    },
    IntentPhrases {
        intent: QueryIntent::AmIDoneWithThisStep,
        max_matches: 2,
        english: &["am i done", "is this step done", "did i finish", "completed this"],
        spanish: &["ya termine", "esta listo este paso", "termine este paso"],
    },
    IntentPhrases {
        intent: QueryIntent::WhatToolsNeeded,
        max_matches: 2,
        english: &["what tools", "what do i need", "which tools", "equipment needed"],
        spanish: &["que herramientas", "que necesito", "equipo necesario"],
    },
];

/// Detects the query's likely locale via a non-ASCII character heuristic:
/// any accented Latin character (á é í ó ú ñ ¿ ¡) flips the classifier to
/// the Spanish phrase lists. Ambiguous input (no accented characters)
/// defaults to English.
pub fn detect_locale(query: &str) -> Locale {
    let has_latin_accents = query.chars().any(|c| {
        matches!(
            c,
            'á' | 'é' | 'í' | 'ó' | 'ú' | 'ñ' | 'Á' | 'É' | 'Í' | 'Ó' | 'Ú' | 'Ñ' | '¿' | '¡'
        )
    });
    if has_latin_accents {
        Locale::Spanish
    } else {
        Locale::English
    }
}

/// Classify `query` into one of the known intents plus a confidence in
/// `[0, 1]`. `Unknown` always carries confidence `0.0`.
pub fn classify_with_confidence(query: &str) -> (QueryIntent, f32) {
    let lower = query.to_lowercase();
    let locale = detect_locale(&lower);

    for entry in INTENT_TABLE {
        let phrases: &[&str] = match locale {
            Locale::English => entry.english,
            Locale::Spanish => entry.spanish,
        };
        let matched = phrases.iter().filter(|p| lower.contains(**p)).count();
        if matched > 0 {
            let confidence = (matched as f32 / entry.max_matches as f32).min(1.0);
            return (entry.intent, confidence);
        }
    }

    (QueryIntent::Unknown, 0.0)
}

/// Classify `query` into one of the known intents, discarding confidence.
/// Unknown queries (anything not matching a known phrase) escalate to the
/// VLM fallback path.
pub fn classify(query: &str) -> QueryIntent {
    classify_with_confidence(query).0
}
