//! Instant-response loop (C6-C10)
//!
//! Query classification, templated answers, the fallback decision engine,
//! the VLM escalation client, and the orchestrator tying them together.

mod classifier;
mod fallback;
mod orchestrator;
mod responder;

pub use classifier::{classify, classify_with_confidence, detect_locale, Locale, QueryIntent};
pub use fallback::{
    decide, EscalationReason, FallbackDecision, FallbackError, ObservationPromptGuard,
    VlmFallbackClient,
};
pub use orchestrator::{QueryOrchestrator, QueryResponse, ResponseSource};
pub use responder::{render, TemplateResponse};
