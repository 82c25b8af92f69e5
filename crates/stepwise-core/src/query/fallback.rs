//! Fallback Decision Engine (C8) and VLM Fallback Client (C9)
//!
//! C8 is a pure function: given the classifier's verdict and the
//! template responder's result, decide whether to escalate to the VLM.
//! C9 wraps the actual VLM call with a circuit breaker (rolling failure
//! window + cooldown) and bounded retries, plus an RAII guard that
//! installs/restores the "prompt hygiene" fallback system prompt so a
//! failed escalation can never leave the VLM mid-conversation holding the
//! wrong instructions.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::query::classifier::QueryIntent;
use crate::query::responder::TemplateResponse;
use crate::vlm::{VlmClient, VlmError, VlmRequest, VlmResponse};

/// Whether a query should be answered from the template responder or
/// escalated to the VLM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackDecision {
    UseTemplate,
    EscalateToVlm { reason: EscalationReason },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationReason {
    UnknownIntent,
    LowClassifierConfidence,
    NoCurrentTask,
    LongQueryShortAnswerIntent,
    ExplanatoryMarker,
    TemplateCouldNotRender,
}

/// Intent confidence below this escalates regardless of which intent was
/// picked.
const MIN_INTENT_CONFIDENCE: f32 = 0.40;

/// Queries longer than this, on an intent whose template answer is
/// necessarily short, escalate on the theory that the user wants more
/// detail than a template can give.
const LONG_QUERY_CHARS: usize = 50;

/// Locale-agnostic explanatory markers: their presence suggests the user
/// wants reasoning a template can't provide. Spanish equivalents included
/// since Spanish is the second supported locale.
const EXPLANATORY_MARKERS: &[&str] = &[
    "why",
    "how does",
    "explain",
    "por que",
    "por qué",
    "como funciona",
    "cómo funciona",
    "explica",
];

/// Intents whose templated answer is short enough that a long question
/// doesn't necessarily call for more than the template gives.
fn is_short_answer_intent(intent: QueryIntent) -> bool {
    matches!(
        intent,
        QueryIntent::WhatStepAmIOn | QueryIntent::WhatsNext | QueryIntent::WhatToolsNeeded
    )
}

fn has_explanatory_marker(query: &str) -> bool {
    let lower = query.to_lowercase();
    EXPLANATORY_MARKERS.iter().any(|m| lower.contains(m))
}

/// Decide whether to use the template response or escalate, given the
/// classifier's intent and confidence, the raw query text, whatever the
/// template responder managed to render (or didn't), and whether a task
/// is currently being tracked. Pure — no I/O, no mutable state.
pub fn decide(
    intent: QueryIntent,
    intent_confidence: f32,
    query: &str,
    template: Option<&TemplateResponse>,
    has_current_task: bool,
) -> FallbackDecision {
    if intent == QueryIntent::Unknown {
        return FallbackDecision::EscalateToVlm {
            reason: EscalationReason::UnknownIntent,
        };
    }
    if intent_confidence < MIN_INTENT_CONFIDENCE {
        return FallbackDecision::EscalateToVlm {
            reason: EscalationReason::LowClassifierConfidence,
        };
    }
    if !has_current_task {
        return FallbackDecision::EscalateToVlm {
            reason: EscalationReason::NoCurrentTask,
        };
    }
    if query.chars().count() > LONG_QUERY_CHARS && !is_short_answer_intent(intent) {
        return FallbackDecision::EscalateToVlm {
            reason: EscalationReason::LongQueryShortAnswerIntent,
        };
    }
    if has_explanatory_marker(query) {
        return FallbackDecision::EscalateToVlm {
            reason: EscalationReason::ExplanatoryMarker,
        };
    }
    match template {
        Some(_) => FallbackDecision::UseTemplate,
        None => FallbackDecision::EscalateToVlm {
            reason: EscalationReason::TemplateCouldNotRender,
        },
    }
}

/// Rolling-window circuit breaker over VLM call outcomes. Opens after
/// `failure_threshold` failures within `window`; once open, rejects calls
/// immediately until `cooldown` elapses, then allows one trial call
/// (half-open) whose outcome decides whether to close or re-open.
struct CircuitBreaker {
    failures: VecDeque<Instant>,
    window: Duration,
    failure_threshold: u32,
    cooldown: Duration,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    fn new(failure_threshold: u32, window: Duration, cooldown: Duration) -> Self {
        Self {
            failures: VecDeque::new(),
            window,
            failure_threshold,
            cooldown,
            opened_at: None,
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&front) = self.failures.front() {
            if now.duration_since(front) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns `true` if a call may proceed right now.
    fn allow_call(&mut self) -> bool {
        let now = Instant::now();
        self.prune(now);
        match self.opened_at {
            Some(opened) if now.duration_since(opened) < self.cooldown => false,
            Some(_) => true, // cooldown elapsed: half-open trial
            None => true,
        }
    }

    fn record_success(&mut self) {
        self.failures.clear();
        self.opened_at = None;
    }

    fn record_failure(&mut self) {
        let now = Instant::now();
        self.failures.push_back(now);
        self.prune(now);
        if self.failures.len() as u32 >= self.failure_threshold {
            self.opened_at = Some(now);
        }
    }

    fn is_open(&self) -> bool {
        self.opened_at.is_some()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FallbackError {
    #[error("circuit breaker is open; VLM fallback temporarily disabled")]
    CircuitOpen,
    #[error(transparent)]
    Vlm(#[from] VlmError),
    /// The call was aborted by a cooperative cancel signal rather than
    /// failing on its own.
    #[error("VLM call cancelled")]
    Cancelled,
}

/// RAII guard that swaps in a fallback-specific system prompt for the
/// duration of one VLM escalation and restores the original prompt on
/// every exit path (success, error, or panic-unwind). The guarded string
/// lives behind a `Mutex` so the guard can be held across an `.await`.
pub struct ObservationPromptGuard<'a> {
    slot: &'a Mutex<String>,
    original: String,
}

impl<'a> ObservationPromptGuard<'a> {
    pub fn install(slot: &'a Mutex<String>, fallback_prompt: impl Into<String>) -> Self {
        let mut guard = slot.lock().unwrap();
        let original = guard.clone();
        *guard = fallback_prompt.into();
        drop(guard);
        Self { slot, original }
    }
}

impl Drop for ObservationPromptGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = std::mem::take(&mut self.original);
        }
    }
}

/// VLM fallback client: bounded retries with exponential backoff, behind
/// a circuit breaker. Holds the prompt slot the [`ObservationPromptGuard`]
/// swaps during a call.
pub struct VlmFallbackClient<C> {
    client: C,
    breaker: Mutex<CircuitBreaker>,
    max_retries: u32,
    prompt_slot: Mutex<String>,
}

impl<C: VlmClient> VlmFallbackClient<C> {
    pub fn new(
        client: C,
        max_retries: u32,
        circuit_failure_threshold: u32,
        circuit_window: Duration,
        circuit_cooldown: Duration,
        default_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            breaker: Mutex::new(CircuitBreaker::new(
                circuit_failure_threshold,
                circuit_window,
                circuit_cooldown,
            )),
            max_retries,
            prompt_slot: Mutex::new(default_prompt.into()),
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        self.breaker.lock().unwrap().is_open()
    }

    /// Escalate one query to the VLM, with a dedicated fallback prompt
    /// installed for the duration of the call via RAII guard. Never
    /// cancellable on its own; equivalent to
    /// [`Self::escalate_cancellable`] with a token that never fires.
    pub async fn escalate(
        &self,
        query_prompt: impl Into<String>,
        fallback_system_prompt: impl Into<String>,
    ) -> Result<VlmResponse, FallbackError> {
        self.escalate_cancellable(query_prompt, fallback_system_prompt, &CancellationToken::new())
            .await
    }

    /// Escalate one query to the VLM, aborting the in-flight attempt (and
    /// any pending backoff sleep) if `cancel_token` fires first. The
    /// orchestrator maps [`FallbackError::Cancelled`] to the same canonical
    /// soft-failure text as a timeout or circuit-open, so callers see one
    /// uniform outcome.
    pub async fn escalate_cancellable(
        &self,
        query_prompt: impl Into<String>,
        fallback_system_prompt: impl Into<String>,
        cancel_token: &CancellationToken,
    ) -> Result<VlmResponse, FallbackError> {
        let call_started = Instant::now();
        let _guard = ObservationPromptGuard::install(&self.prompt_slot, fallback_system_prompt);

        if cancel_token.is_cancelled() {
            tracing::info!(outcome = "cancelled", "VLM fallback call");
            return Err(FallbackError::Cancelled);
        }
        if !self.breaker.lock().unwrap().allow_call() {
            tracing::info!(outcome = "circuit_open", "VLM fallback call");
            return Err(FallbackError::CircuitOpen);
        }

        let query_prompt = query_prompt.into();
        let system_prompt = self.prompt_slot.lock().unwrap().clone();
        let mut attempt = 0;
        loop {
            let request = VlmRequest {
                prompt: query_prompt.clone(),
                image_jpeg: None,
                system_prompt: Some(system_prompt.clone()),
            };
            let outcome = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => None,
                result = self.client.complete(request) => Some(result),
            };

            let Some(result) = outcome else {
                return Err(FallbackError::Cancelled);
            };

            match result {
                Ok(response) => {
                    self.breaker.lock().unwrap().record_success();
                    tracing::info!(
                        outcome = "success",
                        attempt,
                        round_trip_ms = call_started.elapsed().as_millis() as u64,
                        "VLM fallback call"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    self.breaker.lock().unwrap().record_failure();
                    attempt += 1;
                    if attempt > self.max_retries {
                        tracing::info!(
                            outcome = "failed",
                            attempt,
                            error = %e,
                            round_trip_ms = call_started.elapsed().as_millis() as u64,
                            "VLM fallback call"
                        );
                        return Err(FallbackError::Vlm(e));
                    }
                    let backoff = Duration::from_millis(100 * 2u64.pow(attempt));
                    tokio::select! {
                        biased;
                        _ = cancel_token.cancelled() => return Err(FallbackError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }
}
