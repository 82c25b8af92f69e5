//! Query Orchestrator (C10)
//!
//! Ties the classifier (C6), template responder (C7), fallback decision
//! engine (C8) and VLM fallback client (C9) together into the
//! instant-response loop's single entry point: one query in, one
//! [`QueryResponse`] out.

use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::knowledge::{KnowledgeStore, TaskKnowledge, TaskStep};
use crate::query::classifier::{classify_with_confidence, QueryIntent};
use crate::query::fallback::{decide, FallbackDecision, VlmFallbackClient};
use crate::query::responder::render;
use crate::tracker::StateTracker;
use crate::vlm::VlmClient;

/// Queries longer than this are truncated before classification and
/// escalation.
const MAX_QUERY_BYTES: usize = 10 * 1024;

/// The source that produced a query's answer, surfaced so callers (and
/// tests) can distinguish a fast templated answer from a VLM escalation
/// without parsing the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseSource {
    Template,
    Vlm,
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub text: String,
    pub source: ResponseSource,
    /// The intent the classifier assigned this query (spec.md §4.10 step 6,
    /// §6 Boundary 4 — a mandatory field on the response record).
    pub intent: QueryIntent,
    pub intent_recognized: bool,
    /// The classifier's confidence for templated answers; `1.0` for VLM
    /// answers (the VLM either answered or a soft-failure was returned —
    /// there is no partial-confidence notion on that path).
    pub confidence: f32,
    /// Wall-clock time spent inside `answer`, in milliseconds.
    pub processing_time_ms: u64,
}

const DEFAULT_FALLBACK_SYSTEM_PROMPT: &str =
    "You are answering one question about the user's current real-world task. \
     Be concise and concrete. If you do not know, say so plainly.";

/// Compose the whiteboard state into the fallback system prompt (spec.md
/// §4.9: "the current whiteboard state if present — task display name,
/// step id, step title, tools needed"). Falls back to the bare default
/// prompt when no task is currently tracked.
fn compose_fallback_prompt(task: Option<&TaskKnowledge>, step: Option<&TaskStep>) -> String {
    let (Some(task), Some(step)) = (task, step) else {
        return DEFAULT_FALLBACK_SYSTEM_PROMPT.to_string();
    };
    let tools = if step.tools_needed.is_empty() {
        "none listed".to_string()
    } else {
        step.tools_needed.join(", ")
    };
    format!(
        "{DEFAULT_FALLBACK_SYSTEM_PROMPT}\n\nCurrent whiteboard state: task \"{}\", step {} \
         (\"{}\"), tools needed: {}.",
        task.display_name,
        step.step_id,
        step.title,
        tools
    )
}

pub struct QueryOrchestrator<C> {
    knowledge: KnowledgeStore,
    tracker: StateTracker,
    vlm: VlmFallbackClient<C>,
}

impl<C: VlmClient> QueryOrchestrator<C> {
    pub fn new(knowledge: KnowledgeStore, tracker: StateTracker, vlm: VlmFallbackClient<C>) -> Self {
        Self {
            knowledge,
            tracker,
            vlm,
        }
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }

    pub fn knowledge(&self) -> &KnowledgeStore {
        &self.knowledge
    }

    /// Answer one user query end to end. Equivalent to
    /// [`Self::answer_cancellable`] with a token that never fires.
    pub async fn answer(&self, query: &str) -> QueryResponse {
        self.answer_cancellable(query, &CancellationToken::new()).await
    }

    /// Answer one user query end to end, aborting a VLM escalation (and
    /// returning the canonical soft-failure response) if `cancel_token`
    /// fires first. The template path never suspends, so cancellation only
    /// has an observable effect once the fallback decision engine (C8) has
    /// chosen to escalate.
    pub async fn answer_cancellable(&self, query: &str, cancel_token: &CancellationToken) -> QueryResponse {
        let started = Instant::now();
        let query = truncate_query(query);
        let (intent, intent_confidence) = classify_with_confidence(query);
        let state = self.tracker.snapshot().await;

        let task = state
            .task_name
            .as_deref()
            .and_then(|name| self.knowledge.get(name));
        let step = match (task, state.step_id) {
            (Some(task), Some(step_id)) => task.get_step(step_id),
            _ => None,
        };

        let template = render(intent, &state, task, step);
        let decision = decide(intent, intent_confidence, query, template.as_ref(), task.is_some());
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match decision {
            FallbackDecision::UseTemplate => {
                let text = template
                    .map(|t| t.text)
                    .unwrap_or_else(|| "Nothing to report yet.".to_string());
                QueryResponse {
                    text,
                    source: ResponseSource::Template,
                    intent,
                    intent_recognized: intent != QueryIntent::Unknown,
                    confidence: intent_confidence,
                    processing_time_ms: elapsed_ms,
                }
            }
            FallbackDecision::EscalateToVlm { reason } => {
                tracing::debug!(?intent, confidence = intent_confidence, ?reason, "escalating query to VLM");
                let fallback_prompt = compose_fallback_prompt(task, step);
                match self
                    .vlm
                    .escalate_cancellable(query, fallback_prompt, cancel_token)
                    .await
                {
                    Ok(response) => QueryResponse {
                        text: response.text,
                        source: ResponseSource::Vlm,
                        intent,
                        intent_recognized: intent != QueryIntent::Unknown,
                        confidence: 1.0,
                        processing_time_ms: started.elapsed().as_millis() as u64,
                    },
                    Err(_) => QueryResponse {
                        text: "I can't reach the assistant model right now and don't have \
                               enough information to answer from state alone. Please try again \
                               shortly."
                            .to_string(),
                        source: ResponseSource::Unavailable,
                        intent,
                        intent_recognized: intent != QueryIntent::Unknown,
                        confidence: 1.0,
                        processing_time_ms: started.elapsed().as_millis() as u64,
                    },
                }
            }
        };

        tracing::info!(
            ?intent,
            intent_confidence,
            source = ?response.source,
            processing_time_ms = response.processing_time_ms,
            "answered query"
        );

        response
    }
}

/// Truncate an over-length query to `MAX_QUERY_BYTES`, on a UTF-8 char
/// boundary so the result is always valid `&str`.
fn truncate_query(query: &str) -> &str {
    if query.len() <= MAX_QUERY_BYTES {
        return query;
    }
    let mut end = MAX_QUERY_BYTES;
    while !query.is_char_boundary(end) {
        end -= 1;
    }
    &query[..end]
}
