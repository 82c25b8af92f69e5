//! End-to-end scenarios for the dual-loop engine, exercised through the
//! public API only: knowledge loading, matching, tracking, and query
//! answering wired together the way a real caller would.
//!
//! A real text encoder can't be pinned to an exact cosine similarity
//! against one step and zero against every other, which is what these
//! scenarios need to stay deterministic without a model. [`ScriptedEncoder`]
//! below gives every step its own orthogonal 2-D plane so an observation's
//! similarity to exactly one step can be dialed to an exact value.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use stepwise_core::embeddings::EmbeddingError;
use stepwise_core::query::{FallbackError, ResponseSource};
use stepwise_core::vlm::VlmError;
use stepwise_core::prelude::*;

const DIM: usize = 16;

struct ScriptedEncoder {
    vectors: std::collections::HashMap<String, Vec<f32>>,
}

impl ScriptedEncoder {
    fn new() -> Self {
        Self {
            vectors: std::collections::HashMap::new(),
        }
    }

    fn plane(step_id: u32) -> (usize, usize) {
        (2 * step_id as usize, 2 * step_id as usize + 1)
    }

    /// Pin a step's own composed text to its dedicated plane's basis vector.
    fn register_step(&mut self, composed_text: &str, step_id: u32) {
        let (a, _) = Self::plane(step_id);
        let mut v = vec![0.0f32; DIM];
        v[a] = 1.0;
        self.vectors.insert(composed_text.to_string(), v);
    }

    /// Pin an observation to score exactly `cosine` against `step_id` and
    /// exactly 0 against every other registered step.
    fn register_observation(&mut self, text: &str, step_id: u32, cosine: f32) {
        let (a, b) = Self::plane(step_id);
        let mut v = vec![0.0f32; DIM];
        v[a] = cosine;
        v[b] = (1.0 - cosine * cosine).max(0.0).sqrt();
        self.vectors.insert(text.to_string(), v);
    }
}

impl TextEncoder for ScriptedEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text is empty".to_string()));
        }
        Ok(self.vectors.get(text).cloned().unwrap_or_else(|| {
            // Unregistered text (noise) lands on a reserved plane, orthogonal
            // to every step's plane, so it scores 0 against the whole index.
            let mut v = vec![0.0f32; DIM];
            v[DIM - 1] = 1.0;
            v
        }))
    }

    fn model_id(&self) -> &str {
        "scripted-test-v1"
    }

    fn dimensions(&self) -> usize {
        DIM
    }
}

const COFFEE_TASK_YAML: &str = r#"
display_name: "Coffee Brewing"
description: "Pour-over coffee brewing from grind to cup"
difficulty_level: "beginner"
steps:
  - step_id: 1
    title: "Grind the beans"
    task_description: "Grind whole beans to a medium-coarse consistency"
    tools_needed: ["grinder"]
    completion_indicators: ["grounds look uniform"]
    visual_cues: ["coffee grinder", "ground coffee"]
  - step_id: 2
    title: "Boil the water"
    task_description: "Heat water to just off boiling"
    tools_needed: ["kettle"]
    completion_indicators: ["steam rising"]
    visual_cues: ["kettle on stove"]
  - step_id: 3
    title: "Combine grounds and water"
    task_description: "Pour hot water evenly over the grounds in the filter"
    tools_needed: ["dripper", "filter"]
    completion_indicators: ["grounds fully saturated"]
    visual_cues: ["pouring water over grounds"]
  - step_id: 4
    title: "Let it steep"
    task_description: "Let the coffee bloom and drip through for several minutes"
    completion_indicators: ["dripping has slowed to drops"]
    visual_cues: ["coffee dripping into carafe"]
  - step_id: 5
    title: "Press and pour"
    task_description: "Remove the dripper and pour the finished coffee into a cup"
    tools_needed: ["cup"]
    completion_indicators: ["cup is filled"]
    visual_cues: ["pouring coffee into cup"]
  - step_id: 6
    title: "Clean the equipment"
    task_description: "Discard the grounds and rinse the dripper and filter"
    completion_indicators: ["dripper is rinsed"]
    visual_cues: ["rinsing dripper"]
"#;

fn load_coffee_task() -> KnowledgeStore {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("coffee_brewing.yaml"), COFFEE_TASK_YAML).unwrap();
    KnowledgeStore::load(Path::new(dir.path())).unwrap()
}

/// Build a scripted encoder and an index holding every step of `task`, both
/// keyed by the matcher's `task_name::step_id` convention.
fn build_index(task: &TaskKnowledge) -> (ScriptedEncoder, EmbeddingIndex) {
    let mut encoder = ScriptedEncoder::new();
    for step in &task.steps {
        encoder.register_step(&step.composed_text(), step.step_id);
    }
    let mut index = EmbeddingIndex::new(encoder.dimensions());
    for step in &task.steps {
        let v = encoder.encode(&step.composed_text()).unwrap();
        index.upsert(step_key(&task.task_name, step.step_id), v).unwrap();
    }
    (encoder, index)
}

fn vlm(text: &str, max_retries: u32) -> VlmFallbackClient<MockVlmClient> {
    VlmFallbackClient::new(
        MockVlmClient::responding(text),
        max_retries,
        5,
        Duration::from_secs(60),
        Duration::from_secs(30),
        "default fallback prompt",
    )
}

// S1/S2 — simple progression, then a next-step query against that state.
#[tokio::test]
async fn s1_and_s2_progression_and_next_step_query() {
    let store = load_coffee_task();
    let task = store.get("coffee_brewing").unwrap();
    let (mut encoder, index) = build_index(task);
    encoder.register_observation("user is grinding coffee beans", 3, 0.9);
    let cfg = Config::default();

    let matched = find_matching_step(task, "user is grinding coffee beans", &encoder, &index, &cfg)
        .unwrap()
        .unwrap();
    assert_eq!(matched.step_id, 3);
    assert_eq!(matched.confidence, ConfidenceLevel::High);

    let tracker = StateTracker::new(cfg);
    let outcome = tracker
        .process_vlm_observation(&task.task_name, Some(&matched))
        .await;
    assert_eq!(outcome, UpdateOutcome::Initialized);

    let snap = tracker.snapshot().await;
    assert_eq!(snap.state, TrackerState::Tracking);
    assert_eq!(snap.step_id, Some(3));

    let window = tracker.window_snapshot().await;
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].step_id, 3);
    assert_eq!(window[0].confidence, ConfidenceLevel::High);

    let orchestrator = QueryOrchestrator::new(store, tracker, vlm("unused", 0));

    // S1: "what step am I on?" names the current step.
    let response = orchestrator.answer("what step am I on?").await;
    assert_eq!(response.source, ResponseSource::Template);
    assert!(response.text.to_lowercase().contains("step 3"));
    assert!(response.text.contains("Combine grounds and water"));

    // S2: "what's next?" names the following step, built on the same state.
    let response = orchestrator.answer("what's next?").await;
    assert_eq!(response.source, ResponseSource::Template);
    assert!(response.text.contains("step 4"));
    assert!(response.text.contains("Let it steep"));
}

// S3 — a run of low-confidence noise drops the tracker into DEGRADED; a
// single high-confidence match afterward recovers it.
#[tokio::test]
async fn s3_low_confidence_noise_degrades_then_recovers() {
    let store = load_coffee_task();
    let task = store.get("coffee_brewing").unwrap();
    let (mut encoder, index) = build_index(task);
    encoder.register_observation("user is grinding coffee beans", 3, 0.9);
    encoder.register_observation("coffee dripping steadily into the carafe", 4, 0.85);
    let cfg = Config::default();
    let tracker = StateTracker::new(cfg);

    let initial = find_matching_step(task, "user is grinding coffee beans", &encoder, &index, &cfg)
        .unwrap()
        .unwrap();
    tracker
        .process_vlm_observation(&task.task_name, Some(&initial))
        .await;
    assert_eq!(tracker.snapshot().await.step_id, Some(3));

    let noise_observations = [
        "total silence in an empty room",
        "a cat walking across the floor",
        "someone checking their phone",
        "traffic passing outside the window",
        "a door closing somewhere else",
    ];
    let mut last_outcome = UpdateOutcome::NoMatch;
    for obs in noise_observations {
        let matched = find_matching_step(task, obs, &encoder, &index, &cfg).unwrap();
        assert!(matched.is_none(), "noise observation unexpectedly matched a step");
        last_outcome = tracker
            .process_vlm_observation(&task.task_name, matched.as_ref())
            .await;
    }
    assert_eq!(last_outcome, UpdateOutcome::DroppedToDegraded);
    let snap = tracker.snapshot().await;
    assert_eq!(snap.state, TrackerState::Degraded);
    assert_eq!(snap.step_id, Some(3), "whiteboard step must not change while degraded");

    let recovery = find_matching_step(task, "coffee dripping steadily into the carafe", &encoder, &index, &cfg)
        .unwrap()
        .unwrap();
    assert_eq!(recovery.confidence, ConfidenceLevel::High);
    let outcome = tracker
        .process_vlm_observation(&task.task_name, Some(&recovery))
        .await;
    assert_eq!(outcome, UpdateOutcome::RecoveredFromDegraded);
    let snap = tracker.snapshot().await;
    assert_eq!(snap.state, TrackerState::Tracking);
    assert_eq!(snap.step_id, Some(4));
}

// S4 — a same-task forward jump beyond the cap, at only MEDIUM confidence,
// is rejected outright; the whiteboard and window are untouched.
#[tokio::test]
async fn s4_forward_jump_beyond_cap_is_rejected() {
    let store = load_coffee_task();
    let task = store.get("coffee_brewing").unwrap();
    let (mut encoder, index) = build_index(task);
    encoder.register_observation("boiling the kettle water", 2, 0.9);
    encoder.register_observation("rinsing out the dripper", 6, 0.55);
    let cfg = Config::default();
    let tracker = StateTracker::new(cfg);

    let initial = find_matching_step(task, "boiling the kettle water", &encoder, &index, &cfg)
        .unwrap()
        .unwrap();
    tracker
        .process_vlm_observation(&task.task_name, Some(&initial))
        .await;
    assert_eq!(tracker.snapshot().await.step_id, Some(2));

    let jump = find_matching_step(task, "rinsing out the dripper", &encoder, &index, &cfg)
        .unwrap()
        .unwrap();
    assert_eq!(jump.step_id, 6);
    assert_eq!(jump.confidence, ConfidenceLevel::Medium);

    let outcome = tracker
        .process_vlm_observation(&task.task_name, Some(&jump))
        .await;
    assert_eq!(
        outcome,
        UpdateOutcome::RejectedForwardJump {
            attempted_step: 6,
            cap: cfg.max_forward_jump
        }
    );

    let snap = tracker.snapshot().await;
    assert_eq!(snap.step_id, Some(2), "whiteboard must stay on the last accepted step");
    assert_eq!(tracker.window_snapshot().await.len(), 1, "a rejected jump must not append to the window");
}

// S5 — a query the classifier can't bucket (or for which no task is being
// tracked) escalates to the VLM; a VLM failure surfaces the canonical
// soft-failure string rather than propagating an error to the caller.
#[tokio::test]
async fn s5_unanswerable_query_escalates_to_vlm() {
    let store = load_coffee_task();
    let tracker = StateTracker::new(Config::default());
    let orchestrator = QueryOrchestrator::new(
        store,
        tracker,
        vlm("crema forms from CO2 and oils emulsified under brewing pressure", 0),
    );

    let response = orchestrator.answer("explain how espresso crema forms").await;
    assert_eq!(response.source, ResponseSource::Vlm);
    assert_eq!(response.text, "crema forms from CO2 and oils emulsified under brewing pressure");
}

#[tokio::test]
async fn s5_vlm_failure_yields_canonical_soft_failure_text() {
    let store = load_coffee_task();
    let tracker = StateTracker::new(Config::default());
    let vlm = VlmFallbackClient::new(
        MockVlmClient::failing(),
        0,
        5,
        Duration::from_secs(60),
        Duration::from_secs(30),
        "default fallback prompt",
    );
    let orchestrator = QueryOrchestrator::new(store, tracker, vlm);

    let response = orchestrator.answer("explain how espresso crema forms").await;
    assert_eq!(response.source, ResponseSource::Unavailable);
    assert_eq!(
        response.text,
        "I can't reach the assistant model right now and don't have enough information to \
         answer from state alone. Please try again shortly."
    );
}

// S6 — the circuit breaker opens after repeated VLM failures within its
// rolling window and rejects calls without attempting the network; once
// the cooldown elapses, the next call is attempted again.
struct CountingVlmClient {
    calls: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl VlmClient for CountingVlmClient {
    async fn complete(&self, _request: VlmRequest) -> Result<VlmResponse, VlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(VlmError::Transport("forced failure".to_string()))
    }
}

#[tokio::test]
async fn s6_circuit_breaker_opens_then_trials_again_after_cooldown() {
    let calls = Arc::new(AtomicUsize::new(0));
    let client = CountingVlmClient { calls: calls.clone() };
    let breaker_client = VlmFallbackClient::new(
        client,
        0,
        5,
        Duration::from_secs(60),
        Duration::from_millis(50),
        "fallback prompt",
    );

    for _ in 0..5 {
        let _ = breaker_client.escalate("observe the espresso shot", "fallback").await;
    }
    assert!(breaker_client.is_circuit_open());
    let calls_after_five = calls.load(Ordering::SeqCst);
    assert_eq!(calls_after_five, 5);

    let sixth = breaker_client.escalate("sixth query", "fallback").await;
    assert!(matches!(sixth, Err(FallbackError::CircuitOpen)));
    assert_eq!(
        calls.load(Ordering::SeqCst),
        calls_after_five,
        "an open circuit must not attempt the network at all"
    );

    tokio::time::sleep(Duration::from_millis(120)).await;
    let seventh = breaker_client.escalate("seventh query", "fallback").await;
    assert!(seventh.is_err(), "the client still fails, but the call must have been attempted");
    assert_eq!(calls.load(Ordering::SeqCst), calls_after_five + 1);
}

// Boundary: observations below the minimum length are rejected outright;
// the shortest accepted length is attempted (and, here, simply scores below
// the floor since no vector is registered for it).
#[tokio::test]
async fn boundary_minimum_observation_length() {
    let store = load_coffee_task();
    let task = store.get("coffee_brewing").unwrap();
    let (encoder, index) = build_index(task);
    let cfg = Config::default();
    assert_eq!(cfg.min_observation_chars, 5);

    let too_short = find_matching_step(task, "abcd", &encoder, &index, &cfg).unwrap_err();
    assert!(matches!(too_short, stepwise_core::matcher::MatchError::ObservationTooShort(_)));

    let attempted = find_matching_step(task, "abcde", &encoder, &index, &cfg).unwrap();
    assert!(attempted.is_none(), "unregistered five-char text has no registered vector to match");
}

// Open Question resolution: an update that resolves to the same
// (task, step) as the current whiteboard state coalesces rather than
// appending to the sliding window.
#[tokio::test]
async fn duplicate_high_confidence_update_does_not_grow_the_window() {
    let store = load_coffee_task();
    let task = store.get("coffee_brewing").unwrap();
    let (mut encoder, index) = build_index(task);
    encoder.register_observation("boiling the kettle water", 2, 0.9);
    encoder.register_observation("water rolling at a full boil", 2, 0.95);
    let cfg = Config::default();
    let tracker = StateTracker::new(cfg);

    let first = find_matching_step(task, "boiling the kettle water", &encoder, &index, &cfg)
        .unwrap()
        .unwrap();
    tracker.process_vlm_observation(&task.task_name, Some(&first)).await;
    assert_eq!(tracker.window_snapshot().await.len(), 1);

    let second = find_matching_step(task, "water rolling at a full boil", &encoder, &index, &cfg)
        .unwrap()
        .unwrap();
    let outcome = tracker.process_vlm_observation(&task.task_name, Some(&second)).await;
    assert_eq!(outcome, UpdateOutcome::Coalesced);
    assert_eq!(tracker.window_snapshot().await.len(), 1, "a coalesced update must not grow the window");
}

// Boundary: an empty query string never matches a known phrase and always
// escalates, regardless of tracker state.
#[tokio::test]
async fn empty_query_escalates_as_unrecognized() {
    let store = load_coffee_task();
    let tracker = StateTracker::new(Config::default());
    let orchestrator = QueryOrchestrator::new(store, tracker, vlm("fallback answer", 0));

    let response = orchestrator.answer("").await;
    assert_eq!(response.source, ResponseSource::Vlm);
    assert!(!response.intent_recognized);
}
