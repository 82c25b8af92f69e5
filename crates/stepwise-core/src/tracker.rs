//! State Tracker / Whiteboard (C5)
//!
//! Owns the single current belief about "what task, what step" and
//! applies the confidence-gated consistency check before accepting a new
//! match.
//!
//! Guarded by a `tokio::sync::RwLock` rather than a plain `Mutex`: reads
//! (answering a query) vastly outnumber writes (one VLM observation at a
//! time), so readers shouldn't block on each other.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::config::Config;
use crate::embeddings::TextEncoder;
use crate::knowledge::KnowledgeStore;
use crate::matcher::{find_matching_step, ConfidenceLevel, MatchResult};
use crate::memory::{SlidingWindow, StateRecord};
use crate::search::EmbeddingIndex;

/// Consecutive low-confidence observations allowed before a further LOW
/// match is rejected outright rather than nudging the whiteboard on weak
/// evidence.
const LOW_CONFIDENCE_STREAK_LIMIT: u32 = 3;

/// Coarse tracker mode: EMPTY -> TRACKING -> DEGRADED -> TRACKING (on next
/// HIGH match).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Empty,
    Tracking,
    Degraded,
}

/// A snapshot of "what task, what step" at one point in time, without the
/// state-machine bookkeeping `WhiteboardState` carries alongside it. Used
/// for `WhiteboardState::previous` so a caller can recover "the step before
/// this one" (the data model's "back" semantics, spec.md §3) without the
/// tracker keeping a full history.
#[derive(Debug, Clone, PartialEq)]
pub struct WhiteboardSnapshot {
    pub task_name: String,
    pub step_id: u32,
    pub confidence: ConfidenceLevel,
    pub score: f32,
    pub updated_at: DateTime<Utc>,
}

/// The current belief: which task, which step, and how it got there.
#[derive(Debug, Clone)]
pub struct WhiteboardState {
    pub state: TrackerState,
    pub task_name: Option<String>,
    pub step_id: Option<u32>,
    pub last_confidence: Option<ConfidenceLevel>,
    pub last_score: Option<f32>,
    pub consecutive_low_matches: u32,
    pub last_updated: Option<DateTime<Utc>>,
    /// The state before the most recently *accepted* update (`Initialized`,
    /// `Advanced`, `TaskSwitched`, or `RecoveredFromDegraded`). `None` before
    /// the first successful update. A coalesced or rejected update never
    /// changes `previous`, since `current` itself didn't move.
    pub previous: Option<WhiteboardSnapshot>,
}

impl Default for WhiteboardState {
    fn default() -> Self {
        Self {
            state: TrackerState::Empty,
            task_name: None,
            step_id: None,
            last_confidence: None,
            last_score: None,
            consecutive_low_matches: 0,
            last_updated: None,
            previous: None,
        }
    }
}

impl WhiteboardState {
    /// Snapshot the current belief, if one is held, for storing into
    /// `previous` just before it's overwritten.
    fn snapshot_current(&self) -> Option<WhiteboardSnapshot> {
        Some(WhiteboardSnapshot {
            task_name: self.task_name.clone()?,
            step_id: self.step_id?,
            confidence: self.last_confidence?,
            score: self.last_score?,
            updated_at: self.last_updated?,
        })
    }
}

/// Why an observation update was accepted or rejected, surfaced for
/// diagnostics and for the fallback decision engine (C8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First belief ever established.
    Initialized,
    /// Same task, step accepted (forward within cap, or backward).
    Advanced,
    /// Task switch accepted (required HIGH confidence).
    TaskSwitched,
    /// A forward jump beyond the cap was rejected; state unchanged.
    RejectedForwardJump { attempted_step: u32, cap: i64 },
    /// A task switch below HIGH confidence was rejected; state unchanged.
    RejectedTaskSwitch { attempted_task: String },
    /// No step matched (or score below floor); counts toward DEGRADED.
    NoMatch,
    /// Update was identical to the current state; coalesced rather than
    /// appended to the window.
    Coalesced,
    /// Tracker dropped into DEGRADED after too many consecutive low/no
    /// matches.
    DroppedToDegraded,
    /// Tracker recovered from DEGRADED back to TRACKING on a HIGH match.
    RecoveredFromDegraded,
}

/// Confidence-gated state tracker. Holds one [`WhiteboardState`] and one
/// [`SlidingWindow`] behind async locks so the subconscious loop (writer)
/// and instant-response loop (reader) never block each other's
/// independent operations indefinitely.
pub struct StateTracker {
    state: RwLock<WhiteboardState>,
    window: RwLock<SlidingWindow>,
    config: Config,
    rejected_low_count: AtomicU64,
    rejected_consistency_count: AtomicU64,
}

/// Snapshot of tracker-wide counters, for observability rather than
/// decision-making. `rejected_low_count` tracks every observation that
/// registered as no-match (including a LOW-confidence match rejected once
/// the streak limit is hit); `rejected_consistency_count` tracks forward-jump
/// and task-switch rejections from the consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerDiagnostics {
    pub state: TrackerState,
    pub consecutive_low_matches: u32,
    pub rejected_low_count: u64,
    pub rejected_consistency_count: u64,
}

impl StateTracker {
    pub fn new(config: Config) -> Self {
        Self {
            state: RwLock::new(WhiteboardState::default()),
            window: RwLock::new(SlidingWindow::new(config.window_capacity)),
            config,
            rejected_low_count: AtomicU64::new(0),
            rejected_consistency_count: AtomicU64::new(0),
        }
    }

    /// Read-only counters alongside the current state, for operators and
    /// tests to observe how often updates are being rejected without
    /// affecting any decision the tracker makes.
    pub async fn diagnostics(&self) -> TrackerDiagnostics {
        let state = self.state.read().await;
        TrackerDiagnostics {
            state: state.state,
            consecutive_low_matches: state.consecutive_low_matches,
            rejected_low_count: self.rejected_low_count.load(Ordering::Relaxed),
            rejected_consistency_count: self.rejected_consistency_count.load(Ordering::Relaxed),
        }
    }

    pub async fn snapshot(&self) -> WhiteboardState {
        self.state.read().await.clone()
    }

    /// Copy of the sliding window's current records, oldest first. For
    /// diagnostics and tests; the tracker itself only ever needs
    /// [`SlidingWindow::count_recent_consistent`] internally.
    pub async fn window_snapshot(&self) -> Vec<StateRecord> {
        self.window.read().await.iter().cloned().collect()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Match `observation` against every task in `knowledge` and apply the
    /// single best-scoring candidate across all of them — the spec's
    /// single `process_vlm_observation(observation_text)` entry point
    /// (spec.md §4.4.1), recovered on top of C3's per-task-scoped
    /// `find_matching_step` (see DESIGN.md's C3 divergence note). An
    /// observation that matches no task at all is still registered as a
    /// no-match against whichever task is currently tracked, so a run of
    /// unmatched observations still drives EMPTY/DEGRADED transitions.
    pub async fn process_observation_text(
        &self,
        knowledge: &KnowledgeStore,
        encoder: &dyn TextEncoder,
        index: &EmbeddingIndex,
        observation: &str,
    ) -> UpdateOutcome {
        let mut best: Option<(String, MatchResult)> = None;
        for task in knowledge.all_tasks() {
            let matched = match find_matching_step(task, observation, encoder, index, &self.config) {
                Ok(Some(m)) => m,
                Ok(None) | Err(_) => continue,
            };
            let is_better = best.as_ref().map(|(_, b)| matched.score > b.score).unwrap_or(true);
            if is_better {
                best = Some((task.task_name.clone(), matched));
            }
        }

        match best {
            Some((task_name, matched)) => self.process_vlm_observation(&task_name, Some(&matched)).await,
            None => {
                let currently_tracked = self.snapshot().await.task_name.unwrap_or_default();
                self.process_vlm_observation(&currently_tracked, None).await
            }
        }
    }

    /// Apply one matcher result (or `None` for no match) to the tracker,
    /// running the consistency check and updating the sliding window.
    ///
    /// Emits one structured `tracing` event per call (decision, matched
    /// task/step, similarity, confidence level) regardless of outcome, per
    /// the observability boundary in spec.md §6 — this is the core's only
    /// side effect besides the state mutation itself.
    pub async fn process_vlm_observation(
        &self,
        task_name: &str,
        matched: Option<&MatchResult>,
    ) -> UpdateOutcome {
        let mut state = self.state.write().await;
        let mut window = self.window.write().await;

        let outcome = match matched {
            None => self.register_no_match(&mut state),
            Some(matched) => {
                let confidence = matched.confidence;
                let is_same_task = state.task_name.as_deref() == Some(task_name);
                if !is_same_task {
                    self.try_task_switch(&mut state, &mut window, task_name, matched, confidence)
                } else {
                    self.try_same_task_update(&mut state, &mut window, task_name, matched, confidence)
                }
            }
        };

        tracing::debug!(
            task = task_name,
            step_id = matched.map(|m| m.step_id),
            similarity = matched.map(|m| m.score),
            confidence = ?matched.map(|m| m.confidence),
            decision = ?outcome,
            "subconscious update"
        );

        outcome
    }

    fn register_no_match(&self, state: &mut WhiteboardState) -> UpdateOutcome {
        self.rejected_low_count.fetch_add(1, Ordering::Relaxed);
        state.consecutive_low_matches += 1;
        state.last_confidence = Some(ConfidenceLevel::None);
        state.last_score = None;

        if state.state == TrackerState::Tracking
            && state.consecutive_low_matches >= self.config.max_consecutive_low
        {
            state.state = TrackerState::Degraded;
            return UpdateOutcome::DroppedToDegraded;
        }
        UpdateOutcome::NoMatch
    }

    fn try_task_switch(
        &self,
        state: &mut WhiteboardState,
        window: &mut SlidingWindow,
        task_name: &str,
        matched: &MatchResult,
        confidence: ConfidenceLevel,
    ) -> UpdateOutcome {
        if confidence != ConfidenceLevel::High {
            state.consecutive_low_matches += 1;
            if state.state == TrackerState::Tracking
                && state.consecutive_low_matches >= self.config.max_consecutive_low
            {
                state.state = TrackerState::Degraded;
                return UpdateOutcome::DroppedToDegraded;
            }
            self.rejected_consistency_count.fetch_add(1, Ordering::Relaxed);
            return UpdateOutcome::RejectedTaskSwitch {
                attempted_task: task_name.to_string(),
            };
        }

        let was_degraded = state.state == TrackerState::Degraded;
        let was_empty = state.state == TrackerState::Empty;
        let previous = state.snapshot_current();
        *state = WhiteboardState {
            state: TrackerState::Tracking,
            task_name: Some(task_name.to_string()),
            step_id: Some(matched.step_id),
            last_confidence: Some(confidence),
            last_score: Some(matched.score),
            consecutive_low_matches: 0,
            last_updated: Some(Utc::now()),
            previous,
        };
        window.push(StateRecord::new(task_name, matched.step_id, confidence, matched.score));

        if was_empty {
            UpdateOutcome::Initialized
        } else if was_degraded {
            UpdateOutcome::RecoveredFromDegraded
        } else {
            UpdateOutcome::TaskSwitched
        }
    }

    fn try_same_task_update(
        &self,
        state: &mut WhiteboardState,
        window: &mut SlidingWindow,
        task_name: &str,
        matched: &MatchResult,
        confidence: ConfidenceLevel,
    ) -> UpdateOutcome {
        // LOW confidence is the "conservative accept" path: only taken while
        // the VLM hasn't already been noisy for a few observations in a row.
        // Once three low-confidence observations have accumulated, a LOW
        // match is treated the same as no match at all rather than nudging
        // the whiteboard on weak evidence.
        if confidence == ConfidenceLevel::Low
            && state.consecutive_low_matches >= LOW_CONFIDENCE_STREAK_LIMIT
        {
            return self.register_no_match(state);
        }

        // DEGRADED freezes the whiteboard until a HIGH match arrives (spec.md
        // §4.4.1/state machine summary): anything short of HIGH here is a
        // no-op on `current`, same as an observation that matched nothing.
        if state.state == TrackerState::Degraded && confidence != ConfidenceLevel::High {
            return self.register_no_match(state);
        }

        let current_step = state.step_id.unwrap_or(0) as i64;
        let attempted_step = matched.step_id as i64;
        let delta = attempted_step - current_step;

        // Identical to current state: coalesce rather than append, but
        // still reset the low-match streak and refresh the timestamp.
        if delta == 0 && state.state != TrackerState::Degraded {
            state.consecutive_low_matches = 0;
            state.last_confidence = Some(confidence);
            state.last_score = Some(matched.score);
            state.last_updated = Some(Utc::now());
            return UpdateOutcome::Coalesced;
        }

        let forward_jump_ok = confidence == ConfidenceLevel::High
            || delta <= self.config.max_forward_jump
            || window.count_recent_consistent(task_name, matched.step_id.saturating_sub(1), 5) >= 2;

        if delta > 0 && !forward_jump_ok {
            state.consecutive_low_matches += 1;
            if state.state == TrackerState::Tracking
                && state.consecutive_low_matches >= self.config.max_consecutive_low
            {
                state.state = TrackerState::Degraded;
                return UpdateOutcome::DroppedToDegraded;
            }
            self.rejected_consistency_count.fetch_add(1, Ordering::Relaxed);
            return UpdateOutcome::RejectedForwardJump {
                attempted_step: matched.step_id,
                cap: self.config.max_forward_jump,
            };
        }

        let was_degraded = state.state == TrackerState::Degraded;
        let previous = state.snapshot_current();
        state.step_id = Some(matched.step_id);
        state.last_confidence = Some(confidence);
        state.last_score = Some(matched.score);
        state.consecutive_low_matches = 0;
        state.last_updated = Some(Utc::now());
        state.previous = previous;

        if was_degraded {
            // Only reachable with `confidence == High`: anything weaker was
            // already turned away above while DEGRADED.
            state.state = TrackerState::Tracking;
            window.push(StateRecord::new(task_name, matched.step_id, confidence, matched.score));
            return UpdateOutcome::RecoveredFromDegraded;
        }

        window.push(StateRecord::new(task_name, matched.step_id, confidence, matched.score));
        UpdateOutcome::Advanced
    }
}
