//! Observation Matcher (C3)
//!
//! Matches one VLM observation against the embedding index scoped to a
//! single task's steps. Pure with respect to state: the matcher never
//! mutates the tracker, it only scores and ranks.

use crate::config::Config;
use crate::embeddings::TextEncoder;
use crate::knowledge::{TaskKnowledge, TaskStep};
use crate::search::EmbeddingIndex;

/// Coarse confidence bucket derived from a raw cosine score: HIGH >=
/// T_HIGH, MEDIUM in [T_MEDIUM, T_HIGH), LOW in [T_LOW, T_MEDIUM),
/// otherwise NONE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    None,
}

impl ConfidenceLevel {
    pub fn classify(score: f32, cfg: &Config) -> Self {
        if score >= cfg.t_high {
            ConfidenceLevel::High
        } else if score >= cfg.t_medium {
            ConfidenceLevel::Medium
        } else if score >= cfg.t_low {
            ConfidenceLevel::Low
        } else {
            ConfidenceLevel::None
        }
    }
}

/// The best-matching step for one observation, or nothing if no step
/// reached `MINIMAL_FLOOR`.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub step_id: u32,
    pub score: f32,
    pub confidence: ConfidenceLevel,
    /// Visual cues from the matched step that also literally appear in the
    /// observation text (case-insensitive substring), for diagnostics/UI
    /// highlighting — not used in scoring.
    pub matched_cues: Vec<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum MatchError {
    #[error("observation text is below the minimum length to match ({0} chars)")]
    ObservationTooShort(usize),
    #[error(transparent)]
    Embedding(#[from] crate::embeddings::EmbeddingError),
    #[error(transparent)]
    Index(#[from] crate::search::IndexError),
}

/// Finds the best-matching step of `task` for one observation.
///
/// `index` must already contain every step of `task` keyed as
/// `"{task_name}::{step_id}"` (the convention used throughout C2/C3; see
/// [`step_key`]). Scoring below [`Config::minimal_floor`] is treated as no
/// match at all.
pub fn find_matching_step(
    task: &TaskKnowledge,
    observation: &str,
    encoder: &dyn TextEncoder,
    index: &EmbeddingIndex,
    cfg: &Config,
) -> Result<Option<MatchResult>, MatchError> {
    let trimmed = observation.trim();
    if trimmed.chars().count() < cfg.min_observation_chars {
        return Err(MatchError::ObservationTooShort(cfg.min_observation_chars));
    }

    let query_vector = encoder.encode(trimmed)?;
    let prefix = format!("{}::", task.task_name);
    let candidates = index.search_filtered(&query_vector, task.total_steps(), |key| {
        key.starts_with(&prefix)
    })?;

    let Some(best) = candidates.into_iter().next() else {
        return Ok(None);
    };

    if best.score < cfg.minimal_floor {
        return Ok(None);
    }

    let step_id: u32 = best
        .key
        .rsplit("::")
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);

    let step = task.get_step(step_id);
    let matched_cues = step
        .map(|s| matched_cues(s, trimmed))
        .unwrap_or_default();

    Ok(Some(MatchResult {
        step_id,
        score: best.score,
        confidence: ConfidenceLevel::classify(best.score, cfg),
        matched_cues,
    }))
}

/// The index key convention shared by the loader that populates
/// [`EmbeddingIndex`] and the matcher that queries it.
pub fn step_key(task_name: &str, step_id: u32) -> String {
    format!("{task_name}::{step_id}")
}

fn matched_cues(step: &TaskStep, observation: &str) -> Vec<String> {
    let lower_observation = observation.to_lowercase();
    step.deduped_visual_cues()
        .into_iter()
        .filter(|cue| lower_observation.contains(&cue.to_lowercase()))
        .map(str::to_string)
        .collect()
}
