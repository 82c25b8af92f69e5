//! Sliding-window record types (C4)

use chrono::{DateTime, Utc};

use crate::matcher::ConfidenceLevel;

/// One accepted-or-rejected observation outcome, kept in the sliding
/// window for consistency checks.
#[derive(Debug, Clone)]
pub struct StateRecord {
    pub task_name: String,
    pub step_id: u32,
    pub confidence: ConfidenceLevel,
    pub score: f32,
    pub observed_at: DateTime<Utc>,
}

impl StateRecord {
    pub fn new(task_name: impl Into<String>, step_id: u32, confidence: ConfidenceLevel, score: f32) -> Self {
        Self {
            task_name: task_name.into(),
            step_id,
            confidence,
            score,
            observed_at: Utc::now(),
        }
    }
}
