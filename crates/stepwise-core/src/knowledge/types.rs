//! Task knowledge types — the loadable, matchable shape of a manual
//!
//! Unknown fields in the source YAML are ignored (serde's default
//! behaviour) rather than rejected with `deny_unknown_fields` — this
//! boundary is an authored knowledge file, not an untrusted network input,
//! and forward-compatibility with newer authoring fields matters more than
//! rejecting unexpected ones.

use serde::{Deserialize, Serialize};

/// One step of a task, the unit of matchable knowledge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStep {
    pub step_id: u32,
    pub title: String,
    #[serde(alias = "task_description")]
    pub description: String,
    #[serde(default)]
    pub tools_needed: Vec<String>,
    #[serde(default)]
    pub completion_indicators: Vec<String>,
    #[serde(default)]
    pub visual_cues: Vec<String>,
    #[serde(default)]
    pub estimated_duration: Option<String>,
    #[serde(default)]
    pub safety_notes: Vec<String>,

    /// Lazily computed, cached embedding of the composed text
    /// `"{title} {description} {visual_cues joined by space}"`.
    /// Never serialized: it is derived state, not authored content.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl TaskStep {
    /// The text composed for embedding.
    pub fn composed_text(&self) -> String {
        let cues = self.visual_cues.join(" ");
        format!("{} {} {}", self.title, self.description, cues)
    }

    /// Visual cues with exact duplicates removed, preserving first
    /// occurrence order. Used by the matcher so `matched_cues` can never
    /// report the same cue twice for one observation.
    pub fn deduped_visual_cues(&self) -> Vec<&str> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::with_capacity(self.visual_cues.len());
        for cue in &self.visual_cues {
            if seen.insert(cue.to_lowercase()) {
                out.push(cue.as_str());
            }
        }
        out
    }
}

/// One loadable task: a named, ordered sequence of steps plus display
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskKnowledge {
    /// Stable key, derived from the source file's stem by the store — not
    /// part of the YAML body itself (the file IS the identity).
    #[serde(skip)]
    pub task_name: String,

    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty_level: Option<String>,
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, String>,

    pub steps: Vec<TaskStep>,

    #[serde(default)]
    pub global_safety_notes: Vec<String>,
    #[serde(default)]
    pub task_completion_indicators: Vec<String>,
}

impl TaskKnowledge {
    pub fn get_step(&self, step_id: u32) -> Option<&TaskStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub fn next_step(&self, step_id: u32) -> Option<&TaskStep> {
        self.steps
            .iter()
            .filter(|s| s.step_id > step_id)
            .min_by_key(|s| s.step_id)
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// Returns `false` when `step_id`s are not a strictly increasing
    /// sequence starting at 1; callers warn-and-accept rather than reject.
    pub fn has_canonical_step_ids(&self) -> bool {
        self.steps
            .iter()
            .enumerate()
            .all(|(i, s)| s.step_id == (i as u32) + 1)
    }
}
