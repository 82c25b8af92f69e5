//! Task Knowledge Store (C1)
//!
//! Loads every `*.yaml`/`*.yml` file under a directory into a
//! [`TaskKnowledge`] record, keyed by the file's stem. Invalid files are
//! logged and skipped rather than aborting startup; the one fatal
//! condition is loading zero valid tasks.

use std::collections::HashMap;
use std::path::Path;

use super::types::{TaskKnowledge, TaskStep};

/// Fatal only at startup: zero valid tasks loaded. Never raised once the
/// store exists (the store is read-only after construction, so there is no
/// later "unload" path that could re-trigger this).
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeLoadError {
    #[error("knowledge directory does not exist or is not a directory: {0}")]
    DirectoryNotFound(String),
    #[error("failed to read knowledge directory: {0}")]
    DirectoryRead(#[source] std::io::Error),
    #[error("zero valid tasks loaded from {0}")]
    NoValidTasks(String),
}

/// A single rejected file, recorded so the caller can surface why a task
/// didn't load without treating the whole startup as fatal.
#[derive(Debug, Clone)]
pub struct RejectedFile {
    pub path: String,
    pub reason: String,
}

/// Read-only, process-wide knowledge base. Constructed once at startup via
/// [`KnowledgeStore::load`]; never mutated afterward (hot reload is out of
/// scope).
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    tasks: HashMap<String, TaskKnowledge>,
    rejected: Vec<RejectedFile>,
}

impl KnowledgeStore {
    /// Load every `.yaml`/`.yml` file directly under `dir` (non-recursive).
    pub fn load(dir: &Path) -> Result<Self, KnowledgeLoadError> {
        if !dir.is_dir() {
            return Err(KnowledgeLoadError::DirectoryNotFound(
                dir.display().to_string(),
            ));
        }

        let entries = std::fs::read_dir(dir).map_err(KnowledgeLoadError::DirectoryRead)?;

        let mut tasks = HashMap::new();
        let mut rejected = Vec::new();
        let mut seen_names: std::collections::HashSet<String> = std::collections::HashSet::new();

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
                .unwrap_or(false);
            if !is_yaml {
                continue;
            }

            let task_name = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => {
                    rejected.push(RejectedFile {
                        path: path.display().to_string(),
                        reason: "file name is not valid UTF-8".to_string(),
                    });
                    continue;
                }
            };

            match load_one(&path, &task_name) {
                Ok(task) => {
                    if !seen_names.insert(task_name.clone()) {
                        let reason = format!("duplicate task_name '{task_name}'");
                        tracing::warn!(path = %path.display(), reason, "rejecting task file");
                        rejected.push(RejectedFile {
                            path: path.display().to_string(),
                            reason,
                        });
                        continue;
                    }
                    tasks.insert(task_name, task);
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), %reason, "rejecting task file");
                    rejected.push(RejectedFile {
                        path: path.display().to_string(),
                        reason,
                    });
                }
            }
        }

        if tasks.is_empty() {
            return Err(KnowledgeLoadError::NoValidTasks(dir.display().to_string()));
        }

        Ok(Self { tasks, rejected })
    }

    pub fn all_tasks(&self) -> impl Iterator<Item = &TaskKnowledge> {
        self.tasks.values()
    }

    pub fn get(&self, task_name: &str) -> Option<&TaskKnowledge> {
        self.tasks.get(task_name)
    }

    pub fn get_step(&self, task_name: &str, step_id: u32) -> Option<&TaskStep> {
        self.get(task_name)?.get_step(step_id)
    }

    pub fn next_step(&self, task_name: &str, step_id: u32) -> Option<&TaskStep> {
        self.get(task_name)?.next_step(step_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn step_count(&self, task_name: &str) -> usize {
        self.get(task_name).map(|t| t.total_steps()).unwrap_or(0)
    }

    /// Files that failed validation during the most recent `load`, for
    /// diagnostics. Does not affect which tasks are considered loaded.
    pub fn rejected_files(&self) -> &[RejectedFile] {
        &self.rejected
    }
}

/// Parse and validate one file. Returns `Err(reason)` rather than a typed
/// error since these are all non-fatal, logged-and-skipped outcomes.
fn load_one(path: &Path, task_name: &str) -> Result<TaskKnowledge, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("read failed: {e}"))?;
    let mut task: TaskKnowledge =
        serde_yaml::from_str(&raw).map_err(|e| format!("yaml parse failed: {e}"))?;
    task.task_name = task_name.to_string();

    validate(&task)?;
    Ok(task)
}

fn validate(task: &TaskKnowledge) -> Result<(), String> {
    if task.steps.is_empty() {
        return Err("task has no steps".to_string());
    }

    for step in &task.steps {
        if step.title.trim().is_empty() {
            return Err(format!("step {} has an empty title", step.step_id));
        }
        if step.description.trim().is_empty() {
            return Err(format!("step {} has an empty description", step.step_id));
        }
    }

    if !task.has_canonical_step_ids() {
        tracing::warn!(
            task_name = %task.task_name,
            "step_ids are not a strictly increasing sequence starting at 1; accepting anyway"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_task(dir: &Path, stem: &str, contents: &str) {
        let path = dir.join(format!("{stem}.yaml"));
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    const VALID_TASK: &str = r#"
display_name: "Coffee Brewing"
description: "Pour-over coffee brewing"
difficulty_level: "beginner"
steps:
  - step_id: 1
    title: "Grind beans"
    task_description: "Grind whole beans to a medium-coarse consistency"
    tools_needed: ["grinder"]
    completion_indicators: ["grounds look uniform"]
    visual_cues: ["person grinding coffee beans", "coffee grinder"]
  - step_id: 2
    title: "Boil water"
    task_description: "Heat water to just off boiling"
    tools_needed: ["kettle"]
    completion_indicators: ["steam rising"]
    visual_cues: ["kettle on stove", "steam"]
"#;

    #[test]
    fn loads_valid_task_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "coffee_brewing", VALID_TASK);

        let store = KnowledgeStore::load(dir.path()).unwrap();
        assert_eq!(store.task_count(), 1);
        let task = store.get("coffee_brewing").unwrap();
        assert_eq!(task.task_name, "coffee_brewing");
        assert_eq!(task.total_steps(), 2);
        assert_eq!(store.get_step("coffee_brewing", 1).unwrap().title, "Grind beans");
        assert_eq!(store.next_step("coffee_brewing", 1).unwrap().step_id, 2);
        assert!(store.next_step("coffee_brewing", 2).is_none());
    }

    #[test]
    fn rejects_invalid_file_but_keeps_valid_ones() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "coffee_brewing", VALID_TASK);
        write_task(dir.path(), "broken", "steps: []\ndisplay_name: Broken\n");

        let store = KnowledgeStore::load(dir.path()).unwrap();
        assert_eq!(store.task_count(), 1);
        assert!(store.get("broken").is_none());
        assert_eq!(store.rejected_files().len(), 1);
    }

    #[test]
    fn fails_startup_when_zero_valid_tasks() {
        let dir = tempfile::tempdir().unwrap();
        write_task(dir.path(), "broken", "steps: []\ndisplay_name: Broken\n");

        let err = KnowledgeStore::load(dir.path()).unwrap_err();
        assert!(matches!(err, KnowledgeLoadError::NoValidTasks(_)));
    }

    #[test]
    fn warns_but_accepts_non_canonical_step_ids() {
        let dir = tempfile::tempdir().unwrap();
        write_task(
            dir.path(),
            "odd_steps",
            r#"
display_name: "Odd"
steps:
  - step_id: 1
    title: "First"
    task_description: "Do the first thing"
  - step_id: 5
    title: "Second"
    task_description: "Do the second thing"
"#,
        );

        let store = KnowledgeStore::load(dir.path()).unwrap();
        assert_eq!(store.task_count(), 1);
        assert_eq!(store.get("odd_steps").unwrap().total_steps(), 2);
    }

    #[test]
    fn ignores_unknown_yaml_fields() {
        let dir = tempfile::tempdir().unwrap();
        write_task(
            dir.path(),
            "with_extra",
            r#"
display_name: "Has Extra"
some_future_field: "ignored"
steps:
  - step_id: 1
    title: "First"
    task_description: "Do the first thing"
    some_step_field: "also ignored"
"#,
        );

        let store = KnowledgeStore::load(dir.path()).unwrap();
        assert_eq!(store.task_count(), 1);
    }
}
