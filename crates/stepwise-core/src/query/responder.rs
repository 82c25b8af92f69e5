//! Template Responder (C7)
//!
//! Pure rendering functions: given a classified intent and the current
//! whiteboard state (already resolved against the knowledge store), build
//! a deterministic, canned natural-language response with zero model
//! calls.

use crate::knowledge::{TaskKnowledge, TaskStep};
use crate::query::classifier::QueryIntent;
use crate::tracker::WhiteboardState;

/// A rendered template response, ready to hand back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateResponse {
    pub text: String,
}

impl TemplateResponse {
    fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Canonical response when no task is currently being tracked: every
/// template returns this single message rather than failing.
const NO_CURRENT_TASK_MESSAGE: &str =
    "There's no task being tracked right now, so I can't answer that from the current state.";

/// Render a response for `intent` given the current state. Returns `None`
/// only for an `Unknown` intent — the caller (C10) falls back to the VLM
/// in that case. Every other intent renders, falling back to the
/// canonical "no current task" message when the whiteboard is empty.
pub fn render(
    intent: QueryIntent,
    state: &WhiteboardState,
    task: Option<&TaskKnowledge>,
    step: Option<&TaskStep>,
) -> Option<TemplateResponse> {
    match intent {
        QueryIntent::Unknown => None,
        QueryIntent::Help => Some(render_help()),
        QueryIntent::WhatStepAmIOn => {
            Some(render_current_step(state, task, step).unwrap_or_else(no_current_task))
        }
        QueryIntent::WhatsNext => Some(render_next_step(task, step).unwrap_or_else(no_current_task)),
        QueryIntent::AmIDoneWithThisStep => {
            Some(render_done_check(step).unwrap_or_else(no_current_task))
        }
        QueryIntent::WhatToolsNeeded => Some(render_tools(step).unwrap_or_else(no_current_task)),
        QueryIntent::ProgressOverview => {
            Some(render_progress_overview(task, step).unwrap_or_else(no_current_task))
        }
    }
}

fn no_current_task() -> TemplateResponse {
    TemplateResponse::new(NO_CURRENT_TASK_MESSAGE)
}

fn render_help() -> TemplateResponse {
    TemplateResponse::new(
        "I can tell you: what step you're on, what's next, what tools a step needs, \
         whether you're done with the current step, or a progress overview. Ask anything \
         else and I'll try to answer from what I can see.",
    )
}

fn render_progress_overview(task: Option<&TaskKnowledge>, step: Option<&TaskStep>) -> Option<TemplateResponse> {
    let task = task?;
    let step = step?;
    Some(TemplateResponse::new(format!(
        "Step {} of {} in {}",
        step.step_id,
        task.total_steps(),
        task.display_name
    )))
}

fn render_current_step(
    state: &WhiteboardState,
    task: Option<&TaskKnowledge>,
    step: Option<&TaskStep>,
) -> Option<TemplateResponse> {
    let task = task?;
    let step = step?;
    Some(TemplateResponse::new(format!(
        "You're on step {} of {} in \"{}\": {}.",
        step.step_id,
        task.total_steps(),
        task.display_name,
        step.title
    )))
    .filter(|_| state.step_id.is_some())
}

fn render_next_step(task: Option<&TaskKnowledge>, step: Option<&TaskStep>) -> Option<TemplateResponse> {
    let task = task?;
    let current = step?;
    match task.next_step(current.step_id) {
        Some(next) => Some(TemplateResponse::new(format!(
            "Next: step {} — {}. {}",
            next.step_id, next.title, next.description
        ))),
        None => Some(TemplateResponse::new(format!(
            "That was the last step of \"{}\". You're done.",
            task.display_name
        ))),
    }
}

fn render_done_check(step: Option<&TaskStep>) -> Option<TemplateResponse> {
    let step = step?;
    if step.completion_indicators.is_empty() {
        return Some(TemplateResponse::new(format!(
            "No completion indicators are defined for \"{}\"; use your judgment.",
            step.title
        )));
    }
    Some(TemplateResponse::new(format!(
        "You're done with \"{}\" once: {}.",
        step.title,
        step.completion_indicators.join("; ")
    )))
}

fn render_tools(step: Option<&TaskStep>) -> Option<TemplateResponse> {
    let step = step?;
    if step.tools_needed.is_empty() {
        return Some(TemplateResponse::new(format!(
            "No specific tools are listed for \"{}\".",
            step.title
        )));
    }
    Some(TemplateResponse::new(format!(
        "For \"{}\" you'll need: {}.",
        step.title,
        step.tools_needed.join(", ")
    )))
}
