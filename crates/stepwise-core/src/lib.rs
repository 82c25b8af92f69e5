//! # Stepwise Core
//!
//! A dual-loop state-tracking engine for a real-time manual assistant.
//!
//! A **subconscious loop** continuously matches VLM observations of the
//! user's workspace against a fixed task knowledge base and maintains a
//! confidence-gated belief about "what task, what step" on a shared
//! whiteboard. An **instant-response loop** answers user queries about
//! that belief instantly from templates, falling back to a VLM only when
//! the question can't be answered from state alone.
//!
//! ## Components
//!
//! - [`knowledge`] (C1): loads YAML task definitions into typed records.
//! - [`embeddings`] (C2 input): local ONNX text encoding via `fastembed`,
//!   with a disk cache keyed by model id.
//! - [`search`] (C2): exact cosine-similarity search over step embeddings,
//!   with an optional `ann` feature for HNSW acceleration.
//! - [`matcher`]  (C3): matches one observation against a task's steps.
//! - [`memory`]   (C4): a fixed-capacity sliding window of recent outcomes.
//! - [`tracker`]  (C5): the confidence-gated whiteboard state machine.
//! - [`query`]    (C6-C10): classifier, template responder, fallback
//!   decision engine, VLM fallback client, and the orchestrator tying
//!   them together.
//! - [`vlm`]: the VLM client abstraction used by both loops.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use stepwise_core::prelude::*;
//!
//! let knowledge = KnowledgeStore::load(std::path::Path::new("./tasks"))?;
//! let tracker = StateTracker::new(Config::default());
//! let vlm = VlmFallbackClient::new(
//!     MockVlmClient::responding("I'm not sure — try asking more specifically."),
//!     2,
//!     5,
//!     std::time::Duration::from_secs(60),
//!     std::time::Duration::from_secs(30),
//!     "You are a concise assistant for a real-world manual task.",
//! );
//! let orchestrator = QueryOrchestrator::new(knowledge, tracker, vlm);
//!
//! let response = orchestrator.answer("what step am I on?").await;
//! println!("{}", response.text);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local ONNX text embeddings via `fastembed`.
//!   Disabling it still lets callers supply their own [`embeddings::TextEncoder`].
//! - `ann`: HNSW-accelerated search via `usearch`, for deployments with
//!   unusually large knowledge bases. Exact cosine search is the default
//!   and is what every test in this crate exercises.

#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod embeddings;
pub mod knowledge;
pub mod matcher;
pub mod memory;
pub mod query;
pub mod search;
pub mod tracker;
pub mod vlm;

/// Crate version, re-exported so the CLI can print it without duplicating
/// the `Cargo.toml` value.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a caller typically needs to wire up a full
/// observe-and-answer loop in one `use`.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::embeddings::{StubEmbedder, TextEncoder};
    #[cfg(feature = "embeddings")]
    pub use crate::embeddings::LocalEmbedder;
    pub use crate::knowledge::{KnowledgeStore, TaskKnowledge, TaskStep};
    pub use crate::matcher::{find_matching_step, step_key, ConfidenceLevel, MatchResult};
    pub use crate::memory::{SlidingWindow, StateRecord};
    pub use crate::query::{classify, QueryIntent, QueryOrchestrator, QueryResponse, VlmFallbackClient};
    pub use crate::search::EmbeddingIndex;
    pub use crate::tracker::{
        StateTracker, TrackerDiagnostics, TrackerState, UpdateOutcome, WhiteboardSnapshot,
        WhiteboardState,
    };
    pub use crate::vlm::{MockVlmClient, VlmClient, VlmRequest, VlmResponse};
}
