//! Embedding Index (C2)
//!
//! Exact cosine-similarity search over task-step embeddings, with an
//! optional `ann` feature for HNSW acceleration on unusually large
//! knowledge bases.

mod index;

pub use index::{EmbeddingIndex, IndexError, ScoredEntry};

#[cfg(feature = "ann")]
pub use index::ann;
