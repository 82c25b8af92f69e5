//! Semantic Embeddings (C2 input)
//!
//! Provides local embedding generation using fastembed (ONNX-based) behind
//! the [`TextEncoder`] trait, plus a disk cache keyed by model id so a
//! model swap can never silently mix incompatible vectors. No network
//! calls — embeddings are generated entirely on-device.

mod cache;
mod local;

pub use cache::{CachedEncoder, EmbeddingCache};
#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;
pub use local::{cosine_similarity, normalize, TextEncoder, EMBEDDING_DIMENSIONS, MAX_TEXT_LENGTH};

/// Embedding error types. `#[non_exhaustive]` so a future variant (e.g. a
/// batching error) doesn't break callers matching on this exhaustively.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model initialization failed: {0}")]
    ModelInit(String),
    #[error("embedding generation failed: {0}")]
    EncodingFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Deterministic, offline stand-in for [`LocalEmbedder`] used throughout
/// the test suite. Encodes a bag-of-words hash into a small fixed-width
/// vector so semantically similar strings (sharing words) score higher
/// cosine similarity than unrelated ones, without downloading a model.
#[derive(Debug, Clone)]
pub struct StubEmbedder {
    dimensions: usize,
}

impl StubEmbedder {
    pub fn new() -> Self {
        Self { dimensions: 64 }
    }

    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl TextEncoder for StubEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text is empty".to_string()));
        }

        let mut vector = vec![0.0_f32; self.dimensions];
        for word in text.to_lowercase().split_whitespace() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::hash::Hash::hash(&word, &mut hasher);
            let bucket = (std::hash::Hasher::finish(&hasher) as usize) % self.dimensions;
            vector[bucket] += 1.0;
        }
        Ok(normalize(vector))
    }

    fn model_id(&self) -> &str {
        "stub-bow-hash-v1"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_embedder_is_deterministic() {
        let e = StubEmbedder::new();
        assert_eq!(
            e.encode("grind the coffee beans").unwrap(),
            e.encode("grind the coffee beans").unwrap()
        );
    }

    #[test]
    fn stub_embedder_shared_words_score_higher_than_unrelated() {
        let e = StubEmbedder::new();
        let a = e.encode("grind the coffee beans finely").unwrap();
        let b = e.encode("grind coffee beans until fine").unwrap();
        let c = e.encode("replace the bicycle tire inner tube").unwrap();

        let sim_ab = cosine_similarity(&a, &b);
        let sim_ac = cosine_similarity(&a, &c);
        assert!(sim_ab > sim_ac, "{sim_ab} should exceed {sim_ac}");
    }

    #[test]
    fn stub_embedder_rejects_empty_text() {
        let e = StubEmbedder::new();
        assert!(e.encode("   ").is_err());
    }
}
