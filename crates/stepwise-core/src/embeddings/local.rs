//! Local semantic embeddings
//!
//! Wraps `fastembed`'s ONNX-based `TextEmbedding`: a lazily-initialized
//! global model behind a `Mutex` (the `fastembed` embedder is not `Sync`),
//! with the cache directory resolved via `directories::ProjectDirs`.

use std::sync::{Mutex, OnceLock};

use super::EmbeddingError;

/// Dimensionality of the encoder used for task-step/observation matching.
/// nomic-embed-text-v1.5 is 768-dimensional; no Matryoshka truncation is
/// applied here since knowledge bases are small and the extra precision is
/// cheap at this scale.
pub const EMBEDDING_DIMENSIONS: usize = 768;

/// Text longer than this is truncated before encoding.
pub const MAX_TEXT_LENGTH: usize = 8192;

#[cfg(feature = "embeddings")]
static MODEL: OnceLock<Result<Mutex<fastembed::TextEmbedding>, String>> = OnceLock::new();

#[cfg(feature = "embeddings")]
fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("STEPWISE_EMBEDDING_CACHE_PATH") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("com", "stepwise", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    if let Some(base_dirs) = directories::BaseDirs::new() {
        return base_dirs.home_dir().join(".cache/stepwise/fastembed");
    }
    std::path::PathBuf::from(".stepwise_fastembed_cache")
}

#[cfg(feature = "embeddings")]
fn get_model() -> Result<std::sync::MutexGuard<'static, fastembed::TextEmbedding>, EmbeddingError>
{
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

    let result = MODEL.get_or_init(|| {
        let dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, dir = %dir.display(), "failed to create embedding cache directory");
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(true)
            .with_cache_dir(dir);

        TextEmbedding::try_new(options)
            .map(Mutex::new)
            .map_err(|e| format!("failed to initialize nomic-embed-text-v1.5: {e}"))
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ModelInit(format!("lock poisoned: {e}"))),
        Err(err) => Err(EmbeddingError::ModelInit(err.clone())),
    }
}

/// A text-to-vector encoder. Implemented by [`LocalEmbedder`] in production
/// and by deterministic stand-ins in tests, so the matcher and embedding
/// index are generic over the concrete model.
pub trait TextEncoder: Send + Sync {
    /// Encode `text` into an L2-normalised vector. Deterministic for a
    /// given model and input.
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Stable identifier for the model, used as part of the disk cache key.
    fn model_id(&self) -> &str;

    /// Output vector dimensionality.
    fn dimensions(&self) -> usize;
}

/// Production encoder backed by a local ONNX model via `fastembed`. No
/// network calls; entirely offline after the first model download.
#[cfg(feature = "embeddings")]
pub struct LocalEmbedder {
    model_id: String,
}

#[cfg(feature = "embeddings")]
impl Default for LocalEmbedder {
    fn default() -> Self {
        Self {
            model_id: "nomic-ai/nomic-embed-text-v1.5".to_string(),
        }
    }
}

#[cfg(feature = "embeddings")]
impl LocalEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force model initialization (downloads on first use) and surface any
    /// error eagerly, rather than on the first real encode call.
    pub fn warm_up(&self) -> Result<(), EmbeddingError> {
        get_model().map(|_| ())
    }
}

#[cfg(feature = "embeddings")]
impl TextEncoder for LocalEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("text is empty".to_string()));
        }

        let mut model = get_model()?;
        let truncated = if text.len() > MAX_TEXT_LENGTH {
            &text[..MAX_TEXT_LENGTH]
        } else {
            text
        };

        let mut vectors = model
            .embed(vec![truncated], None)
            .map_err(|e| EmbeddingError::EncodingFailed(e.to_string()))?;

        let vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::EncodingFailed("no embedding generated".to_string()))?;

        Ok(normalize(vector))
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }
}

/// L2-normalise a vector, returned by value for chaining.
pub fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Cosine similarity between two vectors, clamped to `[0, 1]`. Negative
/// cosine similarity (semantically opposed text) clamps to 0 rather than
/// reporting a negative match strength.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom <= 0.0 {
        return 0.0;
    }

    (dot / denom).clamp(0.0, 1.0)
}
