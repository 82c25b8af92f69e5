//! Disk-backed embedding cache
//!
//! Keyed by `hex(sha256(composed_text)) + "::" + model_id` so a model
//! upgrade invalidates every cached vector automatically rather than
//! silently mixing embeddings from two models. Stored as one JSON file per
//! entry under the cache directory; this is a knowledge base of hundreds of
//! entries, not millions, so a key-value directory beats pulling in a real
//! KV store for it.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::EmbeddingError;

/// Disk cache for composed-text embeddings, namespaced by model id.
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn key_for(text: &str, model_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        format!("{}::{}", hex::encode(digest), model_id)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Look up a cached embedding, returning `None` on any miss or read
    /// error (a cache is a performance optimization, never a source of
    /// truth — a corrupt entry is just a miss).
    pub fn get(&self, text: &str, model_id: &str) -> Option<Vec<f32>> {
        let key = Self::key_for(text, model_id);
        let path = self.path_for(&key);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Vec<f32>>(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "discarding corrupt cache entry");
                None
            }
        }
    }

    /// Persist an embedding. Failures are logged and swallowed — a cache
    /// write failure must never fail the caller's encode request.
    pub fn put(&self, text: &str, model_id: &str, vector: &[f32]) {
        if let Err(e) = std::fs::create_dir_all(&self.dir) {
            tracing::warn!(dir = %self.dir.display(), error = %e, "failed to create embedding cache directory");
            return;
        }
        let key = Self::key_for(text, model_id);
        let path = self.path_for(&key);
        match serde_json::to_string(vector) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&path, raw) {
                    tracing::warn!(path = %path.display(), error = %e, "failed to write embedding cache entry");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize embedding for cache"),
        }
    }
}

/// Cache-wrapping encoder: checks the cache before delegating to `inner`,
/// and populates the cache on a miss. Implements [`super::TextEncoder`] so
/// it is a drop-in replacement anywhere an encoder is expected.
pub struct CachedEncoder<E> {
    inner: E,
    cache: EmbeddingCache,
}

impl<E: super::TextEncoder> CachedEncoder<E> {
    pub fn new(inner: E, cache_dir: impl AsRef<Path>) -> Self {
        Self {
            inner,
            cache: EmbeddingCache::new(cache_dir.as_ref().to_path_buf()),
        }
    }
}

impl<E: super::TextEncoder> super::TextEncoder for CachedEncoder<E> {
    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(cached) = self.cache.get(text, self.inner.model_id()) {
            return Ok(cached);
        }
        let vector = self.inner.encode(text)?;
        self.cache.put(text, self.inner.model_id(), &vector);
        Ok(vector)
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Minimal hex encoding so the cache key doesn't pull in an extra
/// dependency purely for byte-to-hex formatting.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}
