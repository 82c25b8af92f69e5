//! Embedding Index (C2)
//!
//! Exact cosine-similarity search over an in-memory matrix. Approximate
//! nearest-neighbor indexing is unnecessary at the scale this index is
//! meant for (hundreds of steps across a knowledge base) and so is never
//! the default. Linear scan is simple, exact, and fast enough below a few
//! thousand vectors.
//!
//! An optional `ann` feature swaps in HNSW acceleration via `usearch` for
//! deployments with unusually large knowledge bases; it never changes
//! default behaviour.

use crate::embeddings::cosine_similarity;

/// One scored candidate returned by a search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub key: String,
    pub score: f32,
}

/// Exact-search embedding index: a flat matrix of keyed vectors.
///
/// Not thread-safe internally — callers share it behind a `RwLock` the way
/// [`crate::tracker::Whiteboard`] does, since rebuilding per task is cheap
/// and mutation only happens at startup when the knowledge store loads.
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    dimensions: usize,
    entries: Vec<(String, Vec<f32>)>,
}

impl EmbeddingIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace the vector for `key`. Vectors of the wrong
    /// dimensionality are rejected rather than silently truncated/padded.
    pub fn upsert(&mut self, key: impl Into<String>, vector: Vec<f32>) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }
        let key = key.into();
        if let Some(existing) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = vector;
        } else {
            self.entries.push((key, vector));
        }
        Ok(())
    }

    /// Exact cosine-similarity search, best match first. Ties broken by
    /// insertion order (stable sort).
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ScoredEntry>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut scored: Vec<ScoredEntry> = self
            .entries
            .iter()
            .map(|(key, vector)| ScoredEntry {
                key: key.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Search restricted to keys for which `filter` returns true. Used by
    /// the matcher to scope a search to a single task's steps.
    pub fn search_filtered(
        &self,
        query: &[f32],
        limit: usize,
        filter: impl Fn(&str) -> bool,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut scored: Vec<ScoredEntry> = self
            .entries
            .iter()
            .filter(|(key, _)| filter(key))
            .map(|(key, vector)| ScoredEntry {
                key: key.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: index expects {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Optional HNSW-accelerated index, gated behind the `ann` feature. Mirrors
/// [`EmbeddingIndex`]'s key/vector shape so callers can swap one for the
/// other without touching matcher code; only used when a deployment opts
/// into approximate search for an unusually large knowledge base.
#[cfg(feature = "ann")]
pub mod ann {
    use std::collections::HashMap;
    use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

    use super::{IndexError, ScoredEntry};

    pub struct AnnIndex {
        index: Index,
        dimensions: usize,
        key_to_id: HashMap<String, u64>,
        id_to_key: HashMap<u64, String>,
        next_id: u64,
    }

    impl AnnIndex {
        pub fn new(dimensions: usize) -> Result<Self, IndexError> {
            let options = IndexOptions {
                dimensions,
                metric: MetricKind::Cos,
                quantization: ScalarKind::F32,
                connectivity: 16,
                expansion_add: 128,
                expansion_search: 64,
                multi: false,
            };
            let index = Index::new(&options)
                .map_err(|_| IndexError::DimensionMismatch { expected: dimensions, got: dimensions })?;
            Ok(Self {
                index,
                dimensions,
                key_to_id: HashMap::new(),
                id_to_key: HashMap::new(),
                next_id: 0,
            })
        }

        pub fn upsert(&mut self, key: impl Into<String>, vector: &[f32]) -> Result<(), IndexError> {
            if vector.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimensions,
                    got: vector.len(),
                });
            }
            let key = key.into();
            if self.index.size() >= self.index.capacity() {
                let new_cap = std::cmp::max(self.index.capacity() * 2, 16);
                let _ = self.index.reserve(new_cap);
            }
            if let Some(&id) = self.key_to_id.get(&key) {
                let _ = self.index.remove(id);
                let _ = self.index.add(id, vector);
            } else {
                let id = self.next_id;
                self.next_id += 1;
                let _ = self.index.add(id, vector);
                self.key_to_id.insert(key.clone(), id);
                self.id_to_key.insert(id, key);
            }
            Ok(())
        }

        pub fn search(&self, query: &[f32], limit: usize) -> Vec<ScoredEntry> {
            let Ok(results) = self.index.search(query, limit) else {
                return Vec::new();
            };
            results
                .keys
                .iter()
                .zip(results.distances.iter())
                .filter_map(|(id, distance)| {
                    self.id_to_key.get(id).map(|key| ScoredEntry {
                        key: key.clone(),
                        score: (1.0 - distance).clamp(0.0, 1.0),
                    })
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(vals: &[f32]) -> Vec<f32> {
        vals.to_vec()
    }

    #[test]
    fn search_ranks_best_match_first() {
        let mut idx = EmbeddingIndex::new(2);
        idx.upsert("a", v(&[1.0, 0.0])).unwrap();
        idx.upsert("b", v(&[0.0, 1.0])).unwrap();
        idx.upsert("c", v(&[0.9, 0.1])).unwrap();

        let results = idx.search(&[1.0, 0.0], 3).unwrap();
        assert_eq!(results[0].key, "a");
        assert_eq!(results[1].key, "c");
        assert_eq!(results[2].key, "b");
    }

    #[test]
    fn upsert_replaces_existing_key() {
        let mut idx = EmbeddingIndex::new(2);
        idx.upsert("a", v(&[1.0, 0.0])).unwrap();
        idx.upsert("a", v(&[0.0, 1.0])).unwrap();
        assert_eq!(idx.len(), 1);
        let results = idx.search(&[0.0, 1.0], 1).unwrap();
        assert_eq!(results[0].key, "a");
        assert!((results[0].score - 1.0).abs() < 1e-4);
    }

    #[test]
    fn rejects_wrong_dimension_vector() {
        let mut idx = EmbeddingIndex::new(3);
        let err = idx.upsert("a", v(&[1.0, 0.0])).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
    }

    #[test]
    fn search_filtered_scopes_candidates() {
        let mut idx = EmbeddingIndex::new(2);
        idx.upsert("task_a::1", v(&[1.0, 0.0])).unwrap();
        idx.upsert("task_b::1", v(&[1.0, 0.0])).unwrap();

        let results = idx
            .search_filtered(&[1.0, 0.0], 5, |k| k.starts_with("task_a"))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key, "task_a::1");
    }

    #[test]
    fn search_on_empty_index_returns_empty() {
        let idx = EmbeddingIndex::new(2);
        let results = idx.search(&[1.0, 0.0], 5).unwrap();
        assert!(results.is_empty());
    }
}
