//! In-memory vector index with cosine similarity search.
//!
//! Brute-force by design: every query scores every stored vector. The
//! problem library stays small enough that a linear scan beats the
//! bookkeeping cost of an approximate structure.

use std::collections::HashMap;

/// Search result from the vector index.
///
/// `distance` is 1 - cosine similarity: 0 means identical direction,
/// larger means less similar.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub distance: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// In-memory mapping from record id to embedding.
///
/// At most one entry per id: inserting an existing id replaces the prior
/// entry. Zero-norm vectors are legal entries; they simply never rank
/// above anything (their similarity to any query is 0).
#[derive(Clone)]
pub struct VectorIndex {
    entries: HashMap<String, Vec<f32>>,
    dimensions: usize,
}

impl VectorIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            entries: HashMap::new(),
            dimensions,
        }
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
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

    /// Insert or replace the embedding for `id`.
    pub fn insert(&mut self, id: String, embedding: Vec<f32>) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        self.entries.insert(id, embedding);
        Ok(())
    }

    /// Remove the entry for `id`. Absent ids are a no-op.
    pub fn remove(&mut self, id: &str) -> Option<Vec<f32>> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.entries.get(id).map(|e| e.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Find the `k` nearest entries to `query` by cosine distance,
    /// ascending (most similar first). Ties break on id so the order is
    /// deterministic.
    ///
    /// An empty index or `k == 0` returns an empty list. A query of the
    /// wrong width is a programming error: it fails fast in debug builds
    /// and degrades to an empty result in release.
    pub fn find_nearest(&self, query: &[f32], k: usize) -> Vec<SearchResult> {
        if k == 0 || self.entries.is_empty() {
            return vec![];
        }

        if query.len() != self.dimensions {
            debug_assert!(
                false,
                "query width {} does not match index width {}",
                query.len(),
                self.dimensions
            );
            log::error!(
                "query width {} does not match index width {}, returning no results",
                query.len(),
                self.dimensions
            );
            return vec![];
        }

        let query_norm = l2_norm(query);

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .map(|(id, embedding)| SearchResult {
                id: id.clone(),
                distance: 1.0 - cosine_similarity(query, embedding, query_norm),
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(k);

        results
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity with the zero-norm cases defined as 0 rather than NaN.
fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if query_norm <= 0.0 || target_norm <= 0.0 {
        return 0.0;
    }

    let dot: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot / (query_norm * target_norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_index() {
        let index = VectorIndex::new(128);
        assert_eq!(index.dimensions(), 128);
        assert!(index.is_empty());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_insert_and_contains() {
        let mut index = VectorIndex::new(3);
        index.insert("a".to_string(), vec![1.0, 0.0, 0.0]).unwrap();
        assert!(index.contains("a"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_insert_replaces_existing_id() {
        let mut index = VectorIndex::new(3);
        index.insert("a".to_string(), vec![1.0, 0.0, 0.0]).unwrap();
        index.insert("a".to_string(), vec![0.0, 1.0, 0.0]).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("a").unwrap(), &[0.0, 1.0, 0.0]);

        // find_nearest reflects only the latest embedding
        let results = index.find_nearest(&[0.0, 1.0, 0.0], 1);
        assert_eq!(results[0].id, "a");
        assert!(results[0].distance.abs() < 1e-6);
    }

    #[test]
    fn test_insert_dimension_mismatch() {
        let mut index = VectorIndex::new(3);
        let result = index.insert("a".to_string(), vec![1.0, 0.0]);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, got: 2 })
        ));
    }

    #[test]
    fn test_zero_norm_vector_is_legal() {
        let mut index = VectorIndex::new(3);
        index.insert("zero".to_string(), vec![0.0, 0.0, 0.0]).unwrap();
        index.insert("one".to_string(), vec![1.0, 0.0, 0.0]).unwrap();

        let results = index.find_nearest(&[1.0, 0.0, 0.0], 2);
        assert_eq!(results[0].id, "one");
        // similarity to the zero vector is defined as 0, so distance 1
        assert_eq!(results[1].id, "zero");
        assert!((results[1].distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let mut index = VectorIndex::new(3);
        assert!(index.remove("missing").is_none());
        index.insert("a".to_string(), vec![1.0, 0.0, 0.0]).unwrap();
        assert!(index.remove("a").is_some());
        assert!(index.is_empty());
    }

    #[test]
    fn test_find_nearest_ordering() {
        let mut index = VectorIndex::new(3);
        index.insert("far".to_string(), vec![0.0, 0.0, 1.0]).unwrap();
        index.insert("near".to_string(), vec![1.0, 0.1, 0.0]).unwrap();
        index.insert("mid".to_string(), vec![0.5, 0.5, 0.0]).unwrap();

        let results = index.find_nearest(&[1.0, 0.0, 0.0], 3);
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].id, "near");
        assert_eq!(results[1].id, "mid");
        assert_eq!(results[2].id, "far");
        assert!(results[0].distance <= results[1].distance);
        assert!(results[1].distance <= results[2].distance);
    }

    #[test]
    fn test_find_nearest_truncates_to_k() {
        let mut index = VectorIndex::new(2);
        for i in 0..5 {
            index
                .insert(format!("id-{i}"), vec![1.0, i as f32 * 0.1])
                .unwrap();
        }
        assert_eq!(index.find_nearest(&[1.0, 0.0], 2).len(), 2);
        // k larger than the index returns everything
        assert_eq!(index.find_nearest(&[1.0, 0.0], 50).len(), 5);
    }

    #[test]
    fn test_find_nearest_empty_index() {
        let index = VectorIndex::new(3);
        assert!(index.find_nearest(&[1.0, 0.0, 0.0], 5).is_empty());
    }

    #[test]
    fn test_find_nearest_zero_k() {
        let mut index = VectorIndex::new(3);
        index.insert("a".to_string(), vec![1.0, 0.0, 0.0]).unwrap();
        assert!(index.find_nearest(&[1.0, 0.0, 0.0], 0).is_empty());
    }

    #[test]
    fn test_find_nearest_tie_break_is_deterministic() {
        let mut index = VectorIndex::new(2);
        index.insert("b".to_string(), vec![1.0, 0.0]).unwrap();
        index.insert("a".to_string(), vec![1.0, 0.0]).unwrap();

        let results = index.find_nearest(&[1.0, 0.0], 2);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[1].id, "b");
    }

    #[test]
    fn test_clear() {
        let mut index = VectorIndex::new(2);
        index.insert("a".to_string(), vec![1.0, 0.0]).unwrap();
        index.clear();
        assert!(index.is_empty());
    }
}
