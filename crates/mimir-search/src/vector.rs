//! Brute-force dense vector index.
//!
//! Entries are keyed by chunk id and carry enough metadata to map a hit back
//! to its owning node and byte range. The scan is exact; an ANN backend can
//! replace it behind `VectorBackend` without changing callers.

use mimir_core::{MimirError, Result, ScoredId, VectorBackend};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub node_id: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub vector: Vec<f32>,
}

pub struct VectorIndex {
    entries: RwLock<HashMap<String, VectorEntry>>,
    dimension: usize,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn upsert_chunk(&self, id: &str, entry: VectorEntry) -> Result<()> {
        if entry.vector.len() != self.dimension {
            return Err(MimirError::Vector(format!(
                "dimension mismatch: expected {}, got {}",
                self.dimension,
                entry.vector.len()
            )));
        }
        self.entries.write().insert(id.to_string(), entry);
        Ok(())
    }

    pub fn remove_chunk(&self, id: &str) {
        self.entries.write().remove(id);
    }

    /// Drops every chunk vector owned by `node_id` (file deletion cascade).
    pub fn remove_node_chunks(&self, node_id: &str) {
        self.entries.write().retain(|_, e| e.node_id != node_id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full copy of the index contents, ordered by chunk id. Used by
    /// snapshot persistence.
    pub fn dump(&self) -> Vec<(String, VectorEntry)> {
        let entries = self.entries.read();
        let mut out: Vec<(String, VectorEntry)> = entries
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Distinct node ids currently holding at least one vector.
    pub fn node_ids(&self) -> Vec<String> {
        let entries = self.entries.read();
        let mut ids: Vec<String> = entries.values().map(|e| e.node_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn reader(&self) -> VectorReader<'_> {
        VectorReader {
            entries: self.entries.read(),
            dimension: self.dimension,
        }
    }

    pub fn knn(&self, query: &[f32], k: usize, min_sim: Option<f32>) -> Result<Vec<VectorHit>> {
        self.reader().knn(query, k, min_sim)
    }
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub node_id: String,
    pub chunk_index: usize,
    pub score: f32,
}

pub struct VectorReader<'a> {
    entries: RwLockReadGuard<'a, HashMap<String, VectorEntry>>,
    dimension: usize,
}

impl<'a> VectorReader<'a> {
    pub fn knn(&self, query: &[f32], k: usize, min_sim: Option<f32>) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(MimirError::Vector(format!(
                "query dimension mismatch: expected {}, got {}",
                self.dimension,
                query.len()
            )));
        }
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|(id, entry)| VectorHit {
                id: id.clone(),
                node_id: entry.node_id.clone(),
                chunk_index: entry.chunk_index,
                score: cosine_similarity(query, &entry.vector),
            })
            .filter(|h| min_sim.map_or(true, |m| h.score >= m))
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

impl VectorBackend for VectorIndex {
    fn upsert(&self, id: &str, node_id: &str, chunk_index: usize, vector: Vec<f32>) -> Result<()> {
        self.upsert_chunk(
            id,
            VectorEntry {
                node_id: node_id.to_string(),
                chunk_index,
                start_offset: 0,
                end_offset: 0,
                vector,
            },
        )
    }

    fn remove(&self, id: &str) {
        self.remove_chunk(id);
    }

    fn remove_node(&self, node_id: &str) {
        self.remove_node_chunks(node_id);
    }

    fn knn(&self, query: &[f32], k: usize, min_sim: Option<f32>) -> Result<Vec<ScoredId>> {
        Ok(VectorIndex::knn(self, query, k, min_sim)?
            .into_iter()
            .map(|h| ScoredId {
                id: h.id,
                score: h.score,
            })
            .collect())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(node_id: &str, chunk_index: usize, vector: Vec<f32>) -> VectorEntry {
        VectorEntry {
            node_id: node_id.to_string(),
            chunk_index,
            start_offset: 0,
            end_offset: 0,
            vector,
        }
    }

    #[test]
    fn knn_orders_by_cosine() {
        let index = VectorIndex::new(3);
        index.upsert_chunk("c1", entry("f1", 0, vec![1.0, 0.0, 0.0])).unwrap();
        index.upsert_chunk("c2", entry("f1", 1, vec![0.7, 0.7, 0.0])).unwrap();
        index.upsert_chunk("c3", entry("f2", 0, vec![0.0, 0.0, 1.0])).unwrap();

        let hits = index.knn(&[1.0, 0.0, 0.0], 10, None).unwrap();
        assert_eq!(hits[0].id, "c1");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].id, "c2");
    }

    #[test]
    fn min_similarity_filters() {
        let index = VectorIndex::new(2);
        index.upsert_chunk("a", entry("n", 0, vec![1.0, 0.0])).unwrap();
        index.upsert_chunk("b", entry("n", 1, vec![0.0, 1.0])).unwrap();
        let hits = index.knn(&[1.0, 0.0], 10, Some(0.5)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn dimension_mismatch_is_a_vector_error() {
        let index = VectorIndex::new(3);
        let err = index.upsert_chunk("a", entry("n", 0, vec![1.0])).unwrap_err();
        assert_eq!(err.kind(), "EVector");
        let err = index.knn(&[1.0], 5, None).unwrap_err();
        assert_eq!(err.kind(), "EVector");
    }

    #[test]
    fn node_cascade_removes_all_chunks() {
        let index = VectorIndex::new(2);
        index.upsert_chunk("a", entry("f1", 0, vec![1.0, 0.0])).unwrap();
        index.upsert_chunk("b", entry("f1", 1, vec![0.0, 1.0])).unwrap();
        index.upsert_chunk("c", entry("f2", 0, vec![0.0, 1.0])).unwrap();
        index.remove_node_chunks("f1");
        assert_eq!(index.len(), 1);
        assert_eq!(index.node_ids(), vec!["f2".to_string()]);
    }

    #[test]
    fn empty_index_returns_empty() {
        let index = VectorIndex::new(2);
        assert!(index.knn(&[1.0, 0.0], 5, None).unwrap().is_empty());
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }
}
