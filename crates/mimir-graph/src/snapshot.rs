//! Crash-safe JSON snapshot of everything the service persists: nodes,
//! edges (watch configs and locks live on nodes), and chunk embedding
//! vectors. Written to a temp file and atomically renamed into place.

use mimir_core::{Edge, MimirError, Node, Result};
use mimir_search::{VectorEntry, VectorIndex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const SNAPSHOT_FILE: &str = "mimir-graph.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedVector {
    pub id: String,
    pub node_id: String,
    pub chunk_index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub vector: Vec<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub vectors: Vec<PersistedVector>,
    pub vector_dimension: usize,
}

impl GraphSnapshot {
    pub fn capture(nodes: Vec<Node>, edges: Vec<Edge>, vector: &VectorIndex) -> Self {
        let vectors = vector
            .dump()
            .into_iter()
            .map(|(id, entry)| PersistedVector {
                id,
                node_id: entry.node_id,
                chunk_index: entry.chunk_index,
                start_offset: entry.start_offset,
                end_offset: entry.end_offset,
                vector: entry.vector,
            })
            .collect();
        Self {
            nodes,
            edges,
            vectors,
            vector_dimension: vector.dimension(),
        }
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let target = dir.join(SNAPSHOT_FILE);
        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        let encoded = serde_json::to_vec(self)?;
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &target)?;
        debug!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            vectors = self.vectors.len(),
            "snapshot written"
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let target = dir.join(SNAPSHOT_FILE);
        if !target.exists() {
            return Ok(None);
        }
        let raw = fs::read(&target)?;
        let snapshot: GraphSnapshot = serde_json::from_slice(&raw)
            .map_err(|e| MimirError::Storage(format!("corrupt snapshot: {}", e)))?;
        info!(
            nodes = snapshot.nodes.len(),
            edges = snapshot.edges.len(),
            "snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    pub fn restore_vectors(&self, vector: &VectorIndex) -> Result<()> {
        for persisted in &self.vectors {
            vector.upsert_chunk(
                &persisted.id,
                VectorEntry {
                    node_id: persisted.node_id.clone(),
                    chunk_index: persisted.chunk_index,
                    start_offset: persisted.start_offset,
                    end_offset: persisted.end_offset,
                    vector: persisted.vector.clone(),
                },
            )?;
        }
        Ok(())
    }
}
