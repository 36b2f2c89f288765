use crate::{Direction, Edge, Node, NodeType, Properties, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// Ranked hit shared by the lexical and vector backends.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// Storage seam under the graph adapter. The shipped driver is in-process;
/// implementations against an external store must keep `merge_node`,
/// `remove_node`, and the lock operations atomic per node.
#[async_trait]
pub trait GraphDriver: Send + Sync {
    /// Inserts a new node; fails with `Conflict` if the id exists.
    async fn insert_node(&self, node: Node) -> Result<()>;

    async fn get_node(&self, id: &str) -> Result<Option<Node>>;

    /// Atomic read-merge-write of the property bag; returns the merged node.
    async fn merge_node(&self, id: &str, partial: Properties) -> Result<Node>;

    /// Full replacement of an existing node (used by the indexer and the
    /// watch config store, which own their nodes outright).
    async fn replace_node(&self, node: Node) -> Result<()>;

    /// Removes the node and every incident edge in one atomic step.
    /// Returns the removed node and its cascaded edges.
    async fn remove_node(&self, id: &str) -> Result<Option<(Node, Vec<Edge>)>>;

    /// Inserts an edge after verifying both endpoints exist.
    async fn insert_edge(&self, edge: Edge) -> Result<()>;

    async fn get_edge(&self, id: &str) -> Result<Option<Edge>>;

    async fn remove_edge(&self, id: &str) -> Result<Option<Edge>>;

    async fn edges_of(&self, node_id: &str, direction: Direction) -> Result<Vec<Edge>>;

    /// Sequential scan, optionally narrowed to one type. The reference
    /// driver serves queries and clears from this.
    async fn scan_nodes(&self, node_type: Option<NodeType>) -> Result<Vec<Node>>;

    async fn node_count(&self) -> Result<usize>;

    async fn edge_count(&self) -> Result<usize>;

    async fn type_counts(&self) -> Result<HashMap<NodeType, usize>>;

    /// Conditional compare-and-set on the lock fields: succeeds iff the node
    /// is unlocked or its lock expired. Linearizable per node.
    async fn try_lock(&self, id: &str, agent_id: &str, timeout_ms: i64) -> Result<bool>;

    /// Clears the lock fields iff held by `agent_id`.
    async fn release_lock(&self, id: &str, agent_id: &str) -> Result<bool>;

    /// Clears every expired lock; returns how many were cleared.
    async fn clear_expired_locks(&self) -> Result<usize>;

    /// Persists current state; a no-op for drivers with their own durability.
    async fn flush(&self) -> Result<()>;
}

/// Produces fixed-dimension embeddings for batches of texts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Largest batch one call may carry; the coordinator splits above this.
    fn max_batch(&self) -> usize {
        64
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Turns an image into a textual description that then flows through the
/// ordinary text pipeline.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    async fn describe_image(&self, bytes: &[u8], mime: &str, max_dimension: u32) -> Result<String>;
}

/// Pluggable full-text ranking backend (the reference one is the in-process
/// BM25 index).
pub trait FulltextBackend: Send + Sync {
    fn index_document(&self, id: &str, fields: &[(String, String)]);

    fn remove_document(&self, id: &str);

    fn query(&self, query: &str) -> Result<Vec<ScoredId>>;
}

/// Pluggable dense-vector backend (the reference one is a brute-force scan).
pub trait VectorBackend: Send + Sync {
    fn upsert(&self, id: &str, node_id: &str, chunk_index: usize, vector: Vec<f32>) -> Result<()>;

    fn remove(&self, id: &str);

    /// Drops every vector belonging to `node_id`.
    fn remove_node(&self, node_id: &str);

    fn knn(&self, query: &[f32], k: usize, min_sim: Option<f32>) -> Result<Vec<ScoredId>>;
}
