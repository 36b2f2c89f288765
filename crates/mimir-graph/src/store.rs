//! Graph store adapter: the single write path for nodes and edges.
//!
//! Property flattening happens here on the way in; reads reconstruct
//! nesting where unambiguous. Lexical and vector index updates complete
//! before a CRUD call returns, so a caller immediately finds its own
//! writes in search.

use crate::snapshot::GraphSnapshot;
use mimir_core::confirm::{Confirmation, ConfirmationLedger};
use mimir_core::properties::{flatten, strip_large_fields, unflatten};
use mimir_core::{
    Direction, Edge, EdgeType, EmbeddingProvider, GraphDriver, MimirError, Node, NodeType,
    Properties, Result, LOCKED_AT, LOCKED_BY, LOCK_EXPIRES_AT,
};
use mimir_search::lexical::INDEXED_FIELDS;
use mimir_search::{HybridSearch, LexicalIndex, ScoredNode, SearchOptions, VectorEntry, VectorIndex};
use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Cascade deletes removing more incident edges than this require a
/// confirmation token.
pub const CASCADE_CONFIRM_THRESHOLD: usize = 10;

pub const ACTION_DELETE_NODE: &str = "delete_node";
pub const ACTION_CLEAR: &str = "clear";

#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub id: String,
    pub error: String,
    pub kind: String,
}

impl BatchError {
    fn from_err(id: impl Into<String>, err: &MimirError) -> Self {
        Self {
            id: id.into(),
            error: err.to_string(),
            kind: err.kind().to_string(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct NodeBatch {
    pub items: Vec<Node>,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Default, Serialize)]
pub struct EdgeBatch {
    pub items: Vec<Edge>,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Default, Serialize)]
pub struct DeleteBatch {
    pub deleted: usize,
    pub errors: Vec<BatchError>,
}

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub node_type: Option<NodeType>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct NodeUpdate {
    pub id: String,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct EdgeSpec {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    pub properties: Option<Properties>,
}

/// Result of a single-node delete, which may instead ask for confirmation
/// when the cascade is large.
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted {
        edges_removed: usize,
        chunks_removed: usize,
    },
    NeedsConfirmation {
        cascade_edges: usize,
        confirmation: Confirmation,
    },
}

#[derive(Debug, Serialize)]
pub struct GraphStats {
    #[serde(rename = "nodeCount")]
    pub node_count: usize,
    #[serde(rename = "edgeCount")]
    pub edge_count: usize,
    pub types: HashMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

pub struct GraphStore {
    driver: Arc<dyn GraphDriver>,
    lexical: Arc<LexicalIndex>,
    vector: Arc<VectorIndex>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    ledger: Arc<ConfirmationLedger>,
    embedding_types: HashSet<NodeType>,
    data_dir: Option<PathBuf>,
    search: OnceCell<Arc<HybridSearch>>,
}

impl GraphStore {
    pub fn new(
        driver: Arc<dyn GraphDriver>,
        lexical: Arc<LexicalIndex>,
        vector: Arc<VectorIndex>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        ledger: Arc<ConfirmationLedger>,
        embedding_types: HashSet<NodeType>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            driver,
            lexical,
            vector,
            provider,
            ledger,
            embedding_types,
            data_dir,
            search: OnceCell::new(),
        }
    }

    pub fn driver(&self) -> Arc<dyn GraphDriver> {
        Arc::clone(&self.driver)
    }

    pub fn lexical(&self) -> Arc<LexicalIndex> {
        Arc::clone(&self.lexical)
    }

    pub fn vector(&self) -> Arc<VectorIndex> {
        Arc::clone(&self.vector)
    }

    pub fn ledger(&self) -> Arc<ConfirmationLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn embedding_provider(&self) -> Option<Arc<dyn EmbeddingProvider>> {
        self.provider.clone()
    }

    pub fn attach_search(&self, search: Arc<HybridSearch>) {
        let _ = self.search.set(search);
    }

    // ---- single-node CRUD ----

    pub async fn add_node(
        &self,
        node_type: Option<NodeType>,
        properties: Map<String, Value>,
    ) -> Result<Node> {
        let node_type = node_type.unwrap_or_default();
        let flat = flatten(&properties);
        reject_lock_fields(&flat)?;
        let node = Node::new(node_type, flat);
        self.driver.insert_node(node.clone()).await?;
        self.index_node(&node).await;
        Ok(outbound(node))
    }

    /// Insert preserving the caller-chosen id. Used by the indexer and the
    /// watch config store, which derive ids from paths.
    pub async fn add_node_with_id(
        &self,
        id: &str,
        node_type: NodeType,
        properties: Map<String, Value>,
    ) -> Result<Node> {
        let flat = flatten(&properties);
        reject_lock_fields(&flat)?;
        let node = Node::new(node_type, flat).with_id(id);
        self.driver.insert_node(node.clone()).await?;
        self.index_node(&node).await;
        Ok(outbound(node))
    }

    /// Full node with reconstructed nesting; nothing stripped.
    pub async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        Ok(self.driver.get_node(id).await?.map(outbound))
    }

    pub async fn update_node(&self, id: &str, partial: Map<String, Value>) -> Result<Node> {
        let flat = flatten(&partial);
        reject_lock_fields(&flat)?;
        let merged = self.driver.merge_node(id, flat).await?;
        self.index_node(&merged).await;
        Ok(outbound(merged))
    }

    pub async fn delete_node(
        &self,
        id: &str,
        confirmation: Option<&str>,
    ) -> Result<DeleteOutcome> {
        if self.driver.get_node(id).await?.is_none() {
            return Err(MimirError::NotFound(format!("node not found: {}", id)));
        }
        let cascade_edges = self.driver.edges_of(id, Direction::Both).await?.len();
        if cascade_edges > CASCADE_CONFIRM_THRESHOLD {
            let params = json!({ "id": id });
            match confirmation {
                None => {
                    return Ok(DeleteOutcome::NeedsConfirmation {
                        cascade_edges,
                        confirmation: self.ledger.issue(ACTION_DELETE_NODE, &params),
                    })
                }
                Some(token) => {
                    if !self.ledger.validate(token, ACTION_DELETE_NODE, &params) {
                        return Err(MimirError::ConfirmationInvalid(
                            "confirmation does not match this delete".into(),
                        ));
                    }
                    self.ledger.consume(token)?;
                }
            }
        }
        let (edges_removed, chunks_removed) = self.delete_node_unchecked(id).await?;
        Ok(DeleteOutcome::Deleted {
            edges_removed,
            chunks_removed,
        })
    }

    /// Removes the node, its incident edges, and (for files) every owned
    /// chunk node, keeping the derived indexes in step.
    pub(crate) async fn delete_node_unchecked(&self, id: &str) -> Result<(usize, usize)> {
        let mut chunks_removed = 0;
        if let Some(node) = self.driver.get_node(id).await? {
            if node.node_type == NodeType::File {
                for chunk_id in self.chunk_ids_of(id).await? {
                    if self.driver.remove_node(&chunk_id).await?.is_some() {
                        self.lexical.remove(&chunk_id);
                        self.vector.remove_chunk(&chunk_id);
                        chunks_removed += 1;
                    }
                }
            }
        }
        let removed = self.driver.remove_node(id).await?;
        let edges_removed = match removed {
            Some((_, cascaded)) => cascaded.len(),
            None => return Err(MimirError::NotFound(format!("node not found: {}", id))),
        };
        self.lexical.remove(id);
        self.vector.remove_chunk(id);
        self.vector.remove_node_chunks(id);
        Ok((edges_removed, chunks_removed))
    }

    /// Indexer entry point: drops every chunk node owned by a file, keeping
    /// the derived indexes in step. Not confirmation-gated; chunk nodes are
    /// derived state owned by the pipeline.
    pub async fn remove_file_chunks(&self, file_id: &str) -> Result<usize> {
        let mut removed = 0;
        for chunk_id in self.chunk_ids_of(file_id).await? {
            if self.driver.remove_node(&chunk_id).await?.is_some() {
                self.lexical.remove(&chunk_id);
                self.vector.remove_chunk(&chunk_id);
                removed += 1;
            }
        }
        self.vector.remove_node_chunks(file_id);
        Ok(removed)
    }

    /// Indexer entry point: removes a file node plus its chunks without the
    /// cascade confirmation gate.
    pub async fn remove_file_node(&self, file_id: &str) -> Result<(usize, usize)> {
        self.delete_node_unchecked(file_id).await
    }

    pub(crate) async fn chunk_ids_of(&self, file_id: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        for edge in self.driver.edges_of(file_id, Direction::Out).await? {
            if edge.edge_type == EdgeType::Contains {
                if let Some(target) = self.driver.get_node(&edge.target).await? {
                    if target.node_type == NodeType::FileChunk {
                        out.push(target.id);
                    }
                }
            }
        }
        Ok(out)
    }

    // ---- edges ----

    pub async fn add_edge(
        &self,
        source: &str,
        target: &str,
        edge_type: EdgeType,
        properties: Option<Properties>,
    ) -> Result<Edge> {
        let source_node = self
            .driver
            .get_node(source)
            .await?
            .ok_or_else(|| MimirError::NotFound(format!("edge source not found: {}", source)))?;
        let target_node = self
            .driver
            .get_node(target)
            .await?
            .ok_or_else(|| MimirError::NotFound(format!("edge target not found: {}", target)))?;

        if source_node.node_type == NodeType::TodoList
            && !(edge_type == EdgeType::Contains && target_node.node_type == NodeType::Todo)
        {
            return Err(MimirError::Validation(
                "todoList nodes may only reference todo nodes via contains".into(),
            ));
        }

        let edge = Edge::new(source, target, edge_type, properties);
        // (source, target, type) may repeat only when distinguished by
        // properties
        for existing in self.driver.edges_of(source, Direction::Out).await? {
            if existing.target == edge.target
                && existing.edge_type == edge.edge_type
                && existing.properties == edge.properties
            {
                return Err(MimirError::Conflict(format!(
                    "duplicate edge {} -[{}]-> {}",
                    source, edge_type, target
                )));
            }
        }
        self.driver.insert_edge(edge.clone()).await?;
        Ok(edge)
    }

    pub async fn delete_edge(&self, id: &str) -> Result<bool> {
        Ok(self.driver.remove_edge(id).await?.is_some())
    }

    pub async fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        self.driver.get_edge(id).await
    }

    pub async fn get_edges(&self, node_id: &str, direction: Direction) -> Result<Vec<Edge>> {
        self.driver.edges_of(node_id, direction).await
    }

    // ---- batches: items fail individually, the batch never aborts ----

    pub async fn add_nodes(&self, specs: Vec<NodeSpec>) -> NodeBatch {
        let mut batch = NodeBatch::default();
        for (index, spec) in specs.into_iter().enumerate() {
            match self.add_node(spec.node_type, spec.properties).await {
                Ok(node) => batch.items.push(node),
                Err(e) => batch.errors.push(BatchError::from_err(format!("#{}", index), &e)),
            }
        }
        batch
    }

    pub async fn update_nodes(&self, updates: Vec<NodeUpdate>) -> NodeBatch {
        let mut batch = NodeBatch::default();
        for update in updates {
            match self.update_node(&update.id, update.properties).await {
                Ok(node) => batch.items.push(node),
                Err(e) => batch.errors.push(BatchError::from_err(update.id, &e)),
            }
        }
        batch
    }

    /// Batch deletes bypass the per-node cascade gate; the operation layer
    /// gates the whole batch instead.
    pub async fn delete_nodes(&self, ids: &[String]) -> DeleteBatch {
        let mut batch = DeleteBatch::default();
        for id in ids {
            match self.delete_node_unchecked(id).await {
                Ok(_) => batch.deleted += 1,
                Err(e) => batch.errors.push(BatchError::from_err(id.clone(), &e)),
            }
        }
        batch
    }

    pub async fn add_edges(&self, specs: Vec<EdgeSpec>) -> EdgeBatch {
        let mut batch = EdgeBatch::default();
        for (index, spec) in specs.into_iter().enumerate() {
            match self
                .add_edge(&spec.source, &spec.target, spec.edge_type, spec.properties)
                .await
            {
                Ok(edge) => batch.items.push(edge),
                Err(e) => batch.errors.push(BatchError::from_err(format!("#{}", index), &e)),
            }
        }
        batch
    }

    pub async fn delete_edges(&self, ids: &[String]) -> DeleteBatch {
        let mut batch = DeleteBatch::default();
        for id in ids {
            match self.driver.remove_edge(id).await {
                Ok(Some(_)) => batch.deleted += 1,
                Ok(None) => batch.errors.push(BatchError {
                    id: id.clone(),
                    error: format!("edge not found: {}", id),
                    kind: "ENotFound".into(),
                }),
                Err(e) => batch.errors.push(BatchError::from_err(id.clone(), &e)),
            }
        }
        batch
    }

    // ---- queries ----

    pub async fn query_nodes(
        &self,
        node_type: Option<NodeType>,
        filters: Option<&Properties>,
    ) -> Result<Vec<Node>> {
        let nodes = self.driver.scan_nodes(node_type).await?;
        let mut out = Vec::new();
        for node in nodes {
            let matches = filters.map_or(true, |f| {
                f.iter().all(|(k, v)| node.properties.get(k) == Some(v))
            });
            if matches {
                out.push(outbound_stripped(node));
            }
        }
        Ok(out)
    }

    pub async fn search_nodes(&self, query: &str, opts: &SearchOptions) -> Result<Vec<ScoredNode>> {
        let search = self.search.get().ok_or_else(|| {
            MimirError::Configuration("hybrid search engine not attached".into())
        })?;
        search.search(query, opts).await
    }

    pub async fn get_neighbors(
        &self,
        node_id: &str,
        edge_type: Option<EdgeType>,
        depth: usize,
    ) -> Result<Vec<Node>> {
        if self.driver.get_node(node_id).await?.is_none() {
            return Err(MimirError::NotFound(format!("node not found: {}", node_id)));
        }
        let depth = depth.max(1);
        let mut visited: HashSet<String> = HashSet::from([node_id.to_string()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(node_id.to_string(), 0)]);
        let mut out = Vec::new();

        while let Some((id, hops)) = queue.pop_front() {
            if hops >= depth {
                continue;
            }
            for edge in self.driver.edges_of(&id, Direction::Both).await? {
                if edge_type.map_or(false, |t| edge.edge_type != t) {
                    continue;
                }
                let neighbor = if edge.source == id {
                    edge.target
                } else {
                    edge.source
                };
                if visited.insert(neighbor.clone()) {
                    if let Some(node) = self.driver.get_node(&neighbor).await? {
                        out.push(outbound_stripped(node));
                    }
                    queue.push_back((neighbor, hops + 1));
                }
            }
        }
        Ok(out)
    }

    pub async fn get_subgraph(&self, node_id: &str, depth: usize) -> Result<Subgraph> {
        let root = self
            .driver
            .get_node(node_id)
            .await?
            .ok_or_else(|| MimirError::NotFound(format!("node not found: {}", node_id)))?;

        let mut visited: HashSet<String> = HashSet::from([node_id.to_string()]);
        let mut seen_edges: HashSet<String> = HashSet::new();
        let mut nodes = vec![outbound_stripped(root)];
        let mut edges = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(node_id.to_string(), 0)]);

        while let Some((id, hops)) = queue.pop_front() {
            if hops >= depth {
                continue;
            }
            for edge in self.driver.edges_of(&id, Direction::Both).await? {
                let neighbor = if edge.source == id {
                    edge.target.clone()
                } else {
                    edge.source.clone()
                };
                if seen_edges.insert(edge.id.clone()) {
                    edges.push(edge);
                }
                if visited.insert(neighbor.clone()) {
                    if let Some(node) = self.driver.get_node(&neighbor).await? {
                        nodes.push(outbound_stripped(node));
                    }
                    queue.push_back((neighbor, hops + 1));
                }
            }
        }
        Ok(Subgraph { nodes, edges })
    }

    pub async fn get_stats(&self) -> Result<GraphStats> {
        let types = self
            .driver
            .type_counts()
            .await?
            .into_iter()
            .map(|(ty, count)| (ty.as_str().to_string(), count))
            .collect();
        Ok(GraphStats {
            node_count: self.driver.node_count().await?,
            edge_count: self.driver.edge_count().await?,
            types,
        })
    }

    /// Per-type counts of nodes currently carrying an embedding vector.
    pub async fn embedding_stats(&self) -> Result<HashMap<String, usize>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();
        for (id, _) in self.vector.dump() {
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(node) = self.driver.get_node(&id).await? {
                *counts.entry(node.node_type.as_str().to_string()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    // ---- index hooks ----

    async fn index_node(&self, node: &Node) {
        self.lexical.index_node(node);
        self.embed_node(node).await;
    }

    /// Whole-node embedding for configured types. Failures degrade to
    /// lexical-only for this node; CRUD itself is not affected.
    async fn embed_node(&self, node: &Node) {
        if node.node_type == NodeType::FileChunk {
            // chunk vectors are written by the embedding coordinator
            return;
        }
        let Some(provider) = &self.provider else {
            return;
        };
        if !self.embedding_types.contains(&node.node_type) {
            return;
        }
        let text = embedding_text(node);
        if text.is_empty() {
            self.vector.remove_chunk(&node.id);
            return;
        }
        match provider.embed(&[text.clone()]).await {
            Ok(mut vectors) if !vectors.is_empty() => {
                let entry = VectorEntry {
                    node_id: node.id.clone(),
                    chunk_index: 0,
                    start_offset: 0,
                    end_offset: text.len(),
                    vector: vectors.remove(0),
                };
                if let Err(e) = self.vector.upsert_chunk(&node.id, entry) {
                    warn!(node = %node.id, "embedding upsert failed: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!(node = %node.id, "node embedding failed: {}", e),
        }
    }

    // ---- persistence ----

    pub async fn persist(&self) -> Result<()> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let (nodes, edges) = self.dump().await?;
        GraphSnapshot::capture(nodes, edges, &self.vector).save(dir)
    }

    pub async fn restore(&self) -> Result<bool> {
        let Some(dir) = &self.data_dir else {
            return Ok(false);
        };
        let Some(snapshot) = GraphSnapshot::load(dir)? else {
            return Ok(false);
        };
        for node in &snapshot.nodes {
            self.lexical.index_node(node);
        }
        snapshot.restore_vectors(&self.vector)?;
        let GraphSnapshot { nodes, edges, .. } = snapshot;
        self.load_into_driver(nodes, edges).await?;
        Ok(true)
    }

    async fn dump(&self) -> Result<(Vec<Node>, Vec<Edge>)> {
        let nodes = self.driver.scan_nodes(None).await?;
        let mut edges = Vec::new();
        let mut seen = HashSet::new();
        for node in &nodes {
            for edge in self.driver.edges_of(&node.id, Direction::Out).await? {
                if seen.insert(edge.id.clone()) {
                    edges.push(edge);
                }
            }
        }
        Ok((nodes, edges))
    }

    async fn load_into_driver(&self, nodes: Vec<Node>, edges: Vec<Edge>) -> Result<()> {
        for node in nodes {
            match self.driver.insert_node(node).await {
                Ok(()) | Err(MimirError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        for edge in edges {
            match self.driver.insert_edge(edge).await {
                Ok(()) | Err(MimirError::Conflict(_)) => {}
                Err(e) => {
                    debug!("snapshot edge skipped: {}", e);
                }
            }
        }
        Ok(())
    }

    /// Periodic snapshot task; stops on cancellation after one final flush.
    pub fn spawn_snapshot_task(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = store.persist().await {
                            warn!("final snapshot failed: {}", e);
                        }
                        info!("snapshot task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = store.persist().await {
                            warn!("periodic snapshot failed: {}", e);
                        }
                    }
                }
            }
        })
    }
}

fn reject_lock_fields(props: &Properties) -> Result<()> {
    for key in [LOCKED_BY, LOCKED_AT, LOCK_EXPIRES_AT] {
        if props.contains_key(key) {
            return Err(MimirError::Validation(format!(
                "{} is managed by the lock service",
                key
            )));
        }
    }
    Ok(())
}

/// Read-boundary view: nesting reconstructed where unambiguous.
fn outbound(mut node: Node) -> Node {
    node.properties = unflatten(&node.properties);
    node
}

/// List/search view: reconstructed and with large values stripped.
fn outbound_stripped(node: Node) -> Node {
    let mut node = outbound(node);
    strip_large_fields(&mut node.properties);
    node
}

fn embedding_text(node: &Node) -> String {
    let mut parts = Vec::new();
    for key in INDEXED_FIELDS {
        if let Some(text) = node.prop_str(key) {
            parts.push(text);
        }
    }
    parts.join("\n")
}
