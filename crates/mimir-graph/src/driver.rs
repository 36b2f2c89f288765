//! In-process reference implementation of `GraphDriver`.
//!
//! Node and edge tables are `DashMap`s; structural mutations serialize
//! through one write mutex so cascades and lock transitions stay atomic.
//! Reads go straight to the maps.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use mimir_core::{
    Direction, Edge, GraphDriver, MimirError, Node, NodeType, Properties, Result, LOCKED_AT,
    LOCKED_BY, LOCK_EXPIRES_AT,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

pub struct MemoryGraphDriver {
    nodes: DashMap<String, Node>,
    edges: DashMap<String, Edge>,
    /// node id -> ids of every incident edge, either direction
    incidence: DashMap<String, HashSet<String>>,
    write_lock: Mutex<()>,
}

impl MemoryGraphDriver {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            edges: DashMap::new(),
            incidence: DashMap::new(),
            write_lock: Mutex::new(()),
        }
    }

    /// Bulk load used by snapshot restore; skips validation because the
    /// snapshot was written from a consistent state.
    pub fn load(&self, nodes: Vec<Node>, edges: Vec<Edge>) {
        let _guard = self.write_lock.lock();
        for node in nodes {
            self.nodes.insert(node.id.clone(), node);
        }
        for edge in edges {
            self.link_incidence(&edge);
            self.edges.insert(edge.id.clone(), edge);
        }
    }

    pub fn dump(&self) -> (Vec<Node>, Vec<Edge>) {
        let _guard = self.write_lock.lock();
        let mut nodes: Vec<Node> = self.nodes.iter().map(|e| e.value().clone()).collect();
        let mut edges: Vec<Edge> = self.edges.iter().map(|e| e.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        edges.sort_by(|a, b| a.id.cmp(&b.id));
        (nodes, edges)
    }

    fn link_incidence(&self, edge: &Edge) {
        self.incidence
            .entry(edge.source.clone())
            .or_default()
            .insert(edge.id.clone());
        self.incidence
            .entry(edge.target.clone())
            .or_default()
            .insert(edge.id.clone());
    }

    fn unlink_incidence(&self, edge: &Edge) {
        for endpoint in [&edge.source, &edge.target] {
            if let Some(mut set) = self.incidence.get_mut(endpoint) {
                set.remove(&edge.id);
            }
        }
    }
}

impl Default for MemoryGraphDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_state(node: &Node) -> LockState {
    let Some(holder) = node.prop_str(LOCKED_BY) else {
        return LockState::Free;
    };
    let expired = node
        .prop_str(LOCK_EXPIRES_AT)
        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        .map(|t| t <= Utc::now())
        .unwrap_or(true);
    if expired {
        LockState::Expired
    } else {
        LockState::Held(holder.to_string())
    }
}

enum LockState {
    Free,
    Expired,
    Held(String),
}

/// True when the node is lockable by a new holder right now.
pub fn is_lock_available(node: &Node) -> bool {
    !matches!(lock_state(node), LockState::Held(_))
}

fn clear_lock_fields(props: &mut Properties) {
    props.remove(LOCKED_BY);
    props.remove(LOCKED_AT);
    props.remove(LOCK_EXPIRES_AT);
}

#[async_trait]
impl GraphDriver for MemoryGraphDriver {
    async fn insert_node(&self, node: Node) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.nodes.contains_key(&node.id) {
            return Err(MimirError::Conflict(format!(
                "node already exists: {}",
                node.id
            )));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        Ok(self.nodes.get(id).map(|n| n.clone()))
    }

    async fn merge_node(&self, id: &str, partial: Properties) -> Result<Node> {
        let _guard = self.write_lock.lock();
        let mut entry = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| MimirError::NotFound(format!("node not found: {}", id)))?;
        entry.merge_properties(partial);
        Ok(entry.clone())
    }

    async fn replace_node(&self, node: Node) -> Result<()> {
        let _guard = self.write_lock.lock();
        if !self.nodes.contains_key(&node.id) {
            return Err(MimirError::NotFound(format!("node not found: {}", node.id)));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    async fn remove_node(&self, id: &str) -> Result<Option<(Node, Vec<Edge>)>> {
        let _guard = self.write_lock.lock();
        let Some((_, node)) = self.nodes.remove(id) else {
            return Ok(None);
        };
        let edge_ids: Vec<String> = self
            .incidence
            .remove(id)
            .map(|(_, set)| set.into_iter().collect())
            .unwrap_or_default();
        let mut cascaded = Vec::with_capacity(edge_ids.len());
        for edge_id in edge_ids {
            if let Some((_, edge)) = self.edges.remove(&edge_id) {
                self.unlink_incidence(&edge);
                cascaded.push(edge);
            }
        }
        Ok(Some((node, cascaded)))
    }

    async fn insert_edge(&self, edge: Edge) -> Result<()> {
        let _guard = self.write_lock.lock();
        if self.edges.contains_key(&edge.id) {
            return Err(MimirError::Conflict(format!(
                "edge already exists: {}",
                edge.id
            )));
        }
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(MimirError::NotFound(format!(
                    "edge endpoint not found: {}",
                    endpoint
                )));
            }
        }
        self.link_incidence(&edge);
        self.edges.insert(edge.id.clone(), edge);
        Ok(())
    }

    async fn get_edge(&self, id: &str) -> Result<Option<Edge>> {
        Ok(self.edges.get(id).map(|e| e.clone()))
    }

    async fn remove_edge(&self, id: &str) -> Result<Option<Edge>> {
        let _guard = self.write_lock.lock();
        match self.edges.remove(id) {
            Some((_, edge)) => {
                self.unlink_incidence(&edge);
                Ok(Some(edge))
            }
            None => Ok(None),
        }
    }

    async fn edges_of(&self, node_id: &str, direction: Direction) -> Result<Vec<Edge>> {
        let Some(edge_ids) = self.incidence.get(node_id) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for edge_id in edge_ids.iter() {
            if let Some(edge) = self.edges.get(edge_id.as_str()) {
                let keep = match direction {
                    Direction::Out => edge.source == node_id,
                    Direction::In => edge.target == node_id,
                    Direction::Both => true,
                };
                if keep {
                    out.push(edge.clone());
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn scan_nodes(&self, node_type: Option<NodeType>) -> Result<Vec<Node>> {
        let mut out: Vec<Node> = self
            .nodes
            .iter()
            .filter(|entry| node_type.map_or(true, |t| entry.node_type == t))
            .map(|entry| entry.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn node_count(&self) -> Result<usize> {
        Ok(self.nodes.len())
    }

    async fn edge_count(&self) -> Result<usize> {
        Ok(self.edges.len())
    }

    async fn type_counts(&self) -> Result<HashMap<NodeType, usize>> {
        let mut counts = HashMap::new();
        for entry in self.nodes.iter() {
            *counts.entry(entry.node_type).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn try_lock(&self, id: &str, agent_id: &str, timeout_ms: i64) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut entry = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| MimirError::NotFound(format!("node not found: {}", id)))?;
        match lock_state(&entry) {
            LockState::Held(_) => Ok(false),
            LockState::Free | LockState::Expired => {
                let now = Utc::now();
                let expires = now + ChronoDuration::milliseconds(timeout_ms);
                entry
                    .properties
                    .insert(LOCKED_BY.into(), Value::String(agent_id.to_string()));
                entry
                    .properties
                    .insert(LOCKED_AT.into(), Value::String(now.to_rfc3339()));
                entry
                    .properties
                    .insert(LOCK_EXPIRES_AT.into(), Value::String(expires.to_rfc3339()));
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, id: &str, agent_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();
        let mut entry = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| MimirError::NotFound(format!("node not found: {}", id)))?;
        if entry.prop_str(LOCKED_BY) != Some(agent_id) {
            return Ok(false);
        }
        clear_lock_fields(&mut entry.properties);
        Ok(true)
    }

    async fn clear_expired_locks(&self) -> Result<usize> {
        let _guard = self.write_lock.lock();
        let mut cleared = 0;
        for mut entry in self.nodes.iter_mut() {
            if matches!(lock_state(&entry), LockState::Expired) {
                clear_lock_fields(&mut entry.properties);
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimir_core::EdgeType;

    fn node(id: &str, ty: NodeType) -> Node {
        Node::new(ty, Properties::new()).with_id(id)
    }

    #[tokio::test]
    async fn duplicate_node_id_conflicts() {
        let driver = MemoryGraphDriver::new();
        driver.insert_node(node("a", NodeType::Memory)).await.unwrap();
        let err = driver
            .insert_node(node("a", NodeType::Memory))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "EConflict");
    }

    #[tokio::test]
    async fn edge_requires_both_endpoints() {
        let driver = MemoryGraphDriver::new();
        driver.insert_node(node("a", NodeType::Memory)).await.unwrap();
        let err = driver
            .insert_edge(Edge::new("a", "missing", EdgeType::RelatesTo, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ENotFound");
    }

    #[tokio::test]
    async fn remove_node_cascades_edges_atomically() {
        let driver = MemoryGraphDriver::new();
        for id in ["a", "b", "c"] {
            driver.insert_node(node(id, NodeType::Memory)).await.unwrap();
        }
        driver
            .insert_edge(Edge::new("a", "b", EdgeType::RelatesTo, None))
            .await
            .unwrap();
        driver
            .insert_edge(Edge::new("c", "a", EdgeType::DependsOn, None))
            .await
            .unwrap();

        let (_, cascaded) = driver.remove_node("a").await.unwrap().unwrap();
        assert_eq!(cascaded.len(), 2);
        assert_eq!(driver.edge_count().await.unwrap(), 0);
        assert!(driver.edges_of("b", Direction::Both).await.unwrap().is_empty());
        assert!(driver.edges_of("c", Direction::Both).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn edges_of_respects_direction() {
        let driver = MemoryGraphDriver::new();
        for id in ["a", "b"] {
            driver.insert_node(node(id, NodeType::Memory)).await.unwrap();
        }
        driver
            .insert_edge(Edge::new("a", "b", EdgeType::DependsOn, None))
            .await
            .unwrap();

        assert_eq!(driver.edges_of("a", Direction::Out).await.unwrap().len(), 1);
        assert!(driver.edges_of("a", Direction::In).await.unwrap().is_empty());
        assert_eq!(driver.edges_of("b", Direction::In).await.unwrap().len(), 1);
        assert_eq!(driver.edges_of("b", Direction::Both).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lock_cas_admits_exactly_one_holder() {
        let driver = MemoryGraphDriver::new();
        driver.insert_node(node("n", NodeType::Todo)).await.unwrap();

        assert!(driver.try_lock("n", "agentA", 300_000).await.unwrap());
        assert!(!driver.try_lock("n", "agentB", 300_000).await.unwrap());
        // wrong holder cannot release
        assert!(!driver.release_lock("n", "agentB").await.unwrap());
        assert!(driver.release_lock("n", "agentA").await.unwrap());
        assert!(driver.try_lock("n", "agentB", 300_000).await.unwrap());
    }

    #[tokio::test]
    async fn expired_locks_are_reacquirable_and_swept() {
        let driver = MemoryGraphDriver::new();
        driver.insert_node(node("n", NodeType::Todo)).await.unwrap();
        // expires immediately
        assert!(driver.try_lock("n", "agentA", -1).await.unwrap());
        assert!(driver.try_lock("n", "agentB", 300_000).await.unwrap());
        assert!(driver.release_lock("n", "agentB").await.unwrap());

        assert!(driver.try_lock("n", "agentC", -1).await.unwrap());
        assert_eq!(driver.clear_expired_locks().await.unwrap(), 1);
        let n = driver.get_node("n").await.unwrap().unwrap();
        assert!(n.prop_str(LOCKED_BY).is_none());
    }

    #[tokio::test]
    async fn dump_and_load_round_trip() {
        let driver = MemoryGraphDriver::new();
        for id in ["a", "b"] {
            driver.insert_node(node(id, NodeType::Memory)).await.unwrap();
        }
        driver
            .insert_edge(Edge::new("a", "b", EdgeType::RelatesTo, None))
            .await
            .unwrap();
        let (nodes, edges) = driver.dump();

        let restored = MemoryGraphDriver::new();
        restored.load(nodes, edges);
        assert_eq!(restored.node_count().await.unwrap(), 2);
        assert_eq!(restored.edge_count().await.unwrap(), 1);
        assert_eq!(
            restored.edges_of("a", Direction::Out).await.unwrap().len(),
            1
        );
    }
}
