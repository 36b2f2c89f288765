//! The operation surface. Wire formats are JSON; every operation takes an
//! argument object and returns an envelope per `wire`.

use crate::wire::*;
use crate::Mimir;
use mimir_core::{AgentType, Direction, EdgeType, MimirError, NodeType, Result};
use mimir_graph::{
    get_task_context, ClearOutcome, ClearScope, DeleteOutcome, EdgeSpec, NodeSpec, NodeUpdate,
    CASCADE_CONFIRM_THRESHOLD,
};
use mimir_index::{IndexOptions, WatchConfig};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::str::FromStr;

const ACTION_DELETE_BATCH: &str = "delete_nodes";

impl Mimir {
    /// Name-based dispatch for transport shells.
    pub async fn dispatch(&self, operation: &str, args: Value) -> Value {
        match operation {
            "memory_node" => self.memory_node(args).await,
            "memory_edge" => self.memory_edge(args).await,
            "memory_batch" => self.memory_batch(args).await,
            "memory_lock" => self.memory_lock(args).await,
            "memory_clear" => self.memory_clear(args).await,
            "vector_search_nodes" => self.vector_search_nodes(args).await,
            "get_embedding_stats" => self.get_embedding_stats(args).await,
            "index_folder" => self.index_folder(args).await,
            "remove_folder" => self.remove_folder(args).await,
            "list_folders" => self.list_folders(args).await,
            "todo" => self.todo(args).await,
            "todo_list" => self.todo_list(args).await,
            "get_task_context" => self.get_task_context(args).await,
            other => fail(&MimirError::Validation(format!(
                "unknown operation: {}",
                other
            ))),
        }
    }

    pub async fn memory_node(&self, args: Value) -> Value {
        envelope(self.memory_node_inner(args, None).await)
    }

    async fn memory_node_inner(&self, args: Value, forced_type: Option<NodeType>) -> Result<Value> {
        let args = as_object(&args)?;
        match require_str(args, "op")? {
            "add" => {
                let node_type = match forced_type {
                    Some(ty) => Some(ty),
                    None => opt_node_type(args, "type")?,
                };
                let properties = opt_object(args, "properties")?.unwrap_or_default();
                let node = self.store().add_node(node_type, properties).await?;
                Ok(json!({ "node": node }))
            }
            "get" => {
                let id = require_str(args, "id")?;
                let node = self.store().get_node(id).await?;
                Ok(json!({ "node": node }))
            }
            "update" => {
                let id = require_str(args, "id")?;
                let properties = opt_object(args, "properties")?.ok_or_else(|| {
                    MimirError::Validation("update requires properties".into())
                })?;
                let node = self.store().update_node(id, properties).await?;
                Ok(json!({ "node": node }))
            }
            "delete" => {
                let id = require_str(args, "id")?;
                let token = opt_str(args, "confirmationId");
                match self.store().delete_node(id, token).await? {
                    DeleteOutcome::Deleted {
                        edges_removed,
                        chunks_removed,
                    } => Ok(json!({
                        "deleted": true,
                        "edgesRemoved": edges_removed,
                        "chunksRemoved": chunks_removed,
                    })),
                    DeleteOutcome::NeedsConfirmation {
                        cascade_edges,
                        confirmation,
                    } => Ok(json!({
                        "needsConfirmation": true,
                        "cascadeEdges": cascade_edges,
                        "confirmationId": confirmation.id,
                        "expiresIn": confirmation.expires_in_secs,
                    })),
                }
            }
            "query" => {
                let node_type = match forced_type {
                    Some(ty) => Some(ty),
                    None => opt_node_type(args, "type")?,
                };
                let filters = opt_object(args, "filters")?;
                let nodes = self
                    .store()
                    .query_nodes(node_type, filters.as_ref())
                    .await?;
                Ok(json!({ "nodes": nodes, "count": nodes.len() }))
            }
            "search" => {
                let query = require_str(args, "query")?;
                let mut opts = parse_search_options(args)?;
                if let Some(ty) = forced_type {
                    opts.types = Some(vec![ty]);
                }
                let results = self.store().search_nodes(query, &opts).await?;
                Ok(json!({ "results": results, "count": results.len() }))
            }
            other => Err(MimirError::Validation(format!(
                "unknown node op: {}",
                other
            ))),
        }
    }

    pub async fn memory_edge(&self, args: Value) -> Value {
        envelope(self.memory_edge_inner(args).await)
    }

    async fn memory_edge_inner(&self, args: Value) -> Result<Value> {
        let args = as_object(&args)?;
        match require_str(args, "op")? {
            "add" => {
                let source = require_str(args, "source")?;
                let target = require_str(args, "target")?;
                let edge_type = parse_edge_type(require_str(args, "type")?)?;
                let properties = opt_object(args, "properties")?;
                let edge = self
                    .store()
                    .add_edge(source, target, edge_type, properties)
                    .await?;
                Ok(json!({ "edge": edge }))
            }
            "delete" => {
                let id = require_str(args, "id")?;
                let deleted = self.store().delete_edge(id).await?;
                Ok(json!({ "deleted": deleted }))
            }
            // `get` with a nodeId lists that node's edges; with an edge id
            // it fetches the single edge
            "get" => match opt_str(args, "nodeId") {
                Some(node_id) => {
                    let direction = parse_direction(opt_str(args, "direction"))?;
                    let edges = self.store().get_edges(node_id, direction).await?;
                    Ok(json!({ "edges": edges, "count": edges.len() }))
                }
                None => {
                    let id = require_str(args, "id")?;
                    let edge = self.store().get_edge(id).await?;
                    Ok(json!({ "edge": edge }))
                }
            },
            "neighbors" => {
                let node_id = require_str(args, "nodeId")?;
                let edge_type = match opt_str(args, "edgeType") {
                    Some(raw) => Some(parse_edge_type(raw)?),
                    None => None,
                };
                let depth = opt_usize(args, "depth").unwrap_or(1);
                let nodes = self.store().get_neighbors(node_id, edge_type, depth).await?;
                Ok(json!({ "nodes": nodes, "count": nodes.len() }))
            }
            "subgraph" => {
                let node_id = require_str(args, "nodeId")?;
                let depth = opt_usize(args, "depth").unwrap_or(2);
                let subgraph = self.store().get_subgraph(node_id, depth).await?;
                Ok(json!({
                    "nodes": subgraph.nodes,
                    "edges": subgraph.edges,
                }))
            }
            other => Err(MimirError::Validation(format!(
                "unknown edge op: {}",
                other
            ))),
        }
    }

    pub async fn memory_batch(&self, args: Value) -> Value {
        envelope(self.memory_batch_inner(args).await)
    }

    async fn memory_batch_inner(&self, args: Value) -> Result<Value> {
        let args = as_object(&args)?;
        match require_str(args, "op")? {
            "add_nodes" => {
                let specs = parse_node_specs(args)?;
                let batch = self.store().add_nodes(specs).await;
                Ok(json!({
                    "added": batch.items.len(),
                    "items": batch.items,
                    "errors": batch.errors,
                }))
            }
            "update_nodes" => {
                let updates = parse_node_updates(args)?;
                let batch = self.store().update_nodes(updates).await;
                Ok(json!({
                    "updated": batch.items.len(),
                    "items": batch.items,
                    "errors": batch.errors,
                }))
            }
            "delete_nodes" => {
                let ids = opt_str_list(args, "ids")?
                    .ok_or_else(|| MimirError::Validation("delete_nodes requires ids".into()))?;
                if ids.len() > CASCADE_CONFIRM_THRESHOLD {
                    let params = json!({ "ids": ids });
                    match opt_str(args, "confirmationId") {
                        None => {
                            let confirmation = self.ledger().issue(ACTION_DELETE_BATCH, &params);
                            return Ok(json!({
                                "needsConfirmation": true,
                                "nodeCount": ids.len(),
                                "confirmationId": confirmation.id,
                                "expiresIn": confirmation.expires_in_secs,
                            }));
                        }
                        Some(token) => {
                            if !self.ledger().validate(token, ACTION_DELETE_BATCH, &params) {
                                return Err(MimirError::ConfirmationInvalid(
                                    "confirmation does not match this batch delete".into(),
                                ));
                            }
                            self.ledger().consume(token)?;
                        }
                    }
                }
                let batch = self.store().delete_nodes(&ids).await;
                Ok(json!({ "deleted": batch.deleted, "errors": batch.errors }))
            }
            "add_edges" => {
                let specs = parse_edge_specs(args)?;
                let batch = self.store().add_edges(specs).await;
                Ok(json!({
                    "added": batch.items.len(),
                    "items": batch.items,
                    "errors": batch.errors,
                }))
            }
            "delete_edges" => {
                let ids = opt_str_list(args, "ids")?
                    .ok_or_else(|| MimirError::Validation("delete_edges requires ids".into()))?;
                let batch = self.store().delete_edges(&ids).await;
                Ok(json!({ "deleted": batch.deleted, "errors": batch.errors }))
            }
            other => Err(MimirError::Validation(format!(
                "unknown batch op: {}",
                other
            ))),
        }
    }

    pub async fn memory_lock(&self, args: Value) -> Value {
        envelope(self.memory_lock_inner(args).await)
    }

    async fn memory_lock_inner(&self, args: Value) -> Result<Value> {
        let args = as_object(&args)?;
        match require_str(args, "op")? {
            "acquire" => {
                let node_id = require_str(args, "nodeId")?;
                let agent_id = require_str(args, "agentId")?;
                let timeout_ms = opt_i64(args, "timeoutMs");
                let acquired = self.locks().acquire(node_id, agent_id, timeout_ms).await?;
                Ok(json!({ "acquired": acquired }))
            }
            "release" => {
                let node_id = require_str(args, "nodeId")?;
                let agent_id = require_str(args, "agentId")?;
                let released = self.locks().release(node_id, agent_id).await?;
                Ok(json!({ "released": released }))
            }
            "query_available" => {
                let node_type = opt_node_type(args, "type")?;
                let filters = opt_object(args, "filters")?;
                let nodes = self
                    .locks()
                    .query_available(node_type, filters.as_ref())
                    .await?;
                Ok(json!({ "nodes": nodes, "count": nodes.len() }))
            }
            "cleanup" => {
                let cleared = self.locks().cleanup().await?;
                Ok(json!({ "cleared": cleared }))
            }
            other => Err(MimirError::Validation(format!(
                "unknown lock op: {}",
                other
            ))),
        }
    }

    pub async fn memory_clear(&self, args: Value) -> Value {
        envelope(self.memory_clear_inner(args).await)
    }

    async fn memory_clear_inner(&self, args: Value) -> Result<Value> {
        let args = as_object(&args)?;
        let scope = ClearScope::parse(require_str(args, "type")?)?;
        let token = opt_str(args, "confirmationId");
        match self.store().clear(scope, token).await? {
            ClearOutcome::NeedsConfirmation {
                preview,
                confirmation,
            } => Ok(json!({
                "needsConfirmation": true,
                "preview": preview,
                "confirmationId": confirmation.id,
                "expiresIn": confirmation.expires_in_secs,
            })),
            ClearOutcome::Cleared {
                deleted_nodes,
                deleted_edges,
            } => Ok(json!({
                "deletedNodes": deleted_nodes,
                "deletedEdges": deleted_edges,
            })),
        }
    }

    pub async fn vector_search_nodes(&self, args: Value) -> Value {
        envelope(self.vector_search_nodes_inner(args).await)
    }

    async fn vector_search_nodes_inner(&self, args: Value) -> Result<Value> {
        let args = as_object(&args)?;
        let query = require_str(args, "query")?;
        let opts = parse_search_options(args)?;
        let results = self.search().search(query, &opts).await?;
        Ok(json!({ "results": results, "count": results.len() }))
    }

    pub async fn get_embedding_stats(&self, _args: Value) -> Value {
        envelope(self.get_embedding_stats_inner().await)
    }

    async fn get_embedding_stats_inner(&self) -> Result<Value> {
        let stats = self.store().embedding_stats().await?;
        let total: usize = stats.values().sum();
        Ok(json!({ "types": stats, "total": total }))
    }

    pub async fn index_folder(&self, args: Value) -> Value {
        envelope(self.index_folder_inner(args).await)
    }

    async fn index_folder_inner(&self, args: Value) -> Result<Value> {
        let args = as_object(&args)?;
        let path = PathBuf::from(require_str(args, "path")?);

        let mut config = WatchConfig::new(&path);
        if let Some(recursive) = opt_bool(args, "recursive") {
            config.recursive = recursive;
        }
        config.file_patterns = opt_str_list(args, "file_patterns")?;
        if let Some(ignore) = opt_str_list(args, "ignore_patterns")? {
            config.ignore_patterns = ignore;
        }
        if let Some(generate) = opt_bool(args, "generate_embeddings") {
            config.generate_embeddings = generate;
        }
        config.debounce_ms = opt_u64(args, "debounce_ms").unwrap_or(self.config().debounce_ms);

        let report = self.watch().add_folder(config).await?;
        Ok(serde_json::to_value(&report)?)
    }

    pub async fn remove_folder(&self, args: Value) -> Value {
        envelope(self.remove_folder_inner(args).await)
    }

    async fn remove_folder_inner(&self, args: Value) -> Result<Value> {
        let args = as_object(&args)?;
        let path = PathBuf::from(require_str(args, "path")?);
        let report = self.watch().remove_folder(&path).await?;
        Ok(serde_json::to_value(&report)?)
    }

    pub async fn list_folders(&self, _args: Value) -> Value {
        envelope(self.list_folders_inner().await)
    }

    async fn list_folders_inner(&self) -> Result<Value> {
        let folders = self.watch().configs().list_active().await?;
        Ok(json!({ "folders": folders, "count": folders.len() }))
    }

    /// Convenience wrapper over `memory_node` scoped to `todo`.
    pub async fn todo(&self, args: Value) -> Value {
        envelope(self.memory_node_inner(args, Some(NodeType::Todo)).await)
    }

    /// Convenience wrapper over `memory_node` scoped to `todoList`.
    pub async fn todo_list(&self, args: Value) -> Value {
        envelope(self.memory_node_inner(args, Some(NodeType::TodoList)).await)
    }

    pub async fn get_task_context(&self, args: Value) -> Value {
        envelope(self.get_task_context_inner(args).await)
    }

    async fn get_task_context_inner(&self, args: Value) -> Result<Value> {
        let args = as_object(&args)?;
        let task_id = require_str(args, "taskId")?;
        let agent = AgentType::from_str(require_str(args, "agentType")?)
            .map_err(MimirError::Validation)?;
        let context = get_task_context(self.store(), task_id, agent).await?;
        Ok(json!({
            "context": context.context,
            "metrics": context.metrics,
        }))
    }

    /// Compatibility entry point mirroring
    /// `fulltext.queryNodes(indexName, query) YIELD node, score`. Any index
    /// name dispatches to the lexical index; BM25 scores are surfaced in
    /// their native range, and empty results are empty sets.
    pub async fn fulltext_query_nodes(&self, _index_name: &str, query: &str) -> Value {
        envelope(self.fulltext_query_nodes_inner(query).await)
    }

    async fn fulltext_query_nodes_inner(&self, query: &str) -> Result<Value> {
        let hits = self.store().lexical().search(query);
        let mut rows = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(node) = self.store().get_node(&hit.id).await? {
                let mut node = node;
                mimir_core::properties::strip_large_fields(&mut node.properties);
                rows.push(json!({ "node": node, "score": hit.score }));
            }
        }
        Ok(json!({ "results": rows, "count": rows.len() }))
    }

    /// Ad-hoc folder index without registering a watch (used by one-shot
    /// tooling; `index_folder` is the persistent form).
    pub async fn index_once(&self, opts: &IndexOptions) -> Result<Value> {
        let report = self
            .indexer()
            .index_folder(opts, &tokio_util::sync::CancellationToken::new())
            .await?;
        Ok(serde_json::to_value(&report)?)
    }
}

fn parse_edge_type(raw: &str) -> Result<EdgeType> {
    EdgeType::from_str(raw).map_err(MimirError::Validation)
}

fn parse_direction(raw: Option<&str>) -> Result<Direction> {
    match raw {
        None => Ok(Direction::Both),
        Some(raw) => Direction::from_str(raw).map_err(MimirError::Validation),
    }
}

fn parse_node_specs(args: &Map<String, Value>) -> Result<Vec<NodeSpec>> {
    let items = args
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| MimirError::Validation("add_nodes requires a nodes array".into()))?;
    let mut specs = Vec::with_capacity(items.len());
    for item in items {
        let obj = item
            .as_object()
            .ok_or_else(|| MimirError::Validation("each node must be an object".into()))?;
        specs.push(NodeSpec {
            node_type: opt_node_type(obj, "type")?,
            properties: opt_object(obj, "properties")?.unwrap_or_default(),
        });
    }
    Ok(specs)
}

fn parse_node_updates(args: &Map<String, Value>) -> Result<Vec<NodeUpdate>> {
    let items = args
        .get("nodes")
        .and_then(Value::as_array)
        .ok_or_else(|| MimirError::Validation("update_nodes requires a nodes array".into()))?;
    let mut updates = Vec::with_capacity(items.len());
    for item in items {
        let obj = item
            .as_object()
            .ok_or_else(|| MimirError::Validation("each node must be an object".into()))?;
        updates.push(NodeUpdate {
            id: require_str(obj, "id")?.to_string(),
            properties: opt_object(obj, "properties")?.unwrap_or_default(),
        });
    }
    Ok(updates)
}

fn parse_edge_specs(args: &Map<String, Value>) -> Result<Vec<EdgeSpec>> {
    let items = args
        .get("edges")
        .and_then(Value::as_array)
        .ok_or_else(|| MimirError::Validation("add_edges requires an edges array".into()))?;
    let mut specs = Vec::with_capacity(items.len());
    for item in items {
        let obj = item
            .as_object()
            .ok_or_else(|| MimirError::Validation("each edge must be an object".into()))?;
        specs.push(EdgeSpec {
            source: require_str(obj, "source")?.to_string(),
            target: require_str(obj, "target")?.to_string(),
            edge_type: parse_edge_type(require_str(obj, "type")?)?,
            properties: opt_object(obj, "properties")?,
        });
    }
    Ok(specs)
}
