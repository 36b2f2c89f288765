//! Task-context assembly for the context filter: load the task node, build
//! the full PM view, then project to the requesting agent's scope.

use crate::store::GraphStore;
use mimir_core::context::{project, ContextMetrics};
use mimir_core::{AgentType, MimirError, Result};
use serde_json::{json, Map, Value};

#[derive(Debug)]
pub struct TaskContext {
    pub context: Map<String, Value>,
    pub metrics: ContextMetrics,
}

/// The PM view is the node's full (unflattened) property bag plus a 2-hop
/// subgraph; worker and qc views are allow-list projections of it.
pub async fn get_task_context(
    store: &GraphStore,
    task_id: &str,
    agent: AgentType,
) -> Result<TaskContext> {
    let node = store
        .get_node(task_id)
        .await?
        .ok_or_else(|| MimirError::NotFound(format!("task not found: {}", task_id)))?;

    let mut full = node.properties.clone();
    full.insert("taskId".into(), json!(node.id));
    full.insert("nodeType".into(), json!(node.node_type.as_str()));

    if agent == AgentType::Pm {
        let subgraph = store.get_subgraph(task_id, 2).await?;
        full.insert("subgraph".into(), serde_json::to_value(&subgraph)?);
    }

    let (context, metrics) = project(&full, agent);
    Ok(TaskContext { context, metrics })
}
