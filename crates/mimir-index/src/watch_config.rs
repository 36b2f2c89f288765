//! Persisted folder registrations.
//!
//! One `watchConfig` node per folder lives in the graph, so watcher
//! recovery after a restart is just a node query.

use mimir_core::{MimirError, NodeType, Properties, Result};
use mimir_graph::GraphStore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_INACTIVE: &str = "inactive";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    pub id: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_path: Option<String>,
    pub recursive: bool,
    pub debounce_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_patterns: Option<Vec<String>>,
    pub ignore_patterns: Vec<String>,
    pub generate_embeddings: bool,
    pub status: String,
    pub added_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_indexed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WatchConfig {
    pub fn new(path: &Path) -> Self {
        Self {
            id: watch_config_id(path),
            path: path.to_string_lossy().to_string(),
            host_path: None,
            recursive: true,
            debounce_ms: 500,
            file_patterns: None,
            ignore_patterns: Vec::new(),
            generate_embeddings: true,
            status: STATUS_ACTIVE.to_string(),
            added_date: chrono::Utc::now().to_rfc3339(),
            last_indexed: None,
            last_updated: None,
            files_indexed: None,
            error: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == STATUS_ACTIVE
    }
}

pub fn watch_config_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut short = String::with_capacity(24);
    for byte in digest.iter().take(12) {
        short.push_str(&format!("{:02x}", byte));
    }
    format!("watchConfig-{}", short)
}

pub struct WatchConfigStore {
    store: Arc<GraphStore>,
}

impl WatchConfigStore {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    pub async fn upsert(&self, config: &WatchConfig) -> Result<()> {
        let props = to_properties(config)?;
        if self.store.get_node(&config.id).await?.is_some() {
            self.store.update_node(&config.id, props).await?;
        } else {
            self.store
                .add_node_with_id(&config.id, NodeType::WatchConfig, props)
                .await?;
        }
        Ok(())
    }

    pub async fn get(&self, path: &Path) -> Result<Option<WatchConfig>> {
        let id = watch_config_id(path);
        match self.store.get_node(&id).await? {
            Some(node) => Ok(Some(from_properties(&node.properties)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<WatchConfig>> {
        let nodes = self
            .store
            .query_nodes(Some(NodeType::WatchConfig), None)
            .await?;
        let mut configs = Vec::with_capacity(nodes.len());
        for node in nodes {
            configs.push(from_properties(&node.properties)?);
        }
        configs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(configs)
    }

    pub async fn list_active(&self) -> Result<Vec<WatchConfig>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(WatchConfig::is_active)
            .collect())
    }

    pub async fn set_status(&self, path: &Path, status: &str, error: Option<&str>) -> Result<()> {
        let id = watch_config_id(path);
        let mut props = Properties::new();
        props.insert("status".into(), json!(status));
        props.insert(
            "error".into(),
            error.map(|e| json!(e)).unwrap_or(serde_json::Value::Null),
        );
        props.insert("lastUpdated".into(), json!(chrono::Utc::now().to_rfc3339()));
        self.store.update_node(&id, props).await?;
        info!(path = %path.display(), status, "watch config status updated");
        Ok(())
    }

    pub async fn record_index_run(&self, path: &Path, files_indexed: usize) -> Result<()> {
        let id = watch_config_id(path);
        let now = chrono::Utc::now().to_rfc3339();
        let mut props = Properties::new();
        props.insert("lastIndexed".into(), json!(now));
        props.insert("lastUpdated".into(), json!(now));
        props.insert("filesIndexed".into(), json!(files_indexed));
        self.store.update_node(&id, props).await?;
        Ok(())
    }

    pub async fn remove(&self, path: &Path) -> Result<bool> {
        let id = watch_config_id(path);
        match self.store.delete_node(&id, None).await {
            Ok(_) => Ok(true),
            Err(MimirError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn to_properties(config: &WatchConfig) -> Result<Properties> {
    match serde_json::to_value(config)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(MimirError::Validation("watch config must serialize to an object".into())),
    }
}

fn from_properties(props: &Properties) -> Result<WatchConfig> {
    serde_json::from_value(serde_json::Value::Object(props.clone()))
        .map_err(|e| MimirError::Storage(format!("corrupt watch config node: {}", e)))
}
