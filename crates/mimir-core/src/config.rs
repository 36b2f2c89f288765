use crate::{MimirError, NodeType, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Embedding provider selector. `Disabled` keeps the pipeline alive without
/// vectors: chunks are still materialized and lexical search keeps working.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Openai,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProviderKind,
    pub model: String,
    pub endpoint: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub dimension: usize,
    pub timeout_secs: u64,
    pub max_batch: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Disabled,
            model: "text-embedding-3-small".to_string(),
            endpoint: "https://api.openai.com/v1/embeddings".to_string(),
            api_key: None,
            dimension: 1536,
            timeout_secs: 10,
            max_batch: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSettings {
    pub enabled: bool,
    pub default_days: u32,
    /// Per-type overrides; a type absent here falls back to `default_days`.
    pub policy: HashMap<NodeType, u32>,
    pub sweep_secs: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            default_days: 90,
            policy: HashMap::new(),
            sweep_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MimirConfig {
    pub data_dir: PathBuf,
    pub snapshot_interval_secs: u64,
    /// Optional external graph store location; the in-process driver ignores
    /// it and persists under `data_dir`.
    pub graph_uri: Option<String>,
    pub graph_user: Option<String>,
    #[serde(skip_serializing)]
    pub graph_password: Option<String>,
    pub embedding: EmbeddingSettings,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Fixed RRF profile name; `None` selects adaptively from query length.
    pub rrf_profile: Option<String>,
    pub retention: RetentionSettings,
    /// Disables TLS certificate validation on provider calls. Off by default.
    pub tls_no_verify: bool,
    /// Node types that carry whole-node embeddings in addition to fileChunk.
    pub embedding_types: HashSet<NodeType>,
    pub debounce_ms: u64,
}

impl Default for MimirConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            snapshot_interval_secs: 30,
            graph_uri: None,
            graph_user: None,
            graph_password: None,
            embedding: EmbeddingSettings::default(),
            chunk_size: 768,
            chunk_overlap: 10,
            rrf_profile: None,
            retention: RetentionSettings::default(),
            tls_no_verify: false,
            embedding_types: [NodeType::FileChunk, NodeType::Memory].into_iter().collect(),
            debounce_ms: 500,
        }
    }
}

impl MimirConfig {
    /// Build from `MIMIR_*` environment keys, falling back to defaults.
    /// Unparseable values are warned about and ignored rather than fatal.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(dir) = read("MIMIR_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        read_parse("MIMIR_SNAPSHOT_INTERVAL_SECS", &mut cfg.snapshot_interval_secs);
        cfg.graph_uri = read("MIMIR_GRAPH_URI");
        cfg.graph_user = read("MIMIR_GRAPH_USER");
        cfg.graph_password = read("MIMIR_GRAPH_PASSWORD");

        if let Some(provider) = read("MIMIR_EMBEDDING_PROVIDER") {
            cfg.embedding.provider = match provider.to_lowercase().as_str() {
                "openai" => EmbeddingProviderKind::Openai,
                "disabled" | "none" | "" => EmbeddingProviderKind::Disabled,
                other => {
                    return Err(MimirError::Configuration(format!(
                        "unknown embedding provider: {}",
                        other
                    )))
                }
            };
        }
        if let Some(model) = read("MIMIR_EMBEDDING_MODEL") {
            cfg.embedding.model = model;
        }
        if let Some(endpoint) = read("MIMIR_EMBEDDING_ENDPOINT") {
            cfg.embedding.endpoint = endpoint;
        }
        cfg.embedding.api_key = read("MIMIR_EMBEDDING_API_KEY");
        read_parse("MIMIR_EMBEDDING_DIMENSION", &mut cfg.embedding.dimension);
        read_parse("MIMIR_EMBEDDING_TIMEOUT_SECS", &mut cfg.embedding.timeout_secs);
        read_parse("MIMIR_CHUNK_SIZE", &mut cfg.chunk_size);
        read_parse("MIMIR_CHUNK_OVERLAP", &mut cfg.chunk_overlap);
        cfg.rrf_profile = read("MIMIR_RRF_PROFILE");
        read_parse("MIMIR_DEBOUNCE_MS", &mut cfg.debounce_ms);

        if let Some(v) = read("MIMIR_RETENTION_ENABLED") {
            cfg.retention.enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        read_parse("MIMIR_RETENTION_DAYS", &mut cfg.retention.default_days);
        read_parse("MIMIR_RETENTION_SWEEP_SECS", &mut cfg.retention.sweep_secs);
        if let Some(spec) = read("MIMIR_RETENTION_POLICY") {
            cfg.retention.policy = parse_policy(&spec);
        }

        if let Some(v) = read("MIMIR_TLS_NO_VERIFY") {
            cfg.tls_no_verify = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
            if cfg.tls_no_verify {
                warn!("TLS certificate validation disabled by MIMIR_TLS_NO_VERIFY");
            }
        }

        if let Some(spec) = read("MIMIR_EMBEDDING_TYPES") {
            let mut types: HashSet<NodeType> = [NodeType::FileChunk].into_iter().collect();
            for name in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                match NodeType::from_str(name) {
                    Ok(ty) => {
                        types.insert(ty);
                    }
                    Err(e) => warn!("MIMIR_EMBEDDING_TYPES: {}", e),
                }
            }
            cfg.embedding_types = types;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(MimirError::Configuration("chunk size must be nonzero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(MimirError::Configuration(
                "chunk overlap must be smaller than chunk size".into(),
            ));
        }
        if self.embedding.provider == EmbeddingProviderKind::Openai && self.embedding.dimension == 0
        {
            return Err(MimirError::Configuration(
                "embedding dimension must be nonzero".into(),
            ));
        }
        Ok(())
    }
}

fn read(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn read_parse<T: FromStr>(key: &str, slot: &mut T) {
    if let Some(raw) = read(key) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => warn!("ignoring unparseable {}={}", key, raw),
        }
    }
}

/// `"todo=30,memory=365"` → per-type day overrides.
fn parse_policy(spec: &str) -> HashMap<NodeType, u32> {
    let mut policy = HashMap::new();
    for pair in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((ty, days)) = pair.split_once('=') else {
            warn!("MIMIR_RETENTION_POLICY: skipping malformed entry {}", pair);
            continue;
        };
        match (NodeType::from_str(ty.trim()), days.trim().parse::<u32>()) {
            (Ok(ty), Ok(days)) => {
                policy.insert(ty, days);
            }
            _ => warn!("MIMIR_RETENTION_POLICY: skipping malformed entry {}", pair),
        }
    }
    policy
}
