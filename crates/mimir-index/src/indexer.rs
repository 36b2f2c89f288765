//! File indexer: discovery, change detection by content hash, and
//! (re)indexing of file / fileChunk nodes.
//!
//! Per-file failures are logged and counted; a run never aborts because one
//! file was unreadable.

use crate::chunker::language_label;
use crate::coordinator::{EmbeddingCoordinator, FileIdentity};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use mimir_core::{MimirError, NodeType, Properties, Result, VisionProvider};
use mimir_graph::GraphStore;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "gif", "webp"];
const VISION_MAX_DIMENSION: u32 = 1024;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub path: PathBuf,
    pub recursive: bool,
    /// Glob allow-list; `None` admits every file.
    pub file_patterns: Option<Vec<String>>,
    /// Glob deny-list, merged with `.gitignore`.
    pub ignore_patterns: Vec<String>,
    pub generate_embeddings: bool,
}

impl IndexOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            recursive: true,
            file_patterns: None,
            ignore_patterns: Vec::new(),
            generate_embeddings: true,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct IndexReport {
    #[serde(rename = "filesIndexed")]
    pub files_indexed: usize,
    #[serde(rename = "filesSkipped")]
    pub files_skipped: usize,
    #[serde(rename = "filesRemoved")]
    pub files_removed: usize,
    #[serde(rename = "filesFailed")]
    pub files_failed: usize,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct RemoveReport {
    #[serde(rename = "filesDeleted")]
    pub files_deleted: usize,
    #[serde(rename = "chunksDeleted")]
    pub chunks_deleted: usize,
}

/// Stable file-node id derived from the absolute path, so re-indexing a
/// path lands on the same node.
pub fn file_node_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut short = String::with_capacity(24);
    for byte in digest.iter().take(12) {
        short.push_str(&format!("{:02x}", byte));
    }
    format!("file-{}", short)
}

pub struct FileIndexer {
    store: Arc<GraphStore>,
    coordinator: EmbeddingCoordinator,
    vision: Option<Arc<dyn VisionProvider>>,
}

impl FileIndexer {
    pub fn new(
        store: Arc<GraphStore>,
        coordinator: EmbeddingCoordinator,
        vision: Option<Arc<dyn VisionProvider>>,
    ) -> Self {
        Self {
            store,
            coordinator,
            vision,
        }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// Walk the folder and (re)index every admitted file. Cancellation is
    /// observed between files; the file in flight completes.
    pub async fn index_folder(
        &self,
        opts: &IndexOptions,
        cancel: &CancellationToken,
    ) -> Result<IndexReport> {
        let started = Instant::now();
        if !opts.path.is_dir() {
            return Err(MimirError::NotFound(format!(
                "folder not found: {}",
                opts.path.display()
            )));
        }
        let allow = build_globset(opts.file_patterns.as_deref())?;
        let deny = build_globset(if opts.ignore_patterns.is_empty() {
            None
        } else {
            Some(&opts.ignore_patterns)
        })?;

        let mut report = IndexReport::default();
        let mut seen_ids = std::collections::HashSet::new();
        let mut cancelled = false;
        for path in discover(&opts.path, opts.recursive) {
            if cancel.is_cancelled() {
                info!("indexing cancelled after current file");
                cancelled = true;
                break;
            }
            let relative = path.strip_prefix(&opts.path).unwrap_or(&path);
            if let Some(allow) = &allow {
                if !allow.is_match(relative) {
                    continue;
                }
            }
            if let Some(deny) = &deny {
                if deny.is_match(relative) {
                    continue;
                }
            }
            seen_ids.insert(file_node_id(&path));
            match self
                .index_file(&opts.path, &path, opts.generate_embeddings, cancel)
                .await
            {
                Ok(true) => report.files_indexed += 1,
                Ok(false) => report.files_skipped += 1,
                Err(e) => {
                    warn!(file = %path.display(), "indexing failed: {}", e);
                    report.files_failed += 1;
                }
            }
        }

        // files previously indexed under this root that are gone from disk
        if !cancelled {
            let prefix = opts.path.to_string_lossy().to_string();
            for node in self.store.query_nodes(Some(NodeType::File), None).await? {
                let under_root = node
                    .prop_str("path")
                    .map(|p| Path::new(p).starts_with(&prefix))
                    .unwrap_or(false);
                if under_root && !seen_ids.contains(&node.id) {
                    self.store.remove_file_node(&node.id).await?;
                    report.files_removed += 1;
                }
            }
        }
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            folder = %opts.path.display(),
            indexed = report.files_indexed,
            skipped = report.files_skipped,
            failed = report.files_failed,
            "index run complete"
        );
        Ok(report)
    }

    /// Index one file. Returns false when the stored content hash already
    /// matches (no-op re-index).
    pub async fn index_file(
        &self,
        root: &Path,
        path: &Path,
        generate_embeddings: bool,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let bytes = std::fs::read(path)?;
        let hash = content_hash(&bytes);
        let file_id = file_node_id(path);

        if let Some(existing) = self.store.get_node(&file_id).await? {
            if existing.prop_str("contentHash") == Some(hash.as_str()) {
                debug!(file = %path.display(), "unchanged, skipping");
                return Ok(false);
            }
        }

        let content = self.load_content(path, &bytes).await?;
        let identity = identity_for(root, path);

        // One logical transaction per file: upsert the node, drop stale
        // chunks, rebuild chunks and vectors, then record the new hash.
        let mut props = Properties::new();
        props.insert("path".into(), json!(path.to_string_lossy()));
        props.insert("name".into(), json!(identity.name));
        props.insert("contentHash".into(), json!(hash));
        props.insert("size".into(), json!(bytes.len()));
        props.insert("language".into(), json!(identity.language));
        props.insert("lastIndexed".into(), json!(chrono::Utc::now().to_rfc3339()));

        if self.store.get_node(&file_id).await?.is_some() {
            self.store.update_node(&file_id, props).await?;
            self.store.remove_file_chunks(&file_id).await?;
        } else {
            self.store
                .add_node_with_id(&file_id, NodeType::File, props)
                .await?;
        }

        self.coordinator
            .materialize_chunks(&file_id, &identity, &content, generate_embeddings, cancel)
            .await?;
        Ok(true)
    }

    /// Text content of the file; images go through the vision provider when
    /// one is configured.
    async fn load_content(&self, path: &Path, bytes: &[u8]) -> Result<String> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase());
        let is_image = extension
            .as_deref()
            .map(|e| IMAGE_EXTENSIONS.contains(&e))
            .unwrap_or(false);

        if is_image {
            let Some(vision) = &self.vision else {
                return Err(MimirError::Disabled(
                    "image indexing requires a vision provider".into(),
                ));
            };
            let mime = format!("image/{}", extension.as_deref().unwrap_or("png"));
            return vision
                .describe_image(bytes, &mime, VISION_MAX_DIMENSION)
                .await;
        }

        String::from_utf8(bytes.to_vec())
            .map_err(|_| MimirError::Validation(format!("not valid UTF-8: {}", path.display())))
    }

    /// Deletes the file node (and chunks) for a path that disappeared.
    pub async fn remove_file(&self, path: &Path) -> Result<bool> {
        let file_id = file_node_id(path);
        if self.store.get_node(&file_id).await?.is_none() {
            return Ok(false);
        }
        self.store.remove_file_node(&file_id).await?;
        Ok(true)
    }

    /// Deletes every file node whose stored path is under `folder`.
    pub async fn remove_folder(&self, folder: &Path) -> Result<RemoveReport> {
        let prefix = folder.to_string_lossy().to_string();
        let mut report = RemoveReport::default();
        for node in self.store.query_nodes(Some(NodeType::File), None).await? {
            let Some(path) = node.prop_str("path") else {
                continue;
            };
            if Path::new(path).starts_with(&prefix) {
                let (_, chunks) = self.store.remove_file_node(&node.id).await?;
                report.files_deleted += 1;
                report.chunks_deleted += chunks;
            }
        }
        info!(
            folder = %folder.display(),
            files = report.files_deleted,
            chunks = report.chunks_deleted,
            "folder removed from index"
        );
        Ok(report)
    }
}

/// Discovery through the gitignore-aware walker.
fn discover(root: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .follow_links(false);
    if !recursive {
        builder.max_depth(Some(1));
    }
    let mut files: Vec<PathBuf> = builder
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

fn build_globset(patterns: Option<&[String]>) -> Result<Option<GlobSet>> {
    let Some(patterns) = patterns else {
        return Ok(None);
    };
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| MimirError::Validation(format!("bad glob {}: {}", pattern, e)))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| MimirError::Validation(format!("glob set: {}", e)))?;
    Ok(Some(set))
}

fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn identity_for(root: &Path, path: &Path) -> FileIdentity {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let relative = path
        .strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string();
    let directory = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string());
    let language = language_label(path.extension().and_then(|s| s.to_str()));
    FileIdentity {
        name,
        relative_path: relative,
        directory,
        language,
    }
}
