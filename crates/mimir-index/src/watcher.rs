//! Live index maintenance: one worker task per watched folder.
//!
//! OS events are debounced per file so editor save-storms collapse into a
//! single re-index. Workers serialize work within their folder and run in
//! parallel across folders; all of them observe one shutdown signal and
//! drain in-flight work within a bounded grace period.

use crate::indexer::{FileIndexer, IndexOptions, IndexReport, RemoveReport};
use crate::watch_config::{WatchConfig, WatchConfigStore, STATUS_INACTIVE};
use globset::{Glob, GlobSet, GlobSetBuilder};
use mimir_core::{MimirError, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pending events per worker before forced flushing kicks in.
const MAX_PENDING: usize = 1024;
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq)]
enum PendingAction {
    Index,
    Remove,
}

struct WorkerHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

pub struct WatchManager {
    indexer: Arc<FileIndexer>,
    configs: Arc<WatchConfigStore>,
    workers: Mutex<HashMap<PathBuf, WorkerHandle>>,
    cancel: CancellationToken,
}

impl WatchManager {
    pub fn new(indexer: Arc<FileIndexer>, configs: Arc<WatchConfigStore>) -> Self {
        Self {
            indexer,
            configs,
            workers: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn configs(&self) -> &Arc<WatchConfigStore> {
        &self.configs
    }

    /// Register a folder: persist its config, run a full index pass, then
    /// start the live worker.
    pub async fn add_folder(&self, config: WatchConfig) -> Result<IndexReport> {
        let path = PathBuf::from(&config.path);
        if !path.is_dir() {
            return Err(MimirError::NotFound(format!(
                "folder not found: {}",
                config.path
            )));
        }
        self.configs.upsert(&config).await?;

        let opts = index_options(&config);
        let report = self
            .indexer
            .index_folder(&opts, &self.cancel.child_token())
            .await?;
        self.configs
            .record_index_run(&path, report.files_indexed)
            .await?;

        self.start_worker(config)?;
        Ok(report)
    }

    /// Unregister a folder: stop its worker, drop the config node, and
    /// delete its file/chunk nodes.
    pub async fn remove_folder(&self, path: &Path) -> Result<RemoveReport> {
        if let Some(handle) = self.workers.lock().remove(path) {
            handle.cancel.cancel();
            handle.task.abort();
        }
        self.configs.remove(path).await?;
        self.indexer.remove_folder(path).await
    }

    /// Startup recovery: re-attach every active config; mark configs whose
    /// paths vanished as inactive.
    pub async fn recover(&self) -> Result<usize> {
        let mut attached = 0;
        for config in self.configs.list_active().await? {
            let path = PathBuf::from(&config.path);
            if !path.is_dir() {
                self.configs
                    .set_status(&path, STATUS_INACTIVE, Some("path_not_found"))
                    .await?;
                warn!(path = %config.path, "watched path vanished, marked inactive");
                continue;
            }
            // catch up on anything that changed while we were down
            let opts = index_options(&config);
            match self
                .indexer
                .index_folder(&opts, &self.cancel.child_token())
                .await
            {
                Ok(report) => {
                    self.configs
                        .record_index_run(&path, report.files_indexed)
                        .await?;
                }
                Err(e) => warn!(path = %config.path, "recovery index failed: {}", e),
            }
            self.start_worker(config)?;
            attached += 1;
        }
        info!(attached, "watch recovery complete");
        Ok(attached)
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.workers.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Stop accepting events, give workers a bounded drain window, then
    /// drop them.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles: Vec<WorkerHandle> = {
            let mut workers = self.workers.lock();
            workers.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            handle.cancel.cancel();
            if tokio::time::timeout(DRAIN_GRACE, handle.task).await.is_err() {
                warn!("watch worker did not drain in time");
            }
        }
        info!("watch manager stopped");
    }

    fn start_worker(&self, config: WatchConfig) -> Result<()> {
        let path = PathBuf::from(&config.path);
        let mut workers = self.workers.lock();
        if workers.contains_key(&path) {
            return Ok(());
        }
        let cancel = self.cancel.child_token();
        let task = tokio::spawn(run_worker(
            Arc::clone(&self.indexer),
            config,
            cancel.clone(),
        ));
        workers.insert(path, WorkerHandle { cancel, task });
        Ok(())
    }
}

fn index_options(config: &WatchConfig) -> IndexOptions {
    IndexOptions {
        path: PathBuf::from(&config.path),
        recursive: config.recursive,
        file_patterns: config.file_patterns.clone(),
        ignore_patterns: config.ignore_patterns.clone(),
        generate_embeddings: config.generate_embeddings,
    }
}

struct EventFilter {
    root: PathBuf,
    allow: Option<GlobSet>,
    deny: Option<GlobSet>,
}

impl EventFilter {
    fn new(config: &WatchConfig) -> Self {
        let mut deny_patterns = config.ignore_patterns.clone();
        deny_patterns.push(".git/**".to_string());
        Self {
            root: PathBuf::from(&config.path),
            allow: build_globset(config.file_patterns.as_deref()),
            deny: build_globset(Some(&deny_patterns)),
        }
    }

    fn admits(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        if let Some(deny) = &self.deny {
            if deny.is_match(relative) {
                return false;
            }
        }
        if let Some(allow) = &self.allow {
            if !allow.is_match(relative) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: Option<&[String]>) -> Option<GlobSet> {
    let patterns = patterns?;
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, "skipping bad glob: {}", e),
        }
    }
    builder.build().ok()
}

async fn run_worker(indexer: Arc<FileIndexer>, config: WatchConfig, cancel: CancellationToken) {
    let root = PathBuf::from(&config.path);
    let debounce = Duration::from_millis(config.debounce_ms.max(1));
    let filter = EventFilter::new(&config);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
        let _ = tx.send(res);
    }) {
        Ok(w) => w,
        Err(e) => {
            warn!(path = %root.display(), "watcher init failed: {}", e);
            return;
        }
    };
    let mode = if config.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    if let Err(e) = watcher.watch(&root, mode) {
        warn!(path = %root.display(), "watch failed: {}", e);
        return;
    }
    info!(path = %root.display(), "watching");

    // path -> (action, last event time); the map itself coalesces repeats
    let mut pending: HashMap<PathBuf, (PendingAction, Instant)> = HashMap::new();
    let mut ticker = tokio::time::interval(debounce.min(Duration::from_millis(250)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // drain everything still buffered, then stop
                flush(&indexer, &root, &config, &mut pending, None).await;
                break;
            }
            maybe = rx.recv() => {
                match maybe {
                    Some(Ok(event)) => buffer_event(&filter, &mut pending, event),
                    Some(Err(e)) => warn!("watcher error: {}", e),
                    None => break,
                }
                if pending.len() > MAX_PENDING {
                    // backpressure: flush regardless of debounce age
                    flush(&indexer, &root, &config, &mut pending, None).await;
                }
            }
            _ = ticker.tick() => {
                flush(&indexer, &root, &config, &mut pending, Some(debounce)).await;
            }
        }
    }
    debug!(path = %root.display(), "worker exited");
}

fn buffer_event(
    filter: &EventFilter,
    pending: &mut HashMap<PathBuf, (PendingAction, Instant)>,
    event: Event,
) {
    let action = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => PendingAction::Index,
        EventKind::Remove(_) => PendingAction::Remove,
        _ => return,
    };
    let now = Instant::now();
    for path in event.paths {
        if !filter.admits(&path) {
            continue;
        }
        // a later event for the same path supersedes the buffered one
        pending.insert(path, (action, now));
    }
}

/// Process buffered events older than `min_age` (all of them when `None`),
/// sequentially, so per-file work within a folder never interleaves.
async fn flush(
    indexer: &Arc<FileIndexer>,
    root: &Path,
    config: &WatchConfig,
    pending: &mut HashMap<PathBuf, (PendingAction, Instant)>,
    min_age: Option<Duration>,
) {
    let now = Instant::now();
    let due: Vec<(PathBuf, PendingAction)> = pending
        .iter()
        .filter(|(_, (_, seen))| min_age.map_or(true, |age| now.duration_since(*seen) >= age))
        .map(|(path, (action, _))| (path.clone(), *action))
        .collect();

    for (path, action) in due {
        pending.remove(&path);
        let result = match action {
            PendingAction::Index => {
                if path.exists() {
                    indexer
                        .index_file(root, &path, config.generate_embeddings, &CancellationToken::new())
                        .await
                        .map(|_| ())
                } else {
                    indexer.remove_file(&path).await.map(|_| ())
                }
            }
            PendingAction::Remove => indexer.remove_file(&path).await.map(|_| ()),
        };
        if let Err(e) = result {
            warn!(file = %path.display(), "watch re-index failed: {}", e);
        }
    }
}

static GLOBAL_MANAGER: Lazy<RwLock<Option<Arc<WatchManager>>>> = Lazy::new(|| RwLock::new(None));

/// Installs the process-wide watch manager.
pub fn init_global(manager: Arc<WatchManager>) {
    *GLOBAL_MANAGER.write() = Some(manager);
}

pub fn global() -> Result<Arc<WatchManager>> {
    GLOBAL_MANAGER
        .read()
        .clone()
        .ok_or_else(|| MimirError::Configuration("watch manager not initialized".into()))
}

/// Shuts the manager down and clears the global slot.
pub async fn teardown_global() {
    let manager = GLOBAL_MANAGER.write().take();
    if let Some(manager) = manager {
        manager.shutdown().await;
    }
}

/// Clears the slot only when it still holds `manager`, so one service
/// instance cannot evict another's registration.
pub fn clear_global_if(manager: &Arc<WatchManager>) {
    let mut slot = GLOBAL_MANAGER.write();
    if slot.as_ref().is_some_and(|m| Arc::ptr_eq(m, manager)) {
        *slot = None;
    }
}
