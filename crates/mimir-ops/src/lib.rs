//! Service assembly and the transport-neutral operation surface.
//!
//! `Mimir::init` wires the driver, indexes, search engine, indexing
//! pipeline, and background sweepers from one config; `ops` exposes the
//! JSON operations a transport shell (HTTP, MCP, CLI) dispatches into.

pub mod ops;
pub mod wire;

use mimir_core::confirm::{self, ConfirmationLedger};
use mimir_core::{MimirConfig, Result};
use mimir_graph::{GraphStore, LockService, MemoryGraphDriver, RetentionSweeper};
use mimir_index::{
    build_provider, ChunkerConfig, EmbeddingCoordinator, FileIndexer, WatchConfigStore,
    WatchManager,
};
use mimir_search::{HybridSearch, LexicalIndex, RrfProfile, VectorIndex};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One assembled Mimir service instance.
pub struct Mimir {
    config: MimirConfig,
    store: Arc<GraphStore>,
    search: Arc<HybridSearch>,
    locks: Arc<LockService>,
    indexer: Arc<FileIndexer>,
    watch: Arc<WatchManager>,
    ledger: Arc<ConfirmationLedger>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Mimir {
    /// Build every component, restore persisted state, re-attach watchers,
    /// and start the background sweepers.
    pub async fn init(config: MimirConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let cancel = CancellationToken::new();

        let ledger = confirm::init_global();
        let driver: Arc<dyn mimir_core::GraphDriver> = Arc::new(MemoryGraphDriver::new());
        let lexical = Arc::new(LexicalIndex::new());
        let provider = build_provider(&config.embedding, config.tls_no_verify)?;
        let dimension = provider
            .as_ref()
            .map(|p| p.dimension())
            .unwrap_or(config.embedding.dimension);
        let vector = Arc::new(VectorIndex::new(dimension));

        let store = Arc::new(GraphStore::new(
            Arc::clone(&driver),
            Arc::clone(&lexical),
            Arc::clone(&vector),
            provider.clone(),
            Arc::clone(&ledger),
            config.embedding_types.clone(),
            Some(config.data_dir.clone()),
        ));
        store.restore().await?;

        let default_profile = config
            .rrf_profile
            .as_deref()
            .and_then(RrfProfile::by_name);
        let search = Arc::new(HybridSearch::new(
            lexical,
            Arc::clone(&vector),
            store.driver(),
            provider.clone(),
            default_profile,
        ));
        store.attach_search(Arc::clone(&search));

        let locks = Arc::new(LockService::new(store.driver()));
        let coordinator = EmbeddingCoordinator::new(
            Arc::clone(&store),
            vector,
            provider,
            ChunkerConfig::new(config.chunk_size, config.chunk_overlap),
        );
        let indexer = Arc::new(FileIndexer::new(Arc::clone(&store), coordinator, None));
        let configs = Arc::new(WatchConfigStore::new(Arc::clone(&store)));
        let watch = Arc::new(WatchManager::new(Arc::clone(&indexer), configs));
        mimir_index::watcher::init_global(Arc::clone(&watch));
        watch.recover().await?;

        let service = Arc::new(Self {
            config,
            store,
            search,
            locks,
            indexer,
            watch,
            ledger,
            cancel,
            tasks: Mutex::new(Vec::new()),
        });
        service.spawn_background_tasks();
        info!("mimir service initialized");
        Ok(service)
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        tasks.push(confirm::spawn_sweeper(&self.ledger));
        tasks.push(self.store.spawn_snapshot_task(
            Duration::from_secs(self.config.snapshot_interval_secs.max(1)),
            self.cancel.child_token(),
        ));
        tasks.push(
            self.locks
                .spawn_cleanup_task(Duration::from_secs(30), self.cancel.child_token()),
        );
        if self.config.retention.enabled {
            let sweeper = Arc::new(RetentionSweeper::new(
                Arc::clone(&self.store),
                self.config.retention.clone(),
            ));
            tasks.push(sweeper.spawn(self.cancel.child_token()));
        }
    }

    /// Graceful teardown: watchers drain, sweepers stop, one final
    /// snapshot is written, singletons are cleared.
    pub async fn shutdown(&self) {
        self.watch.shutdown().await;
        mimir_index::watcher::clear_global_if(&self.watch);
        self.cancel.cancel();
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
        }
        if let Err(e) = self.store.persist().await {
            tracing::warn!("final persist failed: {}", e);
        }
        confirm::teardown_global();
        info!("mimir service stopped");
    }

    pub fn config(&self) -> &MimirConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn search(&self) -> &Arc<HybridSearch> {
        &self.search
    }

    pub fn locks(&self) -> &Arc<LockService> {
        &self.locks
    }

    pub fn indexer(&self) -> &Arc<FileIndexer> {
        &self.indexer
    }

    pub fn watch(&self) -> &Arc<WatchManager> {
        &self.watch
    }

    pub fn ledger(&self) -> &Arc<ConfirmationLedger> {
        &self.ledger
    }
}

/// Install the tracing subscriber once, honoring `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
