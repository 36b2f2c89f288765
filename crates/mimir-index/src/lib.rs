pub mod chunker;
pub mod coordinator;
pub mod indexer;
pub mod providers;
pub mod watch_config;
pub mod watcher;

pub use chunker::{chunk_text, language_label, metadata_prefix, Chunk, ChunkerConfig};
pub use coordinator::{ChunkOutcome, EmbeddingCoordinator, FileIdentity};
pub use indexer::{file_node_id, FileIndexer, IndexOptions, IndexReport, RemoveReport};
pub use providers::{build_provider, HashEmbeddingProvider, OpenAiEmbeddingProvider, OpenAiVisionProvider};
pub use watch_config::{watch_config_id, WatchConfig, WatchConfigStore, STATUS_ACTIVE, STATUS_INACTIVE};
pub use watcher::WatchManager;
