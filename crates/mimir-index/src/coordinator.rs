//! Embedding coordinator: turns a file's content into fileChunk nodes and
//! batched embedding vectors.
//!
//! Chunk nodes are always materialized so lexical search works even with
//! embeddings disabled; vectors are only written when a provider is
//! configured and the folder asked for them.

use crate::chunker::{chunk_text, metadata_prefix, Chunk, ChunkerConfig};
use mimir_core::{new_node_id, EmbeddingProvider, MimirError, NodeType, Properties, Result};
use mimir_graph::GraphStore;
use mimir_search::{VectorEntry, VectorIndex};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Embedding batches in flight at once.
const EMBED_CONCURRENCY: usize = 4;

/// Identity of the file being chunked, used for the metadata prefix.
#[derive(Debug, Clone)]
pub struct FileIdentity {
    pub name: String,
    pub relative_path: String,
    pub directory: String,
    pub language: &'static str,
}

#[derive(Debug, Default)]
pub struct ChunkOutcome {
    pub chunk_ids: Vec<String>,
    pub embedded: usize,
}

pub struct EmbeddingCoordinator {
    store: Arc<GraphStore>,
    vector: Arc<VectorIndex>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    config: ChunkerConfig,
}

impl EmbeddingCoordinator {
    pub fn new(
        store: Arc<GraphStore>,
        vector: Arc<VectorIndex>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        config: ChunkerConfig,
    ) -> Self {
        Self {
            store,
            vector,
            provider,
            config,
        }
    }

    pub fn embeddings_enabled(&self) -> bool {
        self.provider.is_some()
    }

    /// Chunk `content`, materialize fileChunk nodes linked to the file via
    /// `contains`, and (optionally) embed each chunk. Embedding batches
    /// abort at the next batch boundary on cancellation; already-written
    /// chunks stay.
    pub async fn materialize_chunks(
        &self,
        file_id: &str,
        identity: &FileIdentity,
        content: &str,
        generate_embeddings: bool,
        cancel: &CancellationToken,
    ) -> Result<ChunkOutcome> {
        let chunks = chunk_text(content, &self.config);
        let mut outcome = ChunkOutcome::default();
        if chunks.is_empty() {
            return Ok(outcome);
        }

        for chunk in &chunks {
            let chunk_id = self.create_chunk_node(file_id, identity, chunk).await?;
            outcome.chunk_ids.push(chunk_id);
        }

        if generate_embeddings {
            if let Some(provider) = &self.provider {
                outcome.embedded = self
                    .embed_chunks(provider, file_id, identity, &chunks, &outcome.chunk_ids, cancel)
                    .await?;
            }
        }

        debug!(
            file = file_id,
            chunks = outcome.chunk_ids.len(),
            embedded = outcome.embedded,
            "chunks materialized"
        );
        Ok(outcome)
    }

    async fn create_chunk_node(
        &self,
        file_id: &str,
        identity: &FileIdentity,
        chunk: &Chunk,
    ) -> Result<String> {
        let chunk_id = new_node_id(NodeType::FileChunk);
        let mut props = Properties::new();
        props.insert("content".into(), json!(chunk.text));
        props.insert("chunkIndex".into(), json!(chunk.chunk_index));
        props.insert("startOffset".into(), json!(chunk.start_offset));
        props.insert("endOffset".into(), json!(chunk.end_offset));
        props.insert("path".into(), json!(identity.relative_path));

        self.store
            .add_node_with_id(&chunk_id, NodeType::FileChunk, props)
            .await?;
        self.store
            .add_edge(file_id, &chunk_id, mimir_core::EdgeType::Contains, None)
            .await?;
        Ok(chunk_id)
    }

    /// Provider calls run through a bounded worker pool: up to
    /// [`EMBED_CONCURRENCY`] batches in flight, each bounded by the
    /// provider's batch limit. Vector upserts happen after collection so
    /// index writes stay on the caller.
    async fn embed_chunks(
        &self,
        provider: &Arc<dyn EmbeddingProvider>,
        file_id: &str,
        identity: &FileIdentity,
        chunks: &[Chunk],
        chunk_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<usize> {
        let prefix = metadata_prefix(
            identity.language,
            &identity.name,
            &identity.relative_path,
            &identity.directory,
        );
        let batch_size = provider.max_batch().max(1);
        let semaphore = Arc::new(Semaphore::new(EMBED_CONCURRENCY));
        let mut join_set = tokio::task::JoinSet::new();

        for (batch_index, batch_chunks) in chunks.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                debug!(file = file_id, "embedding aborted at batch boundary");
                break;
            }
            let texts: Vec<String> = batch_chunks
                .iter()
                .map(|c| format!("{}\n{}", prefix, c.text))
                .collect();
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| MimirError::Cancelled("embedding pool closed".into()))?;
            let provider = Arc::clone(provider);
            join_set.spawn(async move {
                let _permit = permit;
                (batch_index, provider.embed(&texts).await)
            });
        }

        let mut by_batch: Vec<Option<Vec<Vec<f32>>>> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((batch_index, result)) = joined else {
                warn!(file = file_id, "embedding worker panicked");
                continue;
            };
            if by_batch.len() <= batch_index {
                by_batch.resize(batch_index + 1, None);
            }
            match result {
                Ok(vectors) => by_batch[batch_index] = Some(vectors),
                Err(e) => warn!(file = file_id, "embedding batch failed: {}", e),
            }
        }

        let mut embedded = 0;
        for (batch_index, vectors) in by_batch.into_iter().enumerate() {
            let Some(vectors) = vectors else { continue };
            let start = batch_index * batch_size;
            for (offset, vector) in vectors.into_iter().enumerate() {
                let Some((chunk, chunk_id)) =
                    chunks.get(start + offset).zip(chunk_ids.get(start + offset))
                else {
                    break;
                };
                let dims = vector.len();
                self.vector.upsert_chunk(
                    chunk_id,
                    VectorEntry {
                        node_id: file_id.to_string(),
                        chunk_index: chunk.chunk_index,
                        start_offset: chunk.start_offset,
                        end_offset: chunk.end_offset,
                        vector,
                    },
                )?;
                let mut meta = Properties::new();
                meta.insert("embeddingDims".into(), json!(dims));
                meta.insert("embeddingModel".into(), json!(provider.model()));
                self.store.update_node(chunk_id, meta).await?;
                embedded += 1;
            }
        }
        Ok(embedded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::HashEmbeddingProvider;
    use mimir_core::confirm::ConfirmationLedger;
    use mimir_core::Direction;
    use mimir_graph::MemoryGraphDriver;
    use mimir_search::LexicalIndex;
    use std::collections::HashSet;

    fn identity() -> FileIdentity {
        FileIdentity {
            name: "notes.md".into(),
            relative_path: "docs/notes.md".into(),
            directory: "docs".into(),
            language: "Markdown",
        }
    }

    fn setup(with_provider: bool) -> (Arc<GraphStore>, EmbeddingCoordinator) {
        let driver = Arc::new(MemoryGraphDriver::new());
        let lexical = Arc::new(LexicalIndex::new());
        let vector = Arc::new(VectorIndex::new(8));
        let provider: Option<Arc<dyn EmbeddingProvider>> = if with_provider {
            Some(Arc::new(HashEmbeddingProvider::new(8)))
        } else {
            None
        };
        let store = Arc::new(GraphStore::new(
            driver,
            lexical,
            Arc::clone(&vector),
            None,
            Arc::new(ConfirmationLedger::new()),
            HashSet::new(),
            None,
        ));
        let coordinator = EmbeddingCoordinator::new(
            Arc::clone(&store),
            vector,
            provider,
            ChunkerConfig::default(),
        );
        (store, coordinator)
    }

    async fn file_node(store: &GraphStore) -> String {
        store
            .add_node_with_id("file-test", NodeType::File, Properties::new())
            .await
            .unwrap();
        "file-test".to_string()
    }

    #[tokio::test]
    async fn chunks_are_linked_via_contains() {
        let (store, coordinator) = setup(true);
        let file_id = file_node(&store).await;
        let content = "word ".repeat(400);

        let outcome = coordinator
            .materialize_chunks(&file_id, &identity(), &content, true, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.chunk_ids.len(), 3);
        assert_eq!(outcome.embedded, 3);

        let edges = store.get_edges(&file_id, Direction::Out).await.unwrap();
        assert_eq!(edges.len(), 3);
        let targets: HashSet<&str> = edges.iter().map(|e| e.target.as_str()).collect();
        for chunk_id in &outcome.chunk_ids {
            assert!(targets.contains(chunk_id.as_str()));
            let chunk = store.get_node(chunk_id).await.unwrap().unwrap();
            assert_eq!(chunk.node_type, NodeType::FileChunk);
            assert_eq!(chunk.properties["embeddingDims"], json!(8));
            assert_eq!(chunk.properties["embeddingModel"], json!("hash-embed"));
        }
    }

    #[tokio::test]
    async fn disabled_embeddings_still_materialize_chunks() {
        let (store, coordinator) = setup(false);
        let file_id = file_node(&store).await;

        let outcome = coordinator
            .materialize_chunks(
                &file_id,
                &identity(),
                "a small note",
                true,
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.chunk_ids.len(), 1);
        assert_eq!(outcome.embedded, 0);
        assert_eq!(store.vector().len(), 0);

        // chunks are still lexically searchable
        let hits = store.lexical().search("small note");
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn cancellation_stops_at_batch_boundary() {
        let (store, coordinator) = setup(true);
        let file_id = file_node(&store).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = coordinator
            .materialize_chunks(&file_id, &identity(), &"word ".repeat(400), true, &cancel)
            .await
            .unwrap();
        // chunk nodes exist, but no embedding batch ran
        assert_eq!(outcome.chunk_ids.len(), 3);
        assert_eq!(outcome.embedded, 0);
    }

    #[tokio::test]
    async fn short_file_spans_whole_content() {
        let (store, coordinator) = setup(true);
        let file_id = file_node(&store).await;
        let outcome = coordinator
            .materialize_chunks(&file_id, &identity(), "tiny", true, &CancellationToken::new())
            .await
            .unwrap();
        let chunk = store.get_node(&outcome.chunk_ids[0]).await.unwrap().unwrap();
        assert_eq!(chunk.properties["startOffset"], json!(0));
        assert_eq!(chunk.properties["endOffset"], json!(4));
    }
}
