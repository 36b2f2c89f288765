use async_trait::async_trait;
use mimir_core::confirm::ConfirmationLedger;
use mimir_core::{EdgeType, EmbeddingProvider, MimirError, NodeType, Properties, Result};
use mimir_graph::{GraphStore, MemoryGraphDriver};
use mimir_search::{HybridSearch, LexicalIndex, RrfProfile, SearchOptions, VectorIndex};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

const DIMS: usize = 8;

/// Deterministic unit vectors keyed by the first token of the text, so
/// tests can steer cosine similarity precisely.
struct AxisProvider;

#[async_trait]
impl EmbeddingProvider for AxisProvider {
    fn model(&self) -> &str {
        "axis-test"
    }

    fn dimension(&self) -> usize {
        DIMS
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|text| {
                let axis = text
                    .split_whitespace()
                    .next()
                    .and_then(|t| t.parse::<usize>().ok())
                    .ok_or_else(|| MimirError::Vector("unparseable test text".into()))?;
                let mut v = vec![0.0f32; DIMS];
                v[axis % DIMS] = 1.0;
                Ok(v)
            })
            .collect()
    }
}

struct Fixture {
    store: Arc<GraphStore>,
    search: Arc<HybridSearch>,
}

fn fixture(with_provider: bool) -> Fixture {
    let driver = Arc::new(MemoryGraphDriver::new());
    let lexical = Arc::new(LexicalIndex::new());
    let vector = Arc::new(VectorIndex::new(DIMS));
    let provider: Option<Arc<dyn EmbeddingProvider>> = if with_provider {
        Some(Arc::new(AxisProvider))
    } else {
        None
    };
    let store = Arc::new(GraphStore::new(
        driver.clone(),
        lexical.clone(),
        vector.clone(),
        provider.clone(),
        Arc::new(ConfirmationLedger::new()),
        [NodeType::Memory].into_iter().collect(),
        None,
    ));
    let search = Arc::new(HybridSearch::new(lexical, vector, driver, provider, None));
    store.attach_search(Arc::clone(&search));
    Fixture { store, search }
}

fn props(pairs: &[(&str, Value)]) -> Properties {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn hybrid_prefers_nodes_matching_both_rankers() {
    let f = fixture(true);
    // axis 0 queries will be closest to this node's vector
    let both = f
        .store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("0 shared topic"))]))
        .await
        .unwrap();
    f.store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("1 shared topic"))]))
        .await
        .unwrap();

    let results = f
        .search
        .search("0 shared", &SearchOptions::default())
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].node.id, both.id);
    assert!(results[0].vector_similarity.is_some());
    assert!(results[0].lexical_score.is_some());
}

#[tokio::test]
async fn degrades_to_lexical_without_provider() {
    let f = fixture(false);
    f.store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("plain lexical entry"))]))
        .await
        .unwrap();

    let results = f
        .search
        .search("lexical", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].vector_similarity.is_none());
    assert!(results[0].lexical_score.is_some());
}

#[tokio::test]
async fn results_are_sorted_and_paginated_deterministically() {
    let f = fixture(false);
    for i in 0..6 {
        f.store
            .add_node(
                Some(NodeType::Memory),
                props(&[("content", json!(format!("paging entry number {}", i)))]),
            )
            .await
            .unwrap();
    }

    let mut opts = SearchOptions::default();
    opts.limit = Some(4);
    let first = f.search.search("paging entry", &opts).await.unwrap();
    assert_eq!(first.len(), 4);
    for pair in first.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    opts.offset = 4;
    let rest = f.search.search("paging entry", &opts).await.unwrap();
    assert_eq!(rest.len(), 2);

    let first_ids: HashSet<String> = first.into_iter().map(|r| r.node.id).collect();
    assert!(rest.iter().all(|r| !first_ids.contains(&r.node.id)));
}

#[tokio::test]
async fn type_and_property_filters_apply() {
    let f = fixture(false);
    f.store
        .add_node(
            Some(NodeType::Memory),
            props(&[("content", json!("filter target")), ("status", json!("open"))]),
        )
        .await
        .unwrap();
    f.store
        .add_node(
            Some(NodeType::Concept),
            props(&[("content", json!("filter target")), ("status", json!("open"))]),
        )
        .await
        .unwrap();
    f.store
        .add_node(
            Some(NodeType::Memory),
            props(&[("content", json!("filter target")), ("status", json!("done"))]),
        )
        .await
        .unwrap();

    let mut opts = SearchOptions::default();
    opts.types = Some(vec![NodeType::Memory]);
    opts.filters = Some(props(&[("status", json!("open"))]));
    let results = f.search.search("filter target", &opts).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].node.node_type, NodeType::Memory);
}

#[tokio::test]
async fn expansion_includes_neighbors_with_dampened_scores() {
    let f = fixture(false);
    let hit = f
        .store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("expansion anchor"))]))
        .await
        .unwrap();
    let neighbor = f
        .store
        .add_node(Some(NodeType::Concept), props(&[("title", json!("silent neighbor"))]))
        .await
        .unwrap();
    f.store
        .add_edge(&hit.id, &neighbor.id, EdgeType::RelatesTo, None)
        .await
        .unwrap();

    let mut opts = SearchOptions::default();
    opts.depth = 2;
    let results = f.search.search("expansion anchor", &opts).await.unwrap();

    let anchor = results.iter().find(|r| r.node.id == hit.id).unwrap();
    let expanded = results.iter().find(|r| r.node.id == neighbor.id).unwrap();
    assert_eq!(expanded.hops, 1);
    let expected = anchor.score * 0.7;
    assert!((expanded.score - expected).abs() < 1e-6);

    // depth 1 leaves the neighbor out
    let direct = f
        .search
        .search("expansion anchor", &SearchOptions::default())
        .await
        .unwrap();
    assert!(direct.iter().all(|r| r.node.id != neighbor.id));
}

#[tokio::test]
async fn chunk_hits_expose_their_owning_file() {
    let f = fixture(false);
    let file = f
        .store
        .add_node_with_id(
            "file-owner",
            NodeType::File,
            props(&[("path", json!("/w/doc.md")), ("name", json!("doc.md"))]),
        )
        .await
        .unwrap();
    let chunk = f
        .store
        .add_node_with_id(
            "fileChunk-1",
            NodeType::FileChunk,
            props(&[("content", json!("chunk with needle inside"))]),
        )
        .await
        .unwrap();
    f.store
        .add_edge(&file.id, &chunk.id, EdgeType::Contains, None)
        .await
        .unwrap();

    let results = f
        .search
        .search("needle", &SearchOptions::default())
        .await
        .unwrap();
    let ids: Vec<&str> = results.iter().map(|r| r.node.id.as_str()).collect();
    assert!(ids.contains(&"fileChunk-1"));
    assert!(ids.contains(&"file-owner"));

    let chunk_hit = results.iter().find(|r| r.node.id == "fileChunk-1").unwrap();
    let file_hit = results.iter().find(|r| r.node.id == "file-owner").unwrap();
    assert_eq!(file_hit.score, chunk_hit.score);
}

#[tokio::test]
async fn min_similarity_gates_results() {
    let f = fixture(true);
    f.store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("0 vectors here"))]))
        .await
        .unwrap();
    f.store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("1 vectors here"))]))
        .await
        .unwrap();

    let mut opts = SearchOptions::default();
    opts.min_similarity = Some(0.9);
    // query embeds on axis 0, so only the axis-0 node passes the gate
    let results = f.search.search("0 vectors", &opts).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].vector_similarity.unwrap() >= 0.9);
}

#[tokio::test]
async fn pinned_profile_overrides_adaptive_choice() {
    let f = fixture(true);
    // the text does not start with a digit, so the test provider rejects it
    // and this node stays lexical-only
    f.store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("profile check alpha"))]))
        .await
        .unwrap();

    let mut opts = SearchOptions::default();
    opts.rrf = Some(RrfProfile::KEYWORD);
    let keyword = f.search.search("profile check", &opts).await.unwrap();
    opts.rrf = Some(RrfProfile::SEMANTIC);
    let semantic = f.search.search("profile check", &opts).await.unwrap();

    // under the keyword profile the lexical-only hit clears the minScore
    // cutoff; the semantic profile down-weights it below the floor
    assert_eq!(keyword.len(), 1);
    assert!(keyword[0].score >= 0.01);
    assert!(semantic.is_empty());
}

#[tokio::test]
async fn lexical_snippets_survive_to_results() {
    let f = fixture(false);
    f.store
        .add_node(
            Some(NodeType::Memory),
            props(&[("content", json!("first line\nsnippet target line\nlast line"))]),
        )
        .await
        .unwrap();

    let results = f
        .search
        .search("snippet target", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].match_lines.is_empty());
    assert!(results[0].match_lines[0].snippet.contains("snippet"));
}

#[tokio::test]
async fn embedding_stats_count_per_type() {
    let f = fixture(true);
    f.store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("0 first"))]))
        .await
        .unwrap();
    f.store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("1 second"))]))
        .await
        .unwrap();
    // concepts are not in the embedding-bearing type set
    f.store
        .add_node(Some(NodeType::Concept), props(&[("content", json!("2 third"))]))
        .await
        .unwrap();

    let stats = f.store.embedding_stats().await.unwrap();
    assert_eq!(stats.get("memory"), Some(&2));
    assert!(stats.get("concept").is_none());
}

#[tokio::test]
async fn cancellation_short_circuits_to_lexical() {
    let f = fixture(true);
    f.store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("0 cancellable entry"))]))
        .await
        .unwrap();

    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let results = f
        .search
        .search_with_cancel("0 cancellable", &SearchOptions::default(), &cancel)
        .await
        .unwrap();
    // the lexical ranker still answers; the vector leg was skipped
    assert_eq!(results.len(), 1);
    assert!(results[0].vector_similarity.is_none());
    assert!(results[0].lexical_score.is_some());
}

#[tokio::test]
async fn empty_index_and_empty_query_return_empty() {
    let f = fixture(true);
    assert!(f
        .search
        .search("anything", &SearchOptions::default())
        .await
        .unwrap()
        .is_empty());
    assert!(f
        .search
        .search("", &SearchOptions::default())
        .await
        .unwrap()
        .is_empty());
}
