//! The lexical and vector indexes double as the reference implementations
//! of the pluggable backend traits; these tests exercise them through the
//! trait objects the way an alternate backend would be driven.

use mimir_search::{LexicalIndex, VectorIndex};
use mimir_core::{FulltextBackend, VectorBackend};
use std::sync::Arc;

fn fields(text: &str) -> Vec<(String, String)> {
    vec![("content".to_string(), text.to_string())]
}

#[test]
fn fulltext_backend_round_trip() {
    let backend: Arc<dyn FulltextBackend> = Arc::new(LexicalIndex::new());
    backend.index_document("d1", &fields("rust memory graph service"));
    backend.index_document("d2", &fields("unrelated text"));

    let hits = backend.query("memory graph").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "d1");
    assert!(hits[0].score > 0.0);

    backend.remove_document("d1");
    assert!(backend.query("memory").unwrap().is_empty());
}

#[test]
fn fulltext_backend_empty_query_is_empty_set() {
    let backend: Arc<dyn FulltextBackend> = Arc::new(LexicalIndex::new());
    backend.index_document("d1", &fields("something"));
    assert!(backend.query("").unwrap().is_empty());
}

#[test]
fn vector_backend_round_trip() {
    let backend: Arc<dyn VectorBackend> = Arc::new(VectorIndex::new(3));
    backend.upsert("c1", "file-1", 0, vec![1.0, 0.0, 0.0]).unwrap();
    backend.upsert("c2", "file-1", 1, vec![0.0, 1.0, 0.0]).unwrap();
    backend.upsert("c3", "file-2", 0, vec![0.9, 0.1, 0.0]).unwrap();

    let hits = backend.knn(&[1.0, 0.0, 0.0], 2, None).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, "c1");
    assert_eq!(hits[1].id, "c3");

    backend.remove("c1");
    let hits = backend.knn(&[1.0, 0.0, 0.0], 2, Some(0.5)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "c3");

    backend.remove_node("file-1");
    let hits = backend.knn(&[0.0, 1.0, 0.0], 5, None).unwrap();
    assert!(hits.iter().all(|h| h.id != "c2"));
}

#[test]
fn vector_backend_rejects_wrong_dimension() {
    let backend: Arc<dyn VectorBackend> = Arc::new(VectorIndex::new(4));
    let err = backend.upsert("c1", "n", 0, vec![1.0]).unwrap_err();
    assert_eq!(err.kind(), "EVector");
}
