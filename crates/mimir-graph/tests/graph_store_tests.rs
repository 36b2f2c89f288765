use mimir_core::confirm::ConfirmationLedger;
use mimir_core::{Direction, EdgeType, MimirError, NodeType, Properties, RetentionSettings};
use mimir_graph::{
    get_task_context, ClearOutcome, ClearScope, DeleteOutcome, GraphStore, LockService,
    MemoryGraphDriver, RetentionSweeper, CASCADE_CONFIRM_THRESHOLD,
};
use mimir_search::{HybridSearch, LexicalIndex, SearchOptions, VectorIndex};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

fn props(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn new_store() -> Arc<GraphStore> {
    new_store_with_dir(None)
}

fn new_store_with_dir(data_dir: Option<std::path::PathBuf>) -> Arc<GraphStore> {
    let driver = Arc::new(MemoryGraphDriver::new());
    let lexical = Arc::new(LexicalIndex::new());
    let vector = Arc::new(VectorIndex::new(4));
    let ledger = Arc::new(ConfirmationLedger::new());
    let store = Arc::new(GraphStore::new(
        driver.clone(),
        lexical.clone(),
        vector.clone(),
        None,
        ledger,
        HashSet::new(),
        data_dir,
    ));
    store.attach_search(Arc::new(HybridSearch::new(
        lexical, vector, driver, None, None,
    )));
    store
}

#[tokio::test]
async fn add_then_get_returns_merged_properties_with_increasing_updated() {
    let store = new_store();
    let node = store
        .add_node(Some(NodeType::Memory), props(&[("title", json!("A"))]))
        .await
        .unwrap();
    let t0 = node.updated;

    let merged = store
        .update_node(&node.id, props(&[("content", json!("auth"))]))
        .await
        .unwrap();
    assert_eq!(merged.properties["title"], json!("A"));
    assert_eq!(merged.properties["content"], json!("auth"));
    assert!(merged.updated > t0);

    let fetched = store.get_node(&node.id).await.unwrap().unwrap();
    assert_eq!(fetched.properties["content"], json!("auth"));
}

#[tokio::test]
async fn default_node_type_is_memory() {
    let store = new_store();
    let node = store.add_node(None, Properties::new()).await.unwrap();
    assert_eq!(node.node_type, NodeType::Memory);
    assert!(node.id.starts_with("memory-"));
}

#[tokio::test]
async fn deleting_an_endpoint_deletes_the_edge() {
    let store = new_store();
    let a = store.add_node(None, Properties::new()).await.unwrap();
    let b = store.add_node(None, Properties::new()).await.unwrap();
    let edge = store
        .add_edge(&a.id, &b.id, EdgeType::DependsOn, None)
        .await
        .unwrap();

    match store.delete_node(&a.id, None).await.unwrap() {
        DeleteOutcome::Deleted { edges_removed, .. } => assert_eq!(edges_removed, 1),
        other => panic!("unexpected: {:?}", other),
    }
    assert!(store.get_edge(&edge.id).await.unwrap().is_none());
    assert!(store
        .get_edges(&b.id, Direction::Both)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn large_cascade_requires_confirmation() {
    let store = new_store();
    let hub = store.add_node(None, Properties::new()).await.unwrap();
    for _ in 0..(CASCADE_CONFIRM_THRESHOLD + 1) {
        let spoke = store.add_node(None, Properties::new()).await.unwrap();
        store
            .add_edge(&hub.id, &spoke.id, EdgeType::RelatesTo, None)
            .await
            .unwrap();
    }

    let token = match store.delete_node(&hub.id, None).await.unwrap() {
        DeleteOutcome::NeedsConfirmation {
            cascade_edges,
            confirmation,
        } => {
            assert_eq!(cascade_edges, CASCADE_CONFIRM_THRESHOLD + 1);
            confirmation.id
        }
        other => panic!("expected confirmation request, got {:?}", other),
    };

    // a wrong token is rejected, state unchanged
    let err = store.delete_node(&hub.id, Some("bogus")).await.unwrap_err();
    assert_eq!(err.kind(), "EConfirmationInvalid");
    assert!(store.get_node(&hub.id).await.unwrap().is_some());

    match store.delete_node(&hub.id, Some(&token)).await.unwrap() {
        DeleteOutcome::Deleted { edges_removed, .. } => {
            assert_eq!(edges_removed, CASCADE_CONFIRM_THRESHOLD + 1)
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(store.get_node(&hub.id).await.unwrap().is_none());
}

#[tokio::test]
async fn batches_accumulate_per_item_errors() {
    let store = new_store();
    let keep = store.add_node(None, Properties::new()).await.unwrap();

    let ids = vec![keep.id.clone(), "missing-1".to_string(), "missing-2".to_string()];
    let outcome = store.delete_nodes(&ids).await;
    assert_eq!(outcome.deleted, 1);
    assert_eq!(outcome.errors.len(), 2);
    assert!(outcome.errors.iter().all(|e| e.kind == "ENotFound"));

    let updates = vec![
        mimir_graph::NodeUpdate {
            id: "missing".into(),
            properties: props(&[("a", json!(1))]),
        },
    ];
    let outcome = store.update_nodes(updates).await;
    assert!(outcome.items.is_empty());
    assert_eq!(outcome.errors.len(), 1);
}

#[tokio::test]
async fn clear_is_two_phase_and_tokens_are_single_use() {
    let store = new_store();
    for i in 0..3 {
        store
            .add_node(Some(NodeType::Todo), props(&[("title", json!(format!("t{}", i)))]))
            .await
            .unwrap();
    }
    store
        .add_node(Some(NodeType::Memory), Properties::new())
        .await
        .unwrap();

    let token = match store.clear(ClearScope::Type(NodeType::Todo), None).await.unwrap() {
        ClearOutcome::NeedsConfirmation {
            preview,
            confirmation,
        } => {
            assert_eq!(preview.node_count, 3);
            confirmation.id
        }
        other => panic!("unexpected: {:?}", other),
    };

    match store
        .clear(ClearScope::Type(NodeType::Todo), Some(&token))
        .await
        .unwrap()
    {
        ClearOutcome::Cleared { deleted_nodes, .. } => assert_eq!(deleted_nodes, 3),
        other => panic!("unexpected: {:?}", other),
    }

    // the memory node survived; the consumed token no longer works
    assert_eq!(store.get_stats().await.unwrap().node_count, 1);
    let err = store
        .clear(ClearScope::Type(NodeType::Todo), Some(&token))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "EConfirmationInvalid");
}

#[tokio::test]
async fn lock_handoff_between_agents() {
    let store = new_store();
    let node = store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    let locks = LockService::new(store.driver());

    assert!(locks.acquire(&node.id, "agentA", None).await.unwrap());
    assert!(!locks.acquire(&node.id, "agentB", None).await.unwrap());
    assert!(locks.release(&node.id, "agentA").await.unwrap());
    assert!(locks.acquire(&node.id, "agentB", None).await.unwrap());
}

#[tokio::test]
async fn concurrent_acquires_admit_exactly_one_winner() {
    let store = new_store();
    let node = store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    let locks = Arc::new(LockService::new(store.driver()));

    let mut handles = Vec::new();
    for i in 0..16 {
        let locks = Arc::clone(&locks);
        let id = node.id.clone();
        handles.push(tokio::spawn(async move {
            locks.acquire(&id, &format!("agent-{}", i), None).await.unwrap()
        }));
    }
    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn query_available_skips_held_locks() {
    let store = new_store();
    let a = store
        .add_node(Some(NodeType::Todo), props(&[("status", json!("open"))]))
        .await
        .unwrap();
    let b = store
        .add_node(Some(NodeType::Todo), props(&[("status", json!("open"))]))
        .await
        .unwrap();
    let locks = LockService::new(store.driver());
    locks.acquire(&a.id, "agentA", None).await.unwrap();

    let available = locks
        .query_available(Some(NodeType::Todo), Some(&props(&[("status", json!("open"))])))
        .await
        .unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].id, b.id);
}

#[tokio::test]
async fn crud_cannot_touch_lock_fields() {
    let store = new_store();
    let err = store
        .add_node(None, props(&[("lockedBy", json!("me"))]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "EValidation");
}

#[tokio::test]
async fn neighbors_follow_edge_type_and_depth() {
    let store = new_store();
    let t1 = store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    let t2 = store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    let t3 = store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    store
        .add_edge(&t1.id, &t2.id, EdgeType::DependsOn, None)
        .await
        .unwrap();
    store
        .add_edge(&t2.id, &t3.id, EdgeType::DependsOn, None)
        .await
        .unwrap();

    let direct = store
        .get_neighbors(&t1.id, Some(EdgeType::DependsOn), 1)
        .await
        .unwrap();
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].id, t2.id);

    let two_hops = store
        .get_neighbors(&t1.id, Some(EdgeType::DependsOn), 2)
        .await
        .unwrap();
    let ids: HashSet<String> = two_hops.into_iter().map(|n| n.id).collect();
    assert_eq!(ids, HashSet::from([t2.id.clone(), t3.id.clone()]));
}

#[tokio::test]
async fn subgraph_is_depth_bounded_and_handles_cycles() {
    let store = new_store();
    let a = store.add_node(None, Properties::new()).await.unwrap();
    let b = store.add_node(None, Properties::new()).await.unwrap();
    store.add_edge(&a.id, &b.id, EdgeType::RelatesTo, None).await.unwrap();
    store.add_edge(&b.id, &a.id, EdgeType::RelatesTo, None).await.unwrap();

    let subgraph = store.get_subgraph(&a.id, 3).await.unwrap();
    assert_eq!(subgraph.nodes.len(), 2);
    assert_eq!(subgraph.edges.len(), 2);
}

#[tokio::test]
async fn todo_list_may_only_contain_todos() {
    let store = new_store();
    let list = store
        .add_node(Some(NodeType::TodoList), Properties::new())
        .await
        .unwrap();
    let todo = store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    let memory = store.add_node(Some(NodeType::Memory), Properties::new()).await.unwrap();

    store
        .add_edge(&list.id, &todo.id, EdgeType::Contains, None)
        .await
        .unwrap();
    let err = store
        .add_edge(&list.id, &memory.id, EdgeType::Contains, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "EValidation");
    let err = store
        .add_edge(&list.id, &todo.id, EdgeType::RelatesTo, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "EValidation");
}

#[tokio::test]
async fn duplicate_edges_need_distinguishing_properties() {
    let store = new_store();
    let a = store.add_node(None, Properties::new()).await.unwrap();
    let b = store.add_node(None, Properties::new()).await.unwrap();

    store
        .add_edge(&a.id, &b.id, EdgeType::RelatesTo, None)
        .await
        .unwrap();
    let err = store
        .add_edge(&a.id, &b.id, EdgeType::RelatesTo, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "EConflict");

    // same triple with different properties is a distinct edge
    store
        .add_edge(
            &a.id,
            &b.id,
            EdgeType::RelatesTo,
            Some(props(&[("weight", json!(2))])),
        )
        .await
        .unwrap();
    assert_eq!(store.get_edges(&a.id, Direction::Out).await.unwrap().len(), 2);
}

#[tokio::test]
async fn query_nodes_strips_large_fields() {
    let store = new_store();
    let big = "x".repeat(11 * 1024);
    store
        .add_node(
            Some(NodeType::Memory),
            props(&[("content", json!(big)), ("kind", json!("note"))]),
        )
        .await
        .unwrap();

    let listed = store
        .query_nodes(Some(NodeType::Memory), Some(&props(&[("kind", json!("note"))])))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    let content = listed[0].properties["content"].as_str().unwrap();
    assert!(content.contains("chars omitted"));

    // full fetch keeps the real content
    let full = store.get_node(&listed[0].id).await.unwrap().unwrap();
    assert_eq!(full.properties["content"].as_str().unwrap().len(), 11 * 1024);
}

#[tokio::test]
async fn search_finds_fresh_writes() {
    let store = new_store();
    let node = store
        .add_node(
            Some(NodeType::Memory),
            props(&[("title", json!("A")), ("content", json!("auth"))]),
        )
        .await
        .unwrap();

    let results = store
        .search_nodes("auth", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].node.id, node.id);
    assert!(results[0].score > 0.0);
}

#[tokio::test]
async fn stats_count_by_type() {
    let store = new_store();
    store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    store.add_node(Some(NodeType::Memory), Properties::new()).await.unwrap();

    let stats = store.get_stats().await.unwrap();
    assert_eq!(stats.node_count, 3);
    assert_eq!(stats.types["todo"], 2);
    assert_eq!(stats.types["memory"], 1);
}

#[tokio::test]
async fn snapshot_round_trips_through_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = new_store_with_dir(Some(dir.path().to_path_buf()));
    let node = store
        .add_node(Some(NodeType::Memory), props(&[("content", json!("persisted fact"))]))
        .await
        .unwrap();
    store.persist().await.unwrap();

    let restored = new_store_with_dir(Some(dir.path().to_path_buf()));
    assert!(restored.restore().await.unwrap());
    let loaded = restored.get_node(&node.id).await.unwrap().unwrap();
    assert_eq!(loaded.properties["content"], json!("persisted fact"));

    // derived lexical state was rebuilt as part of restore
    let hits = restored
        .search_nodes("persisted", &SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn retention_sweeps_only_policied_types() {
    let store = new_store();
    let old_todo = store.add_node(Some(NodeType::Todo), Properties::new()).await.unwrap();
    let old_memory = store.add_node(Some(NodeType::Memory), Properties::new()).await.unwrap();

    // age both nodes well past the horizon
    for id in [&old_todo.id, &old_memory.id] {
        let mut node = store.driver().get_node(id).await.unwrap().unwrap();
        node.updated = chrono::Utc::now() - chrono::Duration::days(120);
        store.driver().replace_node(node).await.unwrap();
    }

    let mut settings = RetentionSettings::default();
    settings.enabled = true;
    settings.policy.insert(NodeType::Todo, 30);
    let sweeper = RetentionSweeper::new(Arc::clone(&store), settings);

    assert_eq!(sweeper.sweep().await.unwrap(), 1);
    assert!(store.get_node(&old_todo.id).await.unwrap().is_none());
    assert!(store.get_node(&old_memory.id).await.unwrap().is_some());
}

#[tokio::test]
async fn worker_context_reduction_meets_target() {
    let store = new_store();
    let mut task_props = Properties::new();
    task_props.insert("title".into(), json!("Ship auth"));
    task_props.insert("requirements".into(), json!("implement the oauth flow"));
    task_props.insert("status".into(), json!("open"));
    task_props.insert("priority".into(), json!("high"));
    task_props.insert("planningNotes".into(), json!("p".repeat(30_000)));
    task_props.insert("conversationHistory".into(), json!("c".repeat(18_000)));
    let task = store.add_node(Some(NodeType::Todo), task_props).await.unwrap();

    let pm = get_task_context(&store, &task.id, mimir_core::AgentType::Pm)
        .await
        .unwrap();
    assert!(pm.context.contains_key("planningNotes"));
    assert!(pm.context.contains_key("subgraph"));

    let worker = get_task_context(&store, &task.id, mimir_core::AgentType::Worker)
        .await
        .unwrap();
    assert!(worker.metrics.reduction_percent >= 90.0);
    assert!(worker.metrics.filtered_size < 5 * 1024);
    assert!(!worker.context.contains_key("planningNotes"));
    assert_eq!(worker.context["taskId"], json!(task.id));

    let err = get_task_context(&store, "missing", mimir_core::AgentType::Worker)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "ENotFound");
}

#[tokio::test]
async fn failed_operations_leave_state_unchanged() {
    let store = new_store();
    let node = store.add_node(None, Properties::new()).await.unwrap();

    let err = store
        .add_edge(&node.id, "missing", EdgeType::RelatesTo, None)
        .await
        .unwrap_err();
    assert!(matches!(err, MimirError::NotFound(_)));
    assert_eq!(store.get_stats().await.unwrap().edge_count, 0);
}
