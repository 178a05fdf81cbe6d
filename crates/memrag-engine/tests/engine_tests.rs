//! End-to-end engine tests against a real on-disk LanceDB and the
//! deterministic feature-hash embedding backend.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use memrag_core::chunker::Chunker;
use memrag_core::types::IndexStatus;
use memrag_embed::hash::HashEmbedder;
use memrag_embed::{EmbeddingService, DEFAULT_CACHE_CAPACITY};
use memrag_engine::RagEngine;
use memrag_vector::LanceVectorIndex;

const DIM: usize = 1024;

async fn engine_in(dir: &Path) -> RagEngine {
    let db_dir = dir.join("lancedb");
    let export_dir = dir.join("exports");
    fs::create_dir_all(&export_dir).unwrap();
    let store = LanceVectorIndex::open(db_dir.to_str().unwrap(), DIM)
        .await
        .unwrap();
    let embeddings = EmbeddingService::new(
        Box::new(HashEmbedder::new(DIM)),
        DEFAULT_CACHE_CAPACITY,
    );
    RagEngine::new(Arc::new(store), Arc::new(embeddings), export_dir)
}

fn write_export(dir: &Path, tenant: &str, lines: &[&str]) {
    let path = dir.join("exports").join(format!("{tenant}.jsonl"));
    fs::write(path, lines.join("\n")).unwrap();
}

#[tokio::test]
async fn update_then_search_retrieves_relevant_answer() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;
    write_export(
        tmp.path(),
        "u1",
        &[
            r#"{"question":"你的童年在哪里度过？","answer":"我在江南水乡长大"}"#,
            "not-json",
        ],
    );

    let upserted = engine.update_index("u1").await.unwrap();
    assert_eq!(upserted, 1);

    let stats = engine.index_manager().stats("u1").await;
    assert_eq!(stats.count, 1);
    assert_eq!(stats.status, IndexStatus::Ready);

    let results = engine.search("童年在哪里", "u1", 5, 0.3).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].similarity > 0.3);
    assert_eq!(results[0].rank, 1);
    assert_eq!(
        results[0].metadata.get("question").and_then(|v| v.as_str()),
        Some("你的童年在哪里度过？")
    );
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;
    write_export(
        tmp.path(),
        "u1",
        &[
            r#"{"question":"q1","answer":"a1"}"#,
            r#"{"question":"q2","answer":"a2"}"#,
        ],
    );

    assert_eq!(engine.update_index("u1").await.unwrap(), 2);
    assert_eq!(engine.update_index("u1").await.unwrap(), 2);
    assert_eq!(engine.index_manager().stats("u1").await.count, 2);
}

#[tokio::test]
async fn missing_export_file_yields_empty_ready_tenant() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;

    assert_eq!(engine.update_index("nobody").await.unwrap(), 0);
    let stats = engine.index_manager().stats("nobody").await;
    assert_eq!(stats.count, 0);
    assert_eq!(stats.status, IndexStatus::Ready);
    assert!(engine.search("anything", "nobody", 5, 0.0).await.is_empty());
}

#[tokio::test]
async fn threshold_zero_is_a_superset_in_the_same_order() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;
    write_export(
        tmp.path(),
        "u1",
        &[
            r#"{"question":"你的童年在哪里度过？","answer":"我在江南水乡长大"}"#,
            r#"{"question":"你喜欢什么运动？","answer":"我喜欢游泳"}"#,
            r#"{"question":"最喜欢的食物是什么？","answer":"红烧肉"}"#,
        ],
    );
    engine.update_index("u1").await.unwrap();

    let all = engine.search("童年在哪里", "u1", 5, 0.0).await;
    let strict = engine.search("童年在哪里", "u1", 5, 0.3).await;
    assert!(!all.is_empty());
    assert!(strict.len() <= all.len());
    // best hit is the childhood QA pair and leads both lists
    assert!(all[0].text.contains("童年"));
    for (i, r) in all.iter().enumerate() {
        assert_eq!(r.rank, i + 1);
        if i > 0 {
            assert!(all[i - 1].similarity >= r.similarity);
        }
    }
    for (s, a) in strict.iter().zip(all.iter()) {
        assert_eq!(s.id, a.id);
    }
}

#[tokio::test]
async fn update_index_invalidates_cached_queries() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;
    write_export(
        tmp.path(),
        "u1",
        &[r#"{"question":"你的童年在哪里度过？","answer":"我在江南水乡长大"}"#],
    );
    engine.update_index("u1").await.unwrap();

    let before = engine.search("童年在哪里", "u1", 5, 0.0).await;
    assert_eq!(before.len(), 1);

    write_export(
        tmp.path(),
        "u1",
        &[
            r#"{"question":"你的童年在哪里度过？","answer":"我在江南水乡长大"}"#,
            r#"{"question":"童年最难忘的事？","answer":"和外婆一起摘桂花"}"#,
        ],
    );
    engine.update_index("u1").await.unwrap();

    let after = engine.search("童年在哪里", "u1", 5, 0.0).await;
    assert_eq!(after.len(), 2);
}

#[tokio::test]
async fn batch_update_reports_per_tenant_success() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;
    write_export(tmp.path(), "a", &[r#"{"question":"q","answer":"a"}"#]);
    // tenant "b" has no export file: still a success, just empty

    let tenants = vec!["a".to_string(), "b".to_string()];
    let results = engine.batch_update_indices(&tenants).await;
    assert_eq!(results.get("a"), Some(&true));
    assert_eq!(results.get("b"), Some(&true));
    assert_eq!(engine.index_manager().stats("a").await.count, 1);
    assert_eq!(engine.index_manager().stats("b").await.count, 0);
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;
    write_export(
        tmp.path(),
        "alice",
        &[r#"{"question":"你的童年在哪里度过？","answer":"我在江南水乡长大"}"#],
    );
    write_export(
        tmp.path(),
        "bob",
        &[r#"{"question":"你喜欢什么运动？","answer":"我喜欢游泳"}"#],
    );
    engine.update_index("alice").await.unwrap();
    engine.update_index("bob").await.unwrap();

    let alice = engine.search("童年在哪里", "alice", 5, 0.0).await;
    assert!(alice.iter().all(|r| r.text.contains("童年")));
    let bob = engine.search("童年在哪里", "bob", 5, 0.0).await;
    assert!(bob.iter().all(|r| !r.text.contains("童年")));
}

#[tokio::test]
async fn single_record_update_and_delete_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;
    engine.update_index("u1").await.unwrap();

    let chunker = Chunker::default();
    let chunk = chunker.from_pair("你养过宠物吗？", "养过一只叫雪球的猫", None);
    let id = chunk.id.clone();
    engine.index_manager().update_single("u1", chunk).await.unwrap();
    assert_eq!(engine.index_manager().stats("u1").await.count, 1);

    engine.index_manager().delete_chunk("u1", &id).await.unwrap();
    assert_eq!(engine.index_manager().stats("u1").await.count, 0);
}

#[tokio::test]
async fn skipped_lines_do_not_poison_valid_ones() {
    let tmp = tempfile::tempdir().unwrap();
    let engine = engine_in(tmp.path()).await;
    write_export(
        tmp.path(),
        "u1",
        &[
            "",
            "{broken",
            r#"{"question":"q1","answer":"a1"}"#,
            r#"[1,2,3]"#,
            r#"{"question":"q2","answer":"a2"}"#,
        ],
    );
    assert_eq!(engine.update_index("u1").await.unwrap(), 2);
}
