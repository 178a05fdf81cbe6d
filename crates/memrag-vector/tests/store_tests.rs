use serde_json::json;

use memrag_core::chunker::Chunker;
use memrag_core::traits::VectorIndex;
use memrag_core::types::{Chunk, Meta};
use memrag_vector::{collection_name, LanceVectorIndex};

const DIM: usize = 4;

fn basis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[axis] = 1.0;
    v
}

fn qa(question: &str, answer: &str) -> Chunk {
    Chunker::default().from_pair(question, answer, None)
}

async fn open_store(dir: &tempfile::TempDir) -> LanceVectorIndex {
    let uri = dir.path().to_string_lossy().to_string();
    LanceVectorIndex::open(&uri, DIM).await.expect("open store")
}

#[tokio::test]
async fn get_or_create_is_lazy_and_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;

    assert_eq!(store.count("u1").await.expect("count"), 0, "missing tenant reads as empty");

    store.get_or_create("u1").await.expect("create");
    store.get_or_create("u1").await.expect("create again");
    assert_eq!(store.count("u1").await.expect("count"), 0);
}

#[tokio::test]
async fn add_then_search_orders_by_similarity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;

    let entries = vec![
        (qa("q one", "a one"), basis(0)),
        (qa("q two", "a two"), basis(1)),
        (qa("q three", "a three"), basis(2)),
    ];
    store.add("u1", &entries).await.expect("add");
    assert_eq!(store.count("u1").await.expect("count"), 3);

    let results = store.search("u1", &[0.9, 0.1, 0.0, 0.0], 5).await.expect("search");
    assert_eq!(results.len(), 3, "fewer than top_k when collection is small");
    assert_eq!(results[0].id, entries[0].0.id);
    assert!(results[0].similarity > results[1].similarity);
    for (i, r) in results.iter().enumerate() {
        assert_eq!(r.rank, i + 1, "1-based contiguous ranks");
        assert!((0.0..=1.0).contains(&r.similarity));
    }
}

#[tokio::test]
async fn identical_vector_scores_near_one() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;

    store.add("u1", &[(qa("q", "a"), basis(0))]).await.expect("add");
    let results = store.search("u1", &basis(0), 1).await.expect("search");
    assert!(results[0].similarity > 0.999, "got {}", results[0].similarity);
}

#[tokio::test]
async fn add_rejects_duplicate_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;

    let chunk = qa("q", "a");
    let within_batch = vec![(chunk.clone(), basis(0)), (chunk.clone(), basis(1))];
    assert!(store.add("u1", &within_batch).await.is_err(), "duplicate id within one call");

    store.add("u1", &[(chunk.clone(), basis(0))]).await.expect("first add");
    let err = store.add("u1", &[(chunk, basis(1))]).await;
    assert!(err.is_err(), "id already stored fails the whole call");
    assert_eq!(store.count("u1").await.expect("count"), 1);
}

#[tokio::test]
async fn upsert_is_idempotent_by_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;

    let chunk = qa("q", "a");
    let entries = vec![(chunk.clone(), basis(0))];
    store.upsert("u1", &entries).await.expect("upsert");
    store.upsert("u1", &entries).await.expect("upsert again");
    assert_eq!(store.count("u1").await.expect("count"), 1, "re-upsert is a no-op in effect");

    // Same id, new payload: overwritten, not duplicated
    let mut changed = chunk.clone();
    changed.text = "Question: q\nAnswer: revised".to_string();
    store.upsert("u1", &[(changed.clone(), basis(3))]).await.expect("overwrite");
    assert_eq!(store.count("u1").await.expect("count"), 1);

    let results = store.search("u1", &basis(3), 1).await.expect("search");
    assert_eq!(results[0].text, changed.text);
}

#[tokio::test]
async fn delete_is_noop_for_absent_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;

    store.delete("u1", &["ghost".to_string()]).await.expect("delete on missing tenant");

    let chunk = qa("q", "a");
    store.add("u1", &[(chunk.clone(), basis(0))]).await.expect("add");
    store
        .delete("u1", &[chunk.id.clone(), "ghost".to_string()])
        .await
        .expect("delete mixed");
    assert_eq!(store.count("u1").await.expect("count"), 0);
}

#[tokio::test]
async fn tenants_are_isolated() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;

    store.add("alice", &[(qa("qa", "aa"), basis(0))]).await.expect("add alice");
    store
        .add("bob", &[(qa("qb", "ab"), basis(0)), (qa("qb2", "ab2"), basis(1))])
        .await
        .expect("add bob");

    assert_eq!(store.count("alice").await.expect("count"), 1);
    assert_eq!(store.count("bob").await.expect("count"), 2);

    store.delete("bob", &[qa("qb", "ab").id]).await.expect("delete bob");
    assert_eq!(store.count("alice").await.expect("count"), 1, "bob's delete leaves alice alone");

    let alice_hits = store.search("alice", &basis(0), 10).await.expect("search");
    assert_eq!(alice_hits.len(), 1);
    assert_eq!(alice_hits[0].id, qa("qa", "aa").id);

    store.drop_collection("alice").await.expect("drop");
    assert_eq!(store.count("alice").await.expect("count"), 0);
    assert_eq!(store.count("bob").await.expect("count"), 1, "drop of alice leaves bob alone");
}

#[tokio::test]
async fn metadata_round_trips_through_the_store() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;

    let extra = match json!({"relationshipType": "family", "weight": 3}) {
        serde_json::Value::Object(m) => m,
        _ => unreachable!(),
    };
    let chunk = Chunker::default().from_pair("你的童年在哪里度过？", "我在江南水乡长大", Some(extra));
    store.upsert("u1", &[(chunk.clone(), basis(2))]).await.expect("upsert");

    let results = store.search("u1", &basis(2), 1).await.expect("search");
    let meta: &Meta = &results[0].metadata;
    assert_eq!(meta["question"], "你的童年在哪里度过？");
    assert_eq!(meta["relationshipType"], "family");
    assert_eq!(meta["weight"], 3);
}

#[tokio::test]
async fn search_missing_tenant_is_empty_not_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_store(&dir).await;
    let results = store.search("nobody", &basis(0), 5).await.expect("search");
    assert!(results.is_empty());
}

#[test]
fn collection_names_are_identifier_safe_and_distinct() {
    assert_eq!(collection_name("user-42"), "qa_user-42");
    let odd = collection_name("a.b/c");
    assert!(odd.starts_with("qa_a_b_c_"));
    assert_ne!(collection_name("a.b"), collection_name("a_b"), "sanitization cannot collide");
}
