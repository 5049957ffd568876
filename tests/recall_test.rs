mod helpers;

use std::sync::Arc;

use helpers::{similar_embedding, test_embedding, test_settings};
use trove::recall::RecallEngine;
use trove::store::index::SqliteVectorIndex;
use trove::store::sqlite::SqliteRecordStore;
use trove::store::{RecordStore, VectorIndex, VectorMeta};
use trove::types::{Classification, Entry, Intent, MediaType};

fn engine() -> (RecallEngine, Arc<dyn RecordStore>, Arc<dyn VectorIndex>) {
    let store: Arc<dyn RecordStore> = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
    let index: Arc<dyn VectorIndex> = Arc::new(SqliteVectorIndex::open_in_memory().unwrap());
    (
        RecallEngine::new(index.clone(), store.clone(), test_settings()),
        store,
        index,
    )
}

fn meta(content: Option<&str>, created_at: &str) -> VectorMeta {
    VectorMeta {
        owner_id: "casey".into(),
        domain: "dream_journal".into(),
        created_at: created_at.into(),
        content: content.map(String::from),
    }
}

fn stored_entry(id: &str, content: &str) -> Entry {
    let verdict = Classification {
        intent: Intent::Save,
        content: content.to_string(),
        is_original: true,
        source_url: None,
        source_title: None,
        source_author: None,
        media_type: MediaType::Text,
        tags: vec![],
    };
    let mut entry = Entry::from_classification("casey", "dream_journal", content.into(), &verdict);
    entry.id = id.to_string();
    entry
}

#[tokio::test]
async fn relevant_ranks_by_similarity() {
    let (engine, _store, index) = engine();
    let target = test_embedding(3);

    index
        .upsert("dreams", "near", &similar_embedding(&target), &meta(Some("a flooded library"), "2026-08-01T00:00:00Z"))
        .await
        .unwrap();
    index
        .upsert("dreams", "far", &test_embedding(200), &meta(Some("a desert road"), "2026-08-01T00:00:00Z"))
        .await
        .unwrap();

    let snippets = engine.relevant("casey", "dreams", &target).await.unwrap();
    assert_eq!(snippets[0].id, "near");
    assert!(snippets[0].score > snippets.last().unwrap().score || snippets.len() == 1);
}

#[tokio::test]
async fn recall_is_owner_scoped() {
    let (engine, _store, index) = engine();
    let vector = test_embedding(7);
    index
        .upsert("dreams", "mine", &vector, &meta(Some("private"), "2026-08-01T00:00:00Z"))
        .await
        .unwrap();

    let snippets = engine.relevant("someone_else", "dreams", &vector).await.unwrap();
    assert!(snippets.is_empty());
}

#[tokio::test]
async fn hydration_falls_back_to_the_store_and_bumps_access_time() {
    let (engine, store, index) = engine();
    let vector = test_embedding(9);

    // Index knows the id but not the text
    index
        .upsert("dreams", "abc", &vector, &meta(None, "2026-08-01T00:00:00Z"))
        .await
        .unwrap();
    store.put_entry(&stored_entry("abc", "climbing an endless stair")).await.unwrap();

    let snippets = engine.relevant("casey", "dreams", &vector).await.unwrap();
    assert_eq!(snippets.len(), 1);
    assert_eq!(snippets[0].content, "climbing an endless stair");

    let entry = store.get_entry("casey", "abc").await.unwrap().unwrap();
    assert!(entry.last_accessed.is_some());
}

#[tokio::test]
async fn hits_with_no_surviving_content_are_dropped() {
    let (engine, _store, index) = engine();
    let vector = test_embedding(11);

    // Index is ahead of the store: nothing to hydrate from
    index
        .upsert("dreams", "ghost", &vector, &meta(None, "2026-08-01T00:00:00Z"))
        .await
        .unwrap();

    let snippets = engine.relevant("casey", "dreams", &vector).await.unwrap();
    assert!(snippets.is_empty());
}

#[tokio::test]
async fn within_domain_merges_recency_with_relevance() {
    let (engine, _store, index) = engine();
    let target = test_embedding(5);

    // Dissimilar but recent: recency mode must surface it anyway
    let now = chrono::Utc::now().to_rfc3339();
    index
        .upsert("dreams", "fresh", &test_embedding(250), &meta(Some("last night's dream"), &now))
        .await
        .unwrap();
    index
        .upsert("dreams", "close", &similar_embedding(&target), &meta(Some("an old but similar dream"), "2020-01-01T00:00:00Z"))
        .await
        .unwrap();

    let snippets = engine.within_domain("casey", "dreams", &target).await.unwrap();
    let ids: Vec<&str> = snippets.iter().map(|s| s.id.as_str()).collect();
    assert!(ids.contains(&"fresh"));
    assert!(ids.contains(&"close"));
}

#[tokio::test]
async fn fused_tags_hits_with_their_namespace() {
    let (engine, _store, index) = engine();
    let vector = test_embedding(13);

    index
        .upsert("dreams", "d1", &vector, &meta(Some("a dream"), "2026-08-01T00:00:00Z"))
        .await
        .unwrap();
    index
        .upsert("ideas", "i1", &similar_embedding(&vector), &meta(Some("an idea"), "2026-08-01T00:00:00Z"))
        .await
        .unwrap();

    let namespaces = vec!["dreams".to_string(), "ideas".to_string()];
    let snippets = engine.fused("casey", &namespaces, &vector).await.unwrap();

    assert_eq!(snippets.len(), 2);
    assert!(snippets.iter().any(|s| s.namespace == "dreams"));
    assert!(snippets.iter().any(|s| s.namespace == "ideas"));
    // Exact match beats the perturbed one
    assert_eq!(snippets[0].id, "d1");
}
