use std::sync::Arc;
use std::time::{Duration, Instant};

use deckwright_core::{Document, Section, SectionStatus};
use deckwright_store::{
    DocumentBackend, InMemoryBackend, PersistenceStore, RetryPolicy, SqliteBackend, StoreConfig,
};
use serde_json::json;

fn deck(n: usize) -> Document {
    let sections = (0..n)
        .map(|i| Section::outlined(i, format!("Slide {i}"), json!({"topic": i})))
        .collect();
    Document::new("Roadmap", sections)
}

fn config() -> StoreConfig {
    StoreConfig {
        retry: RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        },
        verify_writes: false,
        ..Default::default()
    }
}

#[tokio::test]
async fn reads_are_idempotent() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(3);
    backend.insert(doc.clone());
    let store = PersistenceStore::new(backend.clone(), config());

    let a = store.get(&doc.id, false).await.unwrap();
    let b = store.get(&doc.id, false).await.unwrap();
    assert_eq!(a, b);

    store.begin_composition(&doc.id).await;
    let c = store.get(&doc.id, false).await.unwrap();
    let d = store.get(&doc.id, false).await.unwrap();
    assert_eq!(c, d);
    assert_eq!(c, a);
}

#[tokio::test]
async fn read_your_writes_while_composing() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(4);
    backend.insert(doc.clone());
    let store = PersistenceStore::new(backend.clone(), config());
    store.begin_composition(&doc.id).await;

    for i in [2, 0, 3] {
        let section = doc.sections[i].completed_with(json!({"body": format!("slide {i}")}));
        assert!(store.update_section(&doc.id, i, section, false).await);

        let cached = store.get(&doc.id, false).await.unwrap().unwrap();
        assert_eq!(cached.sections[i].status, SectionStatus::Completed);
        let stored = backend.peek(&doc.id).unwrap();
        assert_eq!(stored.sections[i], cached.sections[i]);
    }

    let cached = store.get(&doc.id, false).await.unwrap().unwrap();
    assert_eq!(cached.count_with_status(SectionStatus::Completed), 3);
    assert_eq!(cached.sections[1].status, SectionStatus::Pending);
    assert!(cached.indices_are_dense());
}

#[tokio::test]
async fn cache_miss_during_composition_fetches_once_for_concurrent_readers() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(2);
    backend.insert(doc.clone());
    backend.set_fetch_delay(Duration::from_millis(20));
    let store = PersistenceStore::new(backend.clone(), config());
    store.begin_composition(&doc.id).await;

    let readers: Vec<_> = (0..5)
        .map(|_| {
            let store = store.clone();
            let id = doc.id.clone();
            tokio::spawn(async move { store.get(&id, false).await })
        })
        .collect();
    for reader in readers {
        let got = reader.await.unwrap().unwrap();
        assert_eq!(got.as_ref(), Some(&doc));
    }
    assert_eq!(backend.fetch_count(), 1);
}

#[tokio::test]
async fn throttled_whole_document_writes() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(1);
    backend.insert(doc.clone());
    let store = PersistenceStore::new(backend.clone(), config());

    store.begin_composition(&doc.id).await;
    assert!(store.save(&doc.id, doc.clone()).await);
    let mut second = doc.clone();
    second.title = "Roadmap v2".into();
    assert!(store.save(&doc.id, second).await);
    assert_eq!(backend.write_count(), 1);

    assert!(store.end_composition(&doc.id).await);
    assert_eq!(backend.write_count(), 2);
    assert_eq!(backend.peek(&doc.id).unwrap().title, "Roadmap v2");

    // Outside a composition every save goes through.
    assert!(store.save(&doc.id, doc.clone()).await);
    assert!(store.save(&doc.id, doc.clone()).await);
    assert_eq!(backend.write_count(), 4);
}

#[tokio::test]
async fn throttle_window_reopens() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(1);
    backend.insert(doc.clone());
    let store = PersistenceStore::new(
        backend.clone(),
        StoreConfig {
            throttle_interval: Duration::from_millis(30),
            ..config()
        },
    );

    store.begin_composition(&doc.id).await;
    assert!(store.save(&doc.id, doc.clone()).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(store.save(&doc.id, doc.clone()).await);
    assert_eq!(backend.write_count(), 2);
    assert!(store.end_composition(&doc.id).await);
    assert_eq!(backend.write_count(), 2);
}

#[tokio::test]
async fn reads_recover_from_transient_backend_errors() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(1);
    backend.insert(doc.clone());
    let store = PersistenceStore::new(backend.clone(), config());

    backend.fail_next_fetches(2);
    assert_eq!(store.get(&doc.id, false).await.unwrap(), Some(doc.clone()));

    backend.fail_next_fetches(100);
    assert_eq!(store.get(&doc.id, true).await.unwrap(), Some(doc));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_documents_write_concurrently() {
    let backend = Arc::new(InMemoryBackend::new());
    let first = deck(1);
    let second = deck(1);
    backend.insert(first.clone());
    backend.insert(second.clone());
    let store = PersistenceStore::new(backend.clone(), config());
    backend.set_write_delay(Duration::from_millis(200));

    let started = Instant::now();
    let a = {
        let store = store.clone();
        let section = first.sections[0].completed_with(json!("a"));
        let id = first.id.clone();
        tokio::spawn(async move { store.update_section(&id, 0, section, true).await })
    };
    let b = {
        let store = store.clone();
        let section = second.sections[0].completed_with(json!("b"));
        let id = second.id.clone();
        tokio::spawn(async move { store.update_section(&id, 0, section, true).await })
    };
    assert!(a.await.unwrap());
    assert!(b.await.unwrap());
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(200));
    assert!(elapsed < Duration::from_millis(380), "writes were serialized: {elapsed:?}");
    assert_eq!(backend.write_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_document_writes_are_serialized() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(2);
    backend.insert(doc.clone());
    let store = PersistenceStore::new(backend.clone(), config());
    store.begin_composition(&doc.id).await;
    backend.set_write_delay(Duration::from_millis(100));

    let started = Instant::now();
    let handles: Vec<_> = (0..2)
        .map(|i| {
            let store = store.clone();
            let id = doc.id.clone();
            let section = doc.sections[i].completed_with(json!(i));
            tokio::spawn(async move { store.update_section(&id, i, section, true).await })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap());
    }
    assert!(started.elapsed() >= Duration::from_millis(200));

    // Neither write clobbered the other.
    let stored = backend.peek(&doc.id).unwrap();
    assert_eq!(stored.count_with_status(SectionStatus::Completed), 2);
}

#[tokio::test]
async fn failed_write_leaves_backend_and_cache_consistent() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(3);
    backend.insert(doc.clone());
    let store = PersistenceStore::new(backend.clone(), config());
    store.begin_composition(&doc.id).await;

    let first = doc.sections[0].completed_with(json!("kept"));
    assert!(store.update_section(&doc.id, 0, first, false).await);
    let before = backend.peek(&doc.id).unwrap();

    backend.set_fail_writes(true);
    let second = doc.sections[1].completed_with(json!("lost"));
    assert!(!store.update_section(&doc.id, 1, second, false).await);

    let durable = store.get(&doc.id, true).await.unwrap().unwrap();
    assert_eq!(durable, before);
    let cached = store.get(&doc.id, false).await.unwrap().unwrap();
    assert_eq!(cached, before);
    assert_eq!(cached.sections[1].status, SectionStatus::Pending);
}

#[tokio::test]
async fn dropped_caller_does_not_abandon_write() {
    let backend = Arc::new(InMemoryBackend::new());
    let doc = deck(1);
    backend.insert(doc.clone());
    backend.set_write_delay(Duration::from_millis(50));
    let store = PersistenceStore::new(backend.clone(), config());

    let section = doc.sections[0].completed_with(json!("durable"));
    let write = store.update_section(&doc.id, 0, section, true);
    let _ = tokio::time::timeout(Duration::from_millis(5), write).await;

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.write_count(), 1);
    assert_eq!(
        backend.peek(&doc.id).unwrap().sections[0].content,
        Some(json!("durable"))
    );
}

#[tokio::test]
async fn sqlite_backend_through_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("decks.db");
    let doc = deck(2);
    let backend = Arc::new(SqliteBackend::open(&path).unwrap());
    backend.write(&doc).unwrap();

    let store = PersistenceStore::new(backend.clone(), StoreConfig::default());
    assert_eq!(store.backend_name(), "sqlite");
    store.begin_composition(&doc.id).await;
    let section = doc.sections[1].completed_with(json!({"text": "done"}));
    assert!(store.update_section(&doc.id, 1, section, false).await);
    assert!(store.end_composition(&doc.id).await);

    let reopened = SqliteBackend::open(&path).unwrap();
    let stored = reopened.fetch(&doc.id).unwrap().unwrap();
    assert_eq!(stored.sections[1].content, Some(json!({"text": "done"})));
}
