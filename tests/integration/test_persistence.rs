//! Tables survive a restart of the process-wide state.

use crate::common;
use ragdb::{QueryOptions, TableState};

const TEXTS: &[&str] = &[
    "tenants map to directories",
    "vectors live in a flat column",
    "metadata is one json object per line",
    "the index file starts with magic bytes",
    "deleted ids go to a tombstone file",
];

#[tokio::test]
async fn test_reopen_keeps_records_and_index() {
    let store = common::create_test_store(|_| {});
    store.rag.ingest("t1", common::documents(TEXTS)).await.unwrap();

    let before = store.rag.table_stats("t1").await.unwrap();
    assert!(before.index_built);
    let options = QueryOptions::default().k(3).refine_factor(3);
    let expected = store
        .rag
        .query("t1", "index magic bytes", options.clone())
        .await
        .unwrap();

    let reopened = common::reopen(&store, |_| {});
    let after = reopened.table_stats("t1").await.unwrap();
    assert_eq!(after.state, TableState::Open);
    assert_eq!(after.record_count, before.record_count);
    assert_eq!(after.partition_count, before.partition_count);
    assert_eq!(after.indexed_count, before.indexed_count);
    assert!(after.index_built);

    let fresh = reopened
        .query("t1", "index magic bytes", options)
        .await
        .unwrap();
    assert!(!fresh.cached);
    assert_eq!(fresh.neighbors, expected.neighbors);

    let hits = reopened
        .retrieve("t1", "index magic bytes", QueryOptions::default().k(1).refine_factor(5))
        .await
        .unwrap();
    assert_eq!(hits[0].text.as_deref(), Some(TEXTS[3]));
    assert_eq!(hits[0].source(), "doc-3.md");
}

#[tokio::test]
async fn test_deletes_and_dropped_index_persist() {
    let store = common::create_test_store(|_| {});
    let report = store.rag.ingest("t1", common::documents(TEXTS)).await.unwrap();

    assert_eq!(store.rag.delete_records("t1", vec![report.ids[0]]).await.unwrap(), 1);
    assert!(store.rag.drop_index("t1").await.unwrap());

    let reopened = common::reopen(&store, |_| {});
    let stats = reopened.table_stats("t1").await.unwrap();
    assert_eq!(stats.record_count, TEXTS.len() - 1);
    assert_eq!(stats.deleted_count, 1);
    assert!(!stats.index_built);

    // Exhaustive scan without an index still never returns the deleted id.
    let hits = reopened
        .query("t1", TEXTS[0], QueryOptions::default().k(10))
        .await
        .unwrap();
    assert_eq!(hits.neighbors.len(), TEXTS.len() - 1);
    assert!(hits.neighbors.iter().all(|n| n.id != report.ids[0]));

    let rebuilt = reopened.rebuild_index("t1").await.unwrap();
    assert!(rebuilt.index_built);
    assert_eq!(rebuilt.indexed_count, TEXTS.len() - 1);
}

#[tokio::test]
async fn test_appends_after_reopen_continue_ids() {
    let store = common::create_test_store(|_| {});
    let first = store.rag.ingest("t1", common::documents(&TEXTS[..2])).await.unwrap();

    let reopened = common::reopen(&store, |_| {});
    let second = reopened
        .ingest("t1", common::documents(&TEXTS[2..]))
        .await
        .unwrap();
    assert_eq!(second.ids[0].get(), first.ids[1].get() + 1);
    assert_eq!(
        reopened.table_stats("t1").await.unwrap().record_count,
        TEXTS.len()
    );
}
