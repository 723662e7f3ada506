//! A failed batch leaves no trace.

use std::sync::Arc;

use crate::common::{self, EMBEDDING_DIM, PoisonedEmbedder};
use ragdb::{Metadata, NewRecord, QueryOptions, RagError};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_bad_embedding_rejects_whole_batch() {
    let store = common::create_test_store_with(Arc::new(PoisonedEmbedder::new()), |_| {});
    let rag = &store.rag;

    rag.ingest("t1", common::documents(&["healthy one", "healthy two"]))
        .await
        .unwrap();

    let err = rag
        .ingest(
            "t1",
            common::documents(&["fine text", "poison pill", "another fine text"]),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RagError::DimensionMismatch { expected, actual }
            if expected == EMBEDDING_DIM && actual == EMBEDDING_DIM / 2
    ));

    let stats = rag.table_stats("t1").await.unwrap();
    assert_eq!(stats.record_count, 2);

    let hits = rag
        .retrieve("t1", "fine text", QueryOptions::default().k(10))
        .await
        .unwrap();
    assert!(hits.iter().all(|h| h.text.as_deref() != Some("fine text")));
}

#[tokio::test]
async fn test_rejected_first_batch_creates_no_namespace() {
    let store = common::create_test_store_with(Arc::new(PoisonedEmbedder::new()), |_| {});

    let err = store
        .rag
        .ingest("fresh", common::documents(&["poison"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));
    assert!(store.rag.list_tenants().unwrap().is_empty());
}

#[tokio::test]
async fn test_raw_records_are_all_or_nothing() {
    let store = common::create_test_store(|_| {});
    let rag = &store.rag;

    let good = common::random_vectors(3, 16, 1);
    rag.insert_records("raw", common::raw_records(&good)).await.unwrap();

    let mut batch = common::raw_records(&common::random_vectors(4, 16, 2));
    batch.push(NewRecord {
        embedding: vec![0.0; 15],
        metadata: Metadata::new(),
    });
    let err = rag.insert_records("raw", batch).await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { expected: 16, actual: 15 }));
    assert_eq!(rag.table_stats("raw").await.unwrap().record_count, 3);

    // Ids continue without gaps after the rejected batch.
    let next = rag
        .insert_records("raw", common::raw_records(&common::random_vectors(1, 16, 3)))
        .await
        .unwrap();
    assert_eq!(next.ids[0].get(), 4);
}

#[tokio::test]
async fn test_build_timeout_fails_ingest_and_rolls_back() {
    let store = common::create_test_store(|settings| {
        settings.index.rebuild_threshold = 1;
        settings.index.rebuild_timeout_ms = Some(0);
        settings.ingest.max_retries = 0;
    });

    let err = store
        .rag
        .ingest("t1", common::documents(&["a b", "c d", "e f"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::IngestFailed { .. }));
    assert_eq!(err.status_code(), "INGEST_FAILED");
    assert_eq!(store.rag.table_stats("t1").await.unwrap().record_count, 0);
}

#[tokio::test]
async fn test_cancelled_ingest_is_invisible() {
    let store = common::create_test_store(|_| {});
    let token = CancellationToken::new();
    token.cancel();

    let err = store
        .rag
        .ingest_with_cancel("t1", common::documents(&["never stored"]), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Cancelled));

    let hits = store
        .rag
        .query("t1", "never stored", QueryOptions::default())
        .await
        .unwrap();
    assert!(hits.neighbors.is_empty());
}
