//! Cached results match fresh ones and die with the tenant's next write.

use crate::common;
use ragdb::QueryOptions;

const TEXTS: &[&str] = &[
    "memory mapped vector column",
    "json lines metadata column",
    "k-means partitions with centroids",
    "product quantized residual codes",
    "exact re-rank of the shortlist",
    "least recently used query cache",
];

#[tokio::test]
async fn test_hit_is_identical_to_fresh_computation() {
    let store = common::create_test_store(|settings| settings.cache.capacity = 16);
    store.rag.ingest("t1", common::documents(TEXTS)).await.unwrap();

    let options = QueryOptions::default().k(4).nprobes(1).refine_factor(2);
    let first = store.rag.query("t1", "quantized codes", options.clone()).await.unwrap();
    let hit = store.rag.query("t1", "quantized codes", options.clone()).await.unwrap();
    assert!(!first.cached);
    assert!(hit.cached);
    assert_eq!(first.neighbors, hit.neighbors);

    // A second store over the same data, cache disabled, computes the same.
    let uncached = common::reopen(&store, |settings| settings.cache.capacity = 0);
    let fresh = uncached.query("t1", "quantized codes", options).await.unwrap();
    assert!(!fresh.cached);
    assert_eq!(fresh.neighbors, hit.neighbors);
}

#[tokio::test]
async fn test_ingest_invalidates_only_that_tenant() {
    let store = common::create_test_store(|_| {});
    let rag = &store.rag;
    rag.ingest("t1", common::documents(TEXTS)).await.unwrap();
    rag.ingest("t2", common::documents(TEXTS)).await.unwrap();

    let options = QueryOptions::default().k(3);
    rag.query("t1", "metadata column", options.clone()).await.unwrap();
    rag.query("t2", "metadata column", options.clone()).await.unwrap();

    let report = rag
        .ingest("t1", common::documents(&["metadata column exactly"]))
        .await
        .unwrap();

    let t1 = rag.query("t1", "metadata column", options.clone()).await.unwrap();
    let t2 = rag.query("t2", "metadata column", options.clone()).await.unwrap();
    assert!(!t1.cached);
    assert!(t2.cached);

    // The fresh t1 result sees the new record.
    let ids: Vec<_> = t1.neighbors.iter().map(|n| n.id).collect();
    assert!(ids.contains(&report.ids[0]));

    let stats = rag.cache_stats();
    assert_eq!(stats.hits, 1);
    assert!(stats.invalidations >= 3);
}

#[tokio::test]
async fn test_capacity_bounds_entries() {
    let store = common::create_test_store(|settings| settings.cache.capacity = 2);
    store.rag.ingest("t1", common::documents(TEXTS)).await.unwrap();

    for text in TEXTS {
        store
            .rag
            .query("t1", text, QueryOptions::default().k(1))
            .await
            .unwrap();
    }
    let stats = store.rag.cache_stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.evictions, TEXTS.len() as u64 - 2);
}
