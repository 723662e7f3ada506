//! Tenants never see each other's records.

use crate::common::{self, EMBEDDING_DIM};
use ragdb::{QueryOptions, RagError};

#[tokio::test]
async fn test_query_never_crosses_tenants() {
    let store = common::create_test_store(|_| {});
    let rag = &store.rag;

    let a = rag
        .ingest(
            "tenant-a",
            common::documents(&["alpha secret plans", "alpha quarterly report"]),
        )
        .await
        .unwrap();
    let b = rag
        .ingest(
            "tenant-b",
            common::documents(&["beta roadmap", "beta hiring notes", "beta budget"]),
        )
        .await
        .unwrap();

    // Ids are per tenant, so they overlap; texts tell the records apart.
    assert_eq!(a.ids[0], b.ids[0]);

    let hits = rag
        .retrieve("tenant-b", "alpha secret plans", QueryOptions::default().k(10))
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);
    assert!(
        hits.iter()
            .all(|h| h.text.as_deref().is_some_and(|t| t.starts_with("beta")))
    );

    // Any raw vector, same story.
    for vector in common::random_vectors(5, EMBEDDING_DIM, 11) {
        let hits = rag
            .query_vector("tenant-a", vector, QueryOptions::default().k(10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }
}

#[tokio::test]
async fn test_namespace_rules() {
    let store = common::create_test_store(|_| {});
    let rag = &store.rag;

    for bad in ["", "../etc", "a/b", "tenant one"] {
        let err = rag
            .ingest(bad, common::documents(&["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::InvalidTenantId { .. }), "{bad:?}");
        assert_eq!(err.status_code(), "INVALID_TENANT_ID");
    }

    rag.ingest("tenant-1", common::documents(&["one"])).await.unwrap();
    rag.ingest("tenant-1", common::documents(&["two"])).await.unwrap();
    rag.ingest("tenant_2", common::documents(&["three"])).await.unwrap();

    let tenants: Vec<String> = rag
        .list_tenants()
        .unwrap()
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(tenants, vec!["tenant-1", "tenant_2"]);
    assert!(store.dir.path().join("data").join("tenant-1").is_dir());
    assert_eq!(rag.table_stats("tenant-1").await.unwrap().record_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_ingest_across_tenants() {
    let store = common::create_test_store(|_| {});
    let rag = &store.rag;

    let batch = |prefix: &str| -> Vec<ragdb::Document> {
        (0..20)
            .map(|i| ragdb::Document::new(format!("{prefix} document number {i}")))
            .collect()
    };

    let (a, b, c) = tokio::join!(
        rag.ingest("par-a", batch("apples")),
        rag.ingest("par-b", batch("bricks")),
        rag.ingest("par-a", batch("avocados")),
    );
    assert_eq!(a.unwrap().count, 20);
    assert_eq!(b.unwrap().count, 20);
    assert_eq!(c.unwrap().count, 20);

    assert_eq!(rag.table_stats("par-a").await.unwrap().record_count, 40);
    assert_eq!(rag.table_stats("par-b").await.unwrap().record_count, 20);
}
