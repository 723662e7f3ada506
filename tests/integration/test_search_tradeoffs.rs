//! nprobes / refine_factor behavior on a realistic data set.

use crate::common;
use ragdb::{Metric, QueryOptions, RecordId};

const DIM: usize = 128;

struct Fixture {
    store: common::TestStore,
    vectors: Vec<(RecordId, Vec<f32>)>,
    needle: RecordId,
    needle_vector: Vec<f32>,
}

/// 1000 random vectors plus one known vector, indexed into 10 partitions.
async fn build_fixture() -> Fixture {
    let store = common::create_test_store(|settings| {
        settings.index.num_partitions = 10;
        settings.index.num_sub_vectors = 8;
        settings.index.rebuild_threshold = 100_000;
    });

    let mut vectors = common::random_vectors(1000, DIM, 42);
    let needle_vector = common::random_vectors(1, DIM, 4242).remove(0);
    vectors.push(needle_vector.clone());

    let report = store
        .rag
        .insert_records("t1", common::raw_records(&vectors))
        .await
        .unwrap();
    assert!(!report.index_rebuilt);

    let stats = store.rag.rebuild_index("t1").await.unwrap();
    assert!(stats.index_built);
    assert_eq!(stats.partition_count, 10);
    assert_eq!(stats.indexed_count, 1001);

    let needle = *report.ids.last().unwrap();
    let vectors = report.ids.iter().copied().zip(vectors).collect();
    Fixture {
        store,
        vectors,
        needle,
        needle_vector,
    }
}

#[tokio::test]
async fn test_full_probe_with_refinement_finds_known_vector_and_results_stay_sorted() {
    let fx = build_fixture().await;

    let hits = fx
        .store
        .rag
        .query_vector(
            "t1",
            fx.needle_vector.clone(),
            QueryOptions::default().k(1).nprobes(10).refine_factor(5),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, fx.needle);
    assert!(hits[0].distance.abs() < 1e-4);

    // The cheapest setting still answers, just without the guarantee.
    let cheap = fx
        .store
        .rag
        .query_vector(
            "t1",
            fx.needle_vector.clone(),
            QueryOptions::default().k(1).nprobes(1).refine_factor(1),
        )
        .await
        .unwrap();
    assert_eq!(cheap.len(), 1);
    assert!(cheap[0].distance >= 0.0);

    for (k, nprobes, refine) in [(1, 1, 1), (10, 3, 2), (25, 10, 4), (2000, 10, 1)] {
        let hits = fx
            .store
            .rag
            .query_vector(
                "t1",
                fx.vectors[7].1.clone(),
                QueryOptions::default()
                    .k(k)
                    .nprobes(nprobes)
                    .refine_factor(refine),
            )
            .await
            .unwrap();
        assert!(hits.len() <= k);
        assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    }
}

#[tokio::test]
async fn test_recall_never_drops_as_refinement_grows() {
    let fx = build_fixture().await;
    let k = 10;

    for query in common::random_vectors(5, DIM, 99) {
        let truth = common::brute_force_top_k(&fx.vectors, &query, k, Metric::L2);
        let mut previous = 0.0;
        for refine in [1, 2, 4, 8, 16] {
            let hits = fx
                .store
                .rag
                .query_vector(
                    "t1",
                    query.clone(),
                    QueryOptions::default().k(k).nprobes(3).refine_factor(refine),
                )
                .await
                .unwrap();
            let r = common::recall(&hits, &truth);
            assert!(r >= previous, "recall fell from {previous} to {r} at refine {refine}");
            previous = r;
        }
    }
}

#[tokio::test]
async fn test_recall_never_drops_as_probes_grow() {
    let fx = build_fixture().await;
    let k = 10;

    for query in common::random_vectors(5, DIM, 7) {
        let truth = common::brute_force_top_k(&fx.vectors, &query, k, Metric::L2);
        let mut previous = 0.0;
        for nprobes in 1..=10 {
            // A shortlist larger than the table re-ranks every candidate.
            let hits = fx
                .store
                .rag
                .query_vector(
                    "t1",
                    query.clone(),
                    QueryOptions::default()
                        .k(k)
                        .nprobes(nprobes)
                        .refine_factor(200),
                )
                .await
                .unwrap();
            let r = common::recall(&hits, &truth);
            assert!(r >= previous, "recall fell from {previous} to {r} at nprobes {nprobes}");
            previous = r;
        }
        assert!((previous - 1.0).abs() < f64::EPSILON);
    }
}

#[tokio::test]
async fn test_recall_never_drops_as_probes_grow_at_minimal_shortlist() {
    let fx = build_fixture().await;
    let k = 10;

    for query in common::random_vectors(10, DIM, 2024) {
        let truth = common::brute_force_top_k(&fx.vectors, &query, k, Metric::L2);
        let mut previous = 0.0;
        for nprobes in 1..=10 {
            let hits = fx
                .store
                .rag
                .query_vector(
                    "t1",
                    query.clone(),
                    QueryOptions::default().k(k).nprobes(nprobes).refine_factor(1),
                )
                .await
                .unwrap();
            let r = common::recall(&hits, &truth);
            assert!(r >= previous, "recall fell from {previous} to {r} at nprobes {nprobes}");
            previous = r;
        }
    }
}

#[tokio::test]
async fn test_unindexed_tail_is_searched() {
    let fx = build_fixture().await;

    let late = common::random_vectors(1, DIM, 31337);
    let report = fx
        .store
        .rag
        .insert_records("t1", common::raw_records(&late))
        .await
        .unwrap();

    let stats = fx.store.rag.table_stats("t1").await.unwrap();
    assert_eq!(stats.unindexed_count, 1);

    let hits = fx
        .store
        .rag
        .query_vector(
            "t1",
            late[0].clone(),
            QueryOptions::default().k(1).nprobes(1),
        )
        .await
        .unwrap();
    assert_eq!(hits[0].id, report.ids[0]);
}
