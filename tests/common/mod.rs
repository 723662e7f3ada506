#![allow(dead_code)]

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ragdb::cache::SharedResources;
use ragdb::vector::HashEmbeddingGenerator;
use ragdb::vector::distance;
use ragdb::{
    Document, EmbeddingGenerator, Metadata, Metric, Neighbor, NewRecord, RagOrchestrator,
    RagResult, RecordId, Settings, VectorDimension,
};
use tempfile::TempDir;

pub const EMBEDDING_DIM: usize = 64;

/// An orchestrator over an isolated data directory.
pub struct TestStore {
    pub dir: TempDir,
    pub rag: RagOrchestrator,
}

/// Small-data defaults: few partitions, fast retries.
pub fn test_settings(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.data_dir = dir.path().join("data");
    settings.index.num_partitions = 2;
    settings.index.num_sub_vectors = 4;
    settings.index.rebuild_threshold = 4;
    settings.ingest.retry_backoff_ms = 1;
    settings.embedding.dimension = EMBEDDING_DIM;
    settings
}

pub fn hash_embedder() -> Arc<dyn EmbeddingGenerator> {
    Arc::new(HashEmbeddingGenerator::new(
        VectorDimension::new(EMBEDDING_DIM).expect("non-zero dimension"),
    ))
}

/// Creates a store backed by the hash embedder, after `configure` tweaks
/// the settings.
pub fn create_test_store(configure: impl FnOnce(&mut Settings)) -> TestStore {
    create_test_store_with(hash_embedder(), configure)
}

pub fn create_test_store_with(
    embedder: Arc<dyn EmbeddingGenerator>,
    configure: impl FnOnce(&mut Settings),
) -> TestStore {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut settings = test_settings(&dir);
    configure(&mut settings);
    let rag = RagOrchestrator::with_resources(
        settings,
        Arc::new(SharedResources::with_embedder(embedder)),
    )
    .expect("valid test settings");
    TestStore { dir, rag }
}

/// Reopens the same data directory with fresh process-wide state.
pub fn reopen(store: &TestStore, configure: impl FnOnce(&mut Settings)) -> RagOrchestrator {
    let mut settings = test_settings(&store.dir);
    configure(&mut settings);
    RagOrchestrator::with_resources(
        settings,
        Arc::new(SharedResources::with_embedder(hash_embedder())),
    )
    .expect("valid test settings")
}

pub fn documents(texts: &[&str]) -> Vec<Document> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| Document::new(*text).with_metadata("source", format!("doc-{i}.md")))
        .collect()
}

pub fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
        .collect()
}

pub fn raw_records(vectors: &[Vec<f32>]) -> Vec<NewRecord> {
    vectors
        .iter()
        .map(|v| NewRecord {
            embedding: v.clone(),
            metadata: Metadata::new(),
        })
        .collect()
}

/// Exact top-k ids, ties broken by id.
pub fn brute_force_top_k(
    records: &[(RecordId, Vec<f32>)],
    query: &[f32],
    k: usize,
    metric: Metric,
) -> Vec<RecordId> {
    let mut scored: Vec<Neighbor> = records
        .iter()
        .map(|(id, v)| Neighbor::new(*id, distance::distance(metric, query, v)))
        .collect();
    scored.sort_by(Neighbor::rank_cmp);
    scored.into_iter().take(k).map(|n| n.id).collect()
}

pub fn recall(found: &[Neighbor], truth: &[RecordId]) -> f64 {
    if truth.is_empty() {
        return 1.0;
    }
    let hits = found.iter().filter(|n| truth.contains(&n.id)).count();
    hits as f64 / truth.len() as f64
}

/// Wraps the hash embedder, returning a short vector for any text that
/// contains `poison`.
pub struct PoisonedEmbedder {
    pub inner: HashEmbeddingGenerator,
}

impl PoisonedEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashEmbeddingGenerator::new(
                VectorDimension::new(EMBEDDING_DIM).expect("non-zero dimension"),
            ),
        }
    }
}

impl EmbeddingGenerator for PoisonedEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> RagResult<Vec<Vec<f32>>> {
        let mut embeddings = self.inner.generate_embeddings(texts)?;
        for (text, embedding) in texts.iter().zip(embeddings.iter_mut()) {
            if text.contains("poison") {
                embedding.truncate(EMBEDDING_DIM / 2);
            }
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }
}
