//! Ingest and query pipelines over tenant tables.
//!
//! Ingest: embed the batch, append it under the tenant's write lock,
//! rebuild the index when the unindexed tail is large enough, invalidate the
//! tenant's cached queries. Query: consult the cache, otherwise embed the
//! text and search under the read lock, then cache the ranking.
//!
//! Blocking work (embedding, file I/O, index builds) runs on the tokio
//! blocking pool so async callers are never stalled by another tenant.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheKey, CacheStats, QueryCache, SharedResources};
use crate::config::{SearchConfig, Settings};
use crate::error::{RagError, RagResult};
use crate::rag::context::{AssembledContext, ContextAssembler, RetrievedRecord, TEXT_KEY};
use crate::rag::generation::GenerationBackend;
use crate::rag::table::{RebuildPolicy, TableStats, TenantTable};
use crate::tenant::{NamespaceRoot, TenantId, TenantNamespace};
use crate::vector::{
    EmbeddingGenerator, FilterClause, Metadata, MetadataValue, Neighbor, NewRecord, RecordId,
    SearchBudget, SearchParams, VectorDimension, create_generator,
};

/// A document to ingest: its text is embedded and stored under the
/// reserved `text` metadata key.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<MetadataValue>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub tenant: String,
    pub count: usize,
    pub ids: Vec<RecordId>,
    pub index_rebuilt: bool,
}

impl IngestReport {
    fn empty(tenant: &TenantId) -> Self {
        Self {
            tenant: tenant.to_string(),
            count: 0,
            ids: Vec::new(),
            index_rebuilt: false,
        }
    }
}

/// Per-query overrides of the `[search]` settings.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub k: Option<usize>,
    pub nprobes: Option<usize>,
    pub refine_factor: Option<usize>,
    pub filter: Option<FilterClause>,
    pub timeout: Option<Duration>,
    pub best_effort: Option<bool>,
    pub cancel: Option<CancellationToken>,
}

impl QueryOptions {
    #[must_use]
    pub fn k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    #[must_use]
    pub fn nprobes(mut self, nprobes: usize) -> Self {
        self.nprobes = Some(nprobes);
        self
    }

    #[must_use]
    pub fn refine_factor(mut self, refine_factor: usize) -> Self {
        self.refine_factor = Some(refine_factor);
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: FilterClause) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn best_effort(mut self, enabled: bool) -> Self {
        self.best_effort = Some(enabled);
        self
    }

    #[must_use]
    pub fn cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn search_params(&self, defaults: &SearchConfig) -> SearchParams {
        let params = SearchParams::new(self.k.unwrap_or(defaults.k))
            .with_nprobes(self.nprobes.unwrap_or(defaults.nprobes))
            .with_refine_factor(self.refine_factor.unwrap_or(defaults.refine_factor));
        match &self.filter {
            Some(filter) => params.with_filter(filter.clone()),
            None => params,
        }
    }
}

/// Ranked neighbors of one query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub neighbors: Arc<[Neighbor]>,
    /// Served from the query cache.
    pub cached: bool,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub answer: String,
    pub context: AssembledContext,
}

/// Entry point of the store: one instance per process, shared by callers.
pub struct RagOrchestrator {
    settings: Settings,
    root: NamespaceRoot,
    resources: Arc<SharedResources>,
    cache: Arc<QueryCache>,
    generator: Option<Arc<dyn GenerationBackend>>,
}

impl RagOrchestrator {
    /// Builds an orchestrator whose embedder comes from the `[embedding]`
    /// settings and is constructed on first use.
    pub fn new(settings: Settings) -> RagResult<Self> {
        let backend = settings.embedding.backend;
        let dimension = settings.embedding.dimension;
        let resources = SharedResources::new(move || {
            create_generator(backend, dimension).map(Arc::<dyn EmbeddingGenerator>::from)
        });
        Self::with_resources(settings, Arc::new(resources))
    }

    /// Builds an orchestrator over injected shared resources.
    pub fn with_resources(settings: Settings, resources: Arc<SharedResources>) -> RagResult<Self> {
        settings.validate()?;
        Ok(Self {
            root: NamespaceRoot::new(settings.data_dir.clone()),
            cache: Arc::new(QueryCache::new(settings.cache.capacity)),
            settings,
            resources,
            generator: None,
        })
    }

    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn GenerationBackend>) -> Self {
        self.generator = Some(generator);
        self
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Namespaces on disk, sorted. Never opens a table.
    pub fn list_tenants(&self) -> RagResult<Vec<TenantId>> {
        self.root.list_tenants()
    }

    /// Embeds and stores `documents` as one all-or-nothing unit.
    pub async fn ingest(&self, tenant: &str, documents: Vec<Document>) -> RagResult<IngestReport> {
        self.ingest_with_cancel(tenant, documents, &CancellationToken::new())
            .await
    }

    /// Like [`RagOrchestrator::ingest`], abandoning the batch if `cancel`
    /// fires before the write starts.
    pub async fn ingest_with_cancel(
        &self,
        tenant: &str,
        documents: Vec<Document>,
        cancel: &CancellationToken,
    ) -> RagResult<IngestReport> {
        let namespace = self.root.resolve(tenant)?;
        let tenant_id = namespace.tenant_id().clone();
        if documents.is_empty() {
            return Ok(IngestReport::empty(&tenant_id));
        }

        let texts: Arc<[String]> = documents.iter().map(|d| d.text.clone()).collect();
        let embed = async {
            let embedder = self.resources.embedder().await?;
            let dimension = embedder.dimension();
            let embeddings = self
                .retry("Embedding", &tenant_id, || {
                    self.embed(Arc::clone(&embedder), Arc::clone(&texts))
                })
                .await?;
            Ok::<_, RagError>((dimension, embeddings))
        };
        let (dimension, embeddings) = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RagError::Cancelled),
            result = embed => result.map_err(|e| ingest_failure(&tenant_id, e))?,
        };

        let records = documents
            .into_iter()
            .zip(embeddings)
            .map(|(doc, embedding)| {
                let mut metadata = doc.metadata;
                metadata.insert(TEXT_KEY.to_string(), MetadataValue::String(doc.text));
                NewRecord {
                    embedding,
                    metadata,
                }
            })
            .collect();

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        self.write_records(namespace, records, dimension).await
    }

    /// Stores pre-computed embeddings, bypassing the embedder.
    ///
    /// A new table takes the length of the first embedding as its dimension.
    pub async fn insert_records(
        &self,
        tenant: &str,
        records: Vec<NewRecord>,
    ) -> RagResult<IngestReport> {
        let namespace = self.root.resolve(tenant)?;
        let Some(first) = records.first() else {
            return Ok(IngestReport::empty(namespace.tenant_id()));
        };
        let first_len = first.embedding.len();

        let existing = self.existing_table(namespace.clone()).await?;
        let dimension = match existing.and_then(|table| table.dimension()) {
            Some(dimension) => dimension,
            None => VectorDimension::new(first_len).map_err(|_| RagError::DimensionMismatch {
                expected: self.settings.embedding.dimension,
                actual: first_len,
            })?,
        };
        self.write_records(namespace, records, dimension).await
    }

    async fn write_records(
        &self,
        namespace: TenantNamespace,
        records: Vec<NewRecord>,
        dimension: VectorDimension,
    ) -> RagResult<IngestReport> {
        let tenant_id = namespace.tenant_id().clone();
        let table = self
            .table(namespace)
            .await
            .map_err(|e| ingest_failure(&tenant_id, e))?;
        let records = Arc::new(records);

        let outcome = self
            .retry("Record write", &tenant_id, || {
                let table = Arc::clone(&table);
                let records = Arc::clone(&records);
                let policy = RebuildPolicy {
                    threshold: self.settings.index.rebuild_threshold,
                    params: self.settings.index.params(),
                };
                self.run_blocking(move || table.append(&records, dimension, &policy))
            })
            .await
            .map_err(|e| ingest_failure(&tenant_id, e))?;

        let invalidated = self.cache.invalidate_tenant(&tenant_id);
        tracing::info!(
            "Ingested {} records into tenant '{tenant_id}' (index rebuilt: {}, {invalidated} cached queries dropped)",
            outcome.ids.len(),
            outcome.index_rebuilt
        );

        Ok(IngestReport {
            tenant: tenant_id.to_string(),
            count: outcome.ids.len(),
            ids: outcome.ids,
            index_rebuilt: outcome.index_rebuilt,
        })
    }

    /// Ranked neighbors of `text` in `tenant`, served from the cache when
    /// the same query ran since the tenant's last write.
    pub async fn query(
        &self,
        tenant: &str,
        text: &str,
        options: QueryOptions,
    ) -> RagResult<QueryResult> {
        let namespace = self.root.resolve(tenant)?;
        let params = options.search_params(&self.settings.search);
        if let Some(filter) = &params.filter {
            filter.validate()?;
        }

        let key = CacheKey::new(namespace.tenant_id(), text, &params);
        if let Some(neighbors) = self.cache.get(&key) {
            return Ok(QueryResult {
                neighbors,
                cached: true,
            });
        }
        let Some(table) = self.existing_table(namespace.clone()).await? else {
            return Ok(QueryResult {
                neighbors: Vec::new().into(),
                cached: false,
            });
        };
        let generation = self.cache.generation(namespace.tenant_id());

        let cancel = options.cancel.clone().unwrap_or_default();
        let timeout = options.timeout.or_else(|| self.settings.search.timeout());
        let best_effort = options.best_effort.unwrap_or(self.settings.search.best_effort);
        let tenant_id = namespace.tenant_id().clone();

        let work = {
            let cancel = cancel.clone();
            let params = params.clone();
            async move {
                let embedder = self.resources.embedder().await?;
                let texts: Arc<[String]> = Arc::from(vec![text.to_string()]);
                let query = self
                    .retry("Query embedding", &tenant_id, || {
                        self.embed(Arc::clone(&embedder), Arc::clone(&texts))
                    })
                    .await?
                    .pop()
                    .ok_or_else(|| RagError::Embedding("no embedding for query".to_string()))?;

                let budget = SearchBudget::unbounded()
                    .with_timeout(timeout)
                    .best_effort(best_effort)
                    .with_cancel(cancel);
                self.run_blocking(move || table.search(&query, &params, &budget))
                    .await
            }
        };

        let results = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RagError::Cancelled),
            result = work => result?,
        };

        let neighbors: Arc<[Neighbor]> = results.into();
        // A best-effort search may rank a partial candidate set.
        if !(best_effort && timeout.is_some()) {
            self.cache.insert(key, Arc::clone(&neighbors), generation);
        }
        Ok(QueryResult {
            neighbors,
            cached: false,
        })
    }

    /// Searches with a caller-supplied embedding. Not cached.
    pub async fn query_vector(
        &self,
        tenant: &str,
        vector: Vec<f32>,
        options: QueryOptions,
    ) -> RagResult<Vec<Neighbor>> {
        let namespace = self.root.resolve(tenant)?;
        let params = options.search_params(&self.settings.search);
        if let Some(filter) = &params.filter {
            filter.validate()?;
        }
        let Some(table) = self.existing_table(namespace).await? else {
            return Ok(Vec::new());
        };
        let cancel = options.cancel.clone().unwrap_or_default();
        let budget = SearchBudget::unbounded()
            .with_timeout(options.timeout.or_else(|| self.settings.search.timeout()))
            .best_effort(options.best_effort.unwrap_or(self.settings.search.best_effort))
            .with_cancel(cancel.clone());

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RagError::Cancelled),
            result = self.run_blocking(move || table.search(&vector, &params, &budget)) => result,
        }
    }

    /// Query plus the stored text and metadata of every hit.
    pub async fn retrieve(
        &self,
        tenant: &str,
        text: &str,
        options: QueryOptions,
    ) -> RagResult<Vec<RetrievedRecord>> {
        let result = self.query(tenant, text, options).await?;
        if result.neighbors.is_empty() {
            return Ok(Vec::new());
        }
        let Some(table) = self.existing_table(self.root.resolve(tenant)?).await? else {
            return Ok(Vec::new());
        };
        self.run_blocking(move || Ok(table.records(&result.neighbors)))
            .await
    }

    /// Retrieves and assembles the context for `question`.
    pub async fn assemble_context(
        &self,
        tenant: &str,
        question: &str,
        options: QueryOptions,
    ) -> RagResult<AssembledContext> {
        let hits = self.retrieve(tenant, question, options).await?;
        Ok(ContextAssembler::from(&self.settings.context).assemble(&hits))
    }

    /// Full pipeline: retrieve, assemble context, generate.
    pub async fn answer(
        &self,
        tenant: &str,
        question: &str,
        options: QueryOptions,
    ) -> RagResult<Answer> {
        let Some(generator) = self.generator.as_ref().map(Arc::clone) else {
            return Err(RagError::Config(
                "no generation backend configured".to_string(),
            ));
        };
        let context = self.assemble_context(tenant, question, options).await?;
        let answer = generator.generate(question, &context).await?;
        Ok(Answer { answer, context })
    }

    /// Rebuilds the tenant's index from its raw records.
    ///
    /// Too little data leaves the table without an index rather than
    /// failing; a build past `index.rebuild_timeout_ms` fails with
    /// `BuildTimeout` and keeps the previous index.
    pub async fn rebuild_index(&self, tenant: &str) -> RagResult<TableStats> {
        let namespace = self.root.resolve(tenant)?;
        let Some(table) = self.existing_table(namespace.clone()).await? else {
            return Ok(TableStats::empty(namespace.tenant_id(), self.settings.index.metric));
        };
        let params = self.settings.index.params();
        let stats = self
            .run_blocking({
                let table = Arc::clone(&table);
                move || {
                    table.rebuild(params)?;
                    Ok(table.stats())
                }
            })
            .await?;
        self.cache.invalidate_tenant(table.tenant());
        Ok(stats)
    }

    /// Deletes the persisted index; queries fall back to exhaustive scans.
    pub async fn drop_index(&self, tenant: &str) -> RagResult<bool> {
        let Some(table) = self.existing_table(self.root.resolve(tenant)?).await? else {
            return Ok(false);
        };
        let dropped = self
            .run_blocking({
                let table = Arc::clone(&table);
                move || table.drop_index()
            })
            .await?;
        self.cache.invalidate_tenant(table.tenant());
        Ok(dropped)
    }

    /// Tombstones records; the next rebuild trigger rebuilds in full.
    pub async fn delete_records(&self, tenant: &str, ids: Vec<RecordId>) -> RagResult<usize> {
        let Some(table) = self.existing_table(self.root.resolve(tenant)?).await? else {
            return Ok(0);
        };
        let deleted = self
            .run_blocking({
                let table = Arc::clone(&table);
                move || table.delete(&ids)
            })
            .await?;
        if deleted > 0 {
            self.cache.invalidate_tenant(table.tenant());
        }
        Ok(deleted)
    }

    /// Read-only stats; does not create the namespace.
    pub async fn table_stats(&self, tenant: &str) -> RagResult<TableStats> {
        let namespace = self.root.resolve(tenant)?;
        let Some(table) = self.existing_table(namespace.clone()).await? else {
            return Ok(TableStats::empty(
                namespace.tenant_id(),
                self.settings.index.metric,
            ));
        };
        self.run_blocking(move || Ok(table.stats())).await
    }

    /// Handle of a tenant that already has a namespace on disk or a
    /// registered table. Read and admin paths never register new tenants.
    async fn existing_table(
        &self,
        namespace: TenantNamespace,
    ) -> RagResult<Option<Arc<TenantTable>>> {
        if self.resources.table(namespace.tenant_id()).is_none() && !namespace.exists() {
            return Ok(None);
        }
        self.table(namespace).await.map(Some)
    }

    /// Shared handle of the tenant's table, opened and registered on first
    /// use. Only the write path calls this for tenants not yet on disk.
    async fn table(&self, namespace: TenantNamespace) -> RagResult<Arc<TenantTable>> {
        if let Some(table) = self.resources.table(namespace.tenant_id()) {
            return Ok(table);
        }
        let resources = Arc::clone(&self.resources);
        let metric = self.settings.index.metric;
        self.run_blocking(move || {
            let tenant = namespace.tenant_id().clone();
            resources.table_or_open(&tenant, || TenantTable::open(namespace, metric))
        })
        .await
    }

    async fn embed(
        &self,
        embedder: Arc<dyn EmbeddingGenerator>,
        texts: Arc<[String]>,
    ) -> RagResult<Vec<Vec<f32>>> {
        let expected = texts.len();
        let task = tokio::task::spawn_blocking(move || {
            let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
            embedder.generate_embeddings(&refs)
        });

        let joined = match self.settings.ingest.embed_timeout() {
            Some(limit) => tokio::time::timeout(limit, task).await.map_err(|_| {
                RagError::Embedding(format!(
                    "embedding call timed out after {}ms",
                    limit.as_millis()
                ))
            })?,
            None => task.await,
        };
        let embeddings = joined
            .map_err(|e| RagError::Embedding(format!("embedding task failed: {e}")))??;

        if embeddings.len() != expected {
            return Err(RagError::Embedding(format!(
                "generator returned {} embeddings for {expected} texts",
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }

    /// Runs `op` until it succeeds, fails permanently, or the retry budget
    /// of `[ingest]` is spent.
    async fn retry<T, F, Fut>(&self, what: &str, tenant: &TenantId, mut op: F) -> RagResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RagResult<T>>,
    {
        let max_retries = self.settings.ingest.max_retries;
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < max_retries => {
                    attempt += 1;
                    let delay = self.settings.ingest.backoff(attempt);
                    tracing::warn!(
                        "{what} for tenant '{tenant}' failed (attempt {attempt}/{max_retries}), retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }

    async fn run_blocking<T, F>(&self, f: F) -> RagResult<T>
    where
        F: FnOnce() -> RagResult<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| RagError::storage(self.root.base(), std::io::Error::other(e)))?
    }
}

impl std::fmt::Debug for RagOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagOrchestrator")
            .field("data_dir", &self.root.base())
            .field("resources", &self.resources)
            .field("cache", &self.cache)
            .field("generator", &self.generator.is_some())
            .finish()
    }
}

/// Validation errors surface as-is; anything else inside the ingest unit
/// becomes `IngestFailed`.
fn ingest_failure(tenant: &TenantId, error: RagError) -> RagError {
    match error {
        RagError::DimensionMismatch { .. }
        | RagError::NonFiniteComponent { .. }
        | RagError::InvalidTenantId { .. }
        | RagError::Cancelled
        | RagError::IngestFailed { .. } => error,
        other => RagError::IngestFailed {
            tenant: tenant.to_string(),
            reason: other.to_string(),
        },
    }
}
