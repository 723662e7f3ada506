//! Query-result cache and process-wide shared resources.
//!
//! [`QueryCache`] is an LRU map from `(tenant, query, k, nprobes,
//! refine_factor, filter)` to ranked results. It sits behind its own mutex
//! and never touches table locks or storage, so a lookup can not wait on
//! another tenant's I/O.
//!
//! Every ingest or delete bumps the tenant's generation and drops all of its
//! entries. Results computed against an older generation are refused on
//! insert, so a query racing an ingest can not repopulate the cache with
//! stale data.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::OnceCell;

use crate::error::{RagError, RagResult};
use crate::rag::TenantTable;
use crate::tenant::TenantId;
use crate::vector::{EmbeddingGenerator, FilterClause, Neighbor, SearchParams};

/// Cache key of one query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    tenant: TenantId,
    query_hash: [u8; 32],
    k: usize,
    nprobes: usize,
    refine_factor: usize,
    filter_hash: Option<[u8; 32]>,
}

impl CacheKey {
    pub fn new(tenant: &TenantId, query: &str, params: &SearchParams) -> Self {
        Self {
            tenant: tenant.clone(),
            query_hash: Sha256::digest(query.as_bytes()).into(),
            k: params.k,
            nprobes: params.nprobes,
            refine_factor: params.refine_factor.max(1),
            filter_hash: params.filter.as_ref().map(filter_hash),
        }
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }
}

fn filter_hash(filter: &FilterClause) -> [u8; 32] {
    let bytes = serde_json::to_vec(filter).unwrap_or_else(|_| format!("{filter:?}").into_bytes());
    Sha256::digest(&bytes).into()
}

/// A cached ranked result list.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub results: Arc<[Neighbor]>,
    pub inserted_at: Instant,
}

/// Counters exposed for operational tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
    pub entries: usize,
    pub capacity: usize,
}

struct CacheState {
    /// `None` when caching is disabled.
    lru: Option<LruCache<CacheKey, CacheEntry>>,
    generations: HashMap<TenantId, u64>,
    stats: CacheStats,
}

/// LRU cache of query results with per-tenant invalidation.
pub struct QueryCache {
    state: Mutex<CacheState>,
}

impl QueryCache {
    /// Creates a cache holding up to `capacity` entries; `0` disables it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState {
                lru: NonZeroUsize::new(capacity).map(LruCache::new),
                generations: HashMap::new(),
                stats: CacheStats {
                    capacity,
                    ..CacheStats::default()
                },
            }),
        }
    }

    /// Current generation of `tenant`; pass it back to [`QueryCache::insert`].
    #[must_use]
    pub fn generation(&self, tenant: &TenantId) -> u64 {
        self.state
            .lock()
            .generations
            .get(tenant)
            .copied()
            .unwrap_or(0)
    }

    /// Looks up `key`, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<[Neighbor]>> {
        let mut state = self.state.lock();
        let hit = state
            .lru
            .as_mut()
            .and_then(|lru| lru.get(key))
            .map(|entry| Arc::clone(&entry.results));
        if hit.is_some() {
            state.stats.hits += 1;
            tracing::debug!("Cache hit for tenant '{}'", key.tenant);
        } else {
            state.stats.misses += 1;
            tracing::debug!("Cache miss for tenant '{}'", key.tenant);
        }
        hit
    }

    /// Stores results computed at `generation`.
    ///
    /// Returns `false` (and stores nothing) if the tenant was invalidated
    /// since, or if caching is disabled.
    pub fn insert(&self, key: CacheKey, results: Arc<[Neighbor]>, generation: u64) -> bool {
        let mut state = self.state.lock();
        let current = state.generations.get(&key.tenant).copied().unwrap_or(0);
        if current != generation {
            return false;
        }
        let Some(lru) = state.lru.as_mut() else {
            return false;
        };

        let entry = CacheEntry {
            results,
            inserted_at: Instant::now(),
        };
        let evicted = match lru.push(key.clone(), entry) {
            Some((old_key, _)) => old_key != key,
            None => false,
        };
        if evicted {
            state.stats.evictions += 1;
        }
        true
    }

    /// Drops every entry of `tenant` and bumps its generation.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_tenant(&self, tenant: &TenantId) -> usize {
        let mut state = self.state.lock();
        *state.generations.entry(tenant.clone()).or_insert(0) += 1;
        state.stats.invalidations += 1;

        let Some(lru) = state.lru.as_mut() else {
            return 0;
        };
        let stale: Vec<CacheKey> = lru
            .iter()
            .filter(|(key, _)| &key.tenant == tenant)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            lru.pop(key);
        }
        tracing::debug!("Invalidated {} cache entries for tenant '{tenant}'", stale.len());
        stale.len()
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.lru.as_ref().map_or(0, LruCache::len),
            ..state.stats
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().lru.as_ref().map_or(0, LruCache::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.try_lock() {
            Some(state) => write!(f, "QueryCache {{ stats: {:?} }}", state.stats),
            None => write!(f, "QueryCache {{ <locked> }}"),
        }
    }
}

type EmbedderFactory = Box<dyn Fn() -> RagResult<Arc<dyn EmbeddingGenerator>> + Send + Sync>;

/// Process-wide resources shared by all tenants.
///
/// The embedding generator is built lazily on first use from an injected
/// factory, so tests can substitute a fake. Table handles are opened once
/// per tenant and reused; they are never evicted while the process lives.
pub struct SharedResources {
    factory: EmbedderFactory,
    embedder: OnceCell<Arc<dyn EmbeddingGenerator>>,
    tables: DashMap<TenantId, Arc<TenantTable>>,
}

impl SharedResources {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> RagResult<Arc<dyn EmbeddingGenerator>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            embedder: OnceCell::new(),
            tables: DashMap::new(),
        }
    }

    /// Wraps an already constructed generator.
    pub fn with_embedder(embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        Self::new(move || Ok(Arc::clone(&embedder)))
    }

    /// Returns the embedder, constructing it on first call.
    ///
    /// Construction may download a model, so it runs on the blocking pool.
    /// A failed construction is not cached; the next call retries.
    pub async fn embedder(self: &Arc<Self>) -> RagResult<Arc<dyn EmbeddingGenerator>> {
        let this = Arc::clone(self);
        self.embedder
            .get_or_try_init(|| async move {
                tracing::debug!("Initializing embedding generator");
                tokio::task::spawn_blocking(move || (this.factory)())
                    .await
                    .map_err(|e| RagError::Embedding(format!("embedder init task failed: {e}")))?
            })
            .await
            .map(Arc::clone)
    }

    /// Returns the table handle of `tenant`, opening it with `open` if no
    /// handle is registered yet.
    ///
    /// `open` runs without holding any map lock, so a slow open never stalls
    /// lookups of other tenants. When two callers race, the first insert
    /// wins and the other handle is dropped.
    pub fn table_or_open<F>(&self, tenant: &TenantId, open: F) -> RagResult<Arc<TenantTable>>
    where
        F: FnOnce() -> RagResult<TenantTable>,
    {
        if let Some(table) = self.table(tenant) {
            return Ok(table);
        }
        let opened = Arc::new(open()?);
        let table = Arc::clone(&self.tables.entry(tenant.clone()).or_insert(opened));
        Ok(table)
    }

    /// Already-open table handle, if any.
    #[must_use]
    pub fn table(&self, tenant: &TenantId) -> Option<Arc<TenantTable>> {
        self.tables.get(tenant).map(|t| Arc::clone(&t))
    }

    #[must_use]
    pub fn open_tables(&self) -> usize {
        self.tables.len()
    }
}

impl std::fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedResources")
            .field("embedder_initialized", &self.embedder.initialized())
            .field("open_tables", &self.tables.len())
            .finish()
    }
}
