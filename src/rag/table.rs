//! Per-tenant table handle: record store, optional index and the lock that
//! serializes writers.
//!
//! Readers (search, stats, record lookup) share the lock; ingest, delete and
//! rebuild take it exclusively. Each tenant has its own lock, so work on one
//! tenant never waits on another.

use std::fs;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{RagError, RagResult};
use crate::rag::context::{RetrievedRecord, TEXT_KEY};
use crate::tenant::{TenantId, TenantNamespace};
use crate::vector::{
    IndexParams, IvfPqIndex, Metadata, Metric, MetadataValue, Neighbor, NewRecord, RecordId,
    RecordStore, SearchBudget, SearchParams, VectorDimension,
};

/// Lifecycle of a tenant table.
///
/// Ingest and query are not states of their own: they are the exclusive
/// and shared holds on the table lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    /// Nothing has been written to the namespace yet.
    Uninitialized,
    Open,
}

/// Read-only summary for operational tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStats {
    pub tenant: String,
    pub state: TableState,
    /// Live (not deleted) records.
    pub record_count: usize,
    pub deleted_count: usize,
    pub partition_count: usize,
    pub index_built: bool,
    pub indexed_count: usize,
    /// Live records appended after the last build.
    pub unindexed_count: usize,
    pub dimension: Option<usize>,
    pub metric: Metric,
}

impl TableStats {
    /// Stats of a namespace that holds no data.
    #[must_use]
    pub fn empty(tenant: &TenantId, metric: Metric) -> Self {
        Self {
            tenant: tenant.to_string(),
            state: TableState::Uninitialized,
            record_count: 0,
            deleted_count: 0,
            partition_count: 0,
            index_built: false,
            indexed_count: 0,
            unindexed_count: 0,
            dimension: None,
            metric,
        }
    }
}

/// Result of one batch append.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendOutcome {
    pub ids: Vec<RecordId>,
    pub index_rebuilt: bool,
}

/// When an append triggers an index rebuild.
#[derive(Debug, Clone)]
pub struct RebuildPolicy {
    /// Unindexed live records that trigger a rebuild.
    pub threshold: usize,
    pub params: IndexParams,
}

#[derive(Debug)]
struct TableInner {
    store: Option<RecordStore>,
    index: Option<IvfPqIndex>,
    /// Set when the persisted index no longer reflects the records.
    needs_rebuild: bool,
}

impl TableInner {
    fn unindexed_count(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };
        let through = self.index.as_ref().map_or(0, IvfPqIndex::indexed_through);
        store.live_ids_after(through).count()
    }
}

/// Handle to one tenant's data.
#[derive(Debug)]
pub struct TenantTable {
    namespace: TenantNamespace,
    metric: Metric,
    inner: RwLock<TableInner>,
}

impl TenantTable {
    /// Opens whatever exists in `namespace`. Never creates files.
    ///
    /// A persisted index that does not match the records or the configured
    /// metric is ignored and the table is flagged for rebuild.
    pub fn open(namespace: TenantNamespace, metric: Metric) -> RagResult<Self> {
        let store = RecordStore::open(namespace.path())?;
        let mut needs_rebuild = false;

        let index = match (&store, IvfPqIndex::load(&namespace.index_path())) {
            (None, _) | (_, Ok(None)) => None,
            (Some(_), Err(e @ RagError::Corrupted { .. })) => {
                tracing::warn!("Ignoring unreadable index for tenant '{}': {e}", namespace.tenant_id());
                needs_rebuild = true;
                None
            }
            (Some(_), Err(e)) => return Err(e),
            (Some(store), Ok(Some(index))) => {
                if index.dimension() != store.dimension()
                    || index.indexed_through() as usize > store.len()
                {
                    tracing::warn!(
                        "Ignoring stale index for tenant '{}' (covers records the store does not hold)",
                        namespace.tenant_id()
                    );
                    needs_rebuild = true;
                    None
                } else if index.metric() != metric {
                    tracing::warn!(
                        "Ignoring index for tenant '{}' built with metric {}, configured metric is {}",
                        namespace.tenant_id(),
                        index.metric().as_str(),
                        metric.as_str()
                    );
                    needs_rebuild = true;
                    None
                } else {
                    Some(index)
                }
            }
        };

        tracing::debug!(
            "Opened table for tenant '{}': {} records, index loaded: {}",
            namespace.tenant_id(),
            store.as_ref().map_or(0, RecordStore::len),
            index.is_some()
        );

        Ok(Self {
            namespace,
            metric,
            inner: RwLock::new(TableInner {
                store,
                index,
                needs_rebuild,
            }),
        })
    }

    #[must_use]
    pub fn tenant(&self) -> &TenantId {
        self.namespace.tenant_id()
    }

    #[must_use]
    pub fn namespace(&self) -> &TenantNamespace {
        &self.namespace
    }

    #[must_use]
    pub fn metric(&self) -> Metric {
        self.metric
    }

    #[must_use]
    pub fn state(&self) -> TableState {
        if self.inner.read().store.is_some() {
            TableState::Open
        } else {
            TableState::Uninitialized
        }
    }

    /// Dimension of the stored vectors, once the first record is written.
    #[must_use]
    pub fn dimension(&self) -> Option<VectorDimension> {
        self.inner.read().store.as_ref().map(RecordStore::dimension)
    }

    /// Appends `records` and rebuilds the index when the unindexed tail
    /// reaches the policy threshold.
    ///
    /// All-or-nothing: a dimension error writes nothing, and a rebuild that
    /// runs out of time rolls the append back before returning
    /// `BuildTimeout`. Any other rebuild failure keeps the records and
    /// leaves them in the overflow set.
    pub fn append(
        &self,
        records: &[NewRecord],
        dimension: VectorDimension,
        policy: &RebuildPolicy,
    ) -> RagResult<AppendOutcome> {
        let mut inner = self.inner.write();

        if records.is_empty() {
            return Ok(AppendOutcome {
                ids: Vec::new(),
                index_rebuilt: false,
            });
        }
        if inner.store.is_none() {
            // Validate before the namespace gets its first files.
            for record in records {
                dimension.validate_vector(&record.embedding)?;
            }
            inner.store = Some(RecordStore::open_or_create(self.namespace.path(), dimension)?);
        }
        let Some(store) = inner.store.as_mut() else {
            return Err(RagError::corrupted(self.namespace.path(), "record store missing"));
        };

        let mark = store.mark();
        let ids = store.append_batch(records)?;

        let index_rebuilt = if inner.needs_rebuild || inner.unindexed_count() >= policy.threshold {
            match self.rebuild_locked(&mut inner, policy.params.clone()) {
                Ok(built) => built,
                Err(e @ RagError::BuildTimeout { .. }) => {
                    if let Some(store) = inner.store.as_mut() {
                        store.rollback(mark)?;
                    }
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        "Index rebuild after ingest failed for tenant '{}', new records stay unindexed: {e}",
                        self.tenant()
                    );
                    false
                }
            }
        } else {
            false
        };

        Ok(AppendOutcome { ids, index_rebuilt })
    }

    /// Rebuilds the index over all live records.
    ///
    /// Returns `Ok(false)` when there is too little data for the requested
    /// partition count; the table then serves queries by exhaustive scan.
    pub fn rebuild(&self, params: IndexParams) -> RagResult<bool> {
        let mut inner = self.inner.write();
        self.rebuild_locked(&mut inner, params)
    }

    fn rebuild_locked(&self, inner: &mut TableInner, params: IndexParams) -> RagResult<bool> {
        let Some(store) = inner.store.as_ref() else {
            return Ok(false);
        };
        let live = store.live_vectors();
        let records: Vec<(RecordId, &[f32])> =
            live.iter().map(|(id, v)| (*id, v.as_slice())).collect();

        match IvfPqIndex::build(&records, store.dimension(), params) {
            Ok(index) => {
                index.save(&self.namespace.index_path())?;
                tracing::info!(
                    "Rebuilt index for tenant '{}': {} records in {} partitions",
                    self.tenant(),
                    index.indexed_count(),
                    index.num_partitions()
                );
                inner.index = Some(index);
                inner.needs_rebuild = false;
                Ok(true)
            }
            Err(RagError::InsufficientData {
                records,
                partitions,
            }) => {
                tracing::warn!(
                    "Tenant '{}' has {records} records for {partitions} partitions, serving queries by exhaustive scan",
                    self.tenant()
                );
                self.discard_index(inner)?;
                inner.needs_rebuild = false;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Removes the index, leaving records untouched. Returns whether one
    /// existed.
    pub fn drop_index(&self) -> RagResult<bool> {
        let mut inner = self.inner.write();
        let existed = inner.index.is_some() || self.namespace.index_path().exists();
        self.discard_index(&mut inner)?;
        Ok(existed)
    }

    fn discard_index(&self, inner: &mut TableInner) -> RagResult<()> {
        inner.index = None;
        let path = self.namespace.index_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RagError::storage(path, e)),
        }
    }

    /// Tombstones `ids` and flags the index for rebuild.
    pub fn delete(&self, ids: &[RecordId]) -> RagResult<usize> {
        let mut inner = self.inner.write();
        let Some(store) = inner.store.as_mut() else {
            return Ok(0);
        };
        let deleted = store.delete(ids)?;
        if deleted > 0 {
            inner.needs_rebuild = true;
            tracing::info!("Deleted {deleted} records from tenant '{}'", self.tenant());
        }
        Ok(deleted)
    }

    /// Runs a k-nearest-neighbor query under the shared lock.
    pub fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
        budget: &SearchBudget,
    ) -> RagResult<Vec<Neighbor>> {
        let inner = self.inner.read();
        let Some(store) = inner.store.as_ref() else {
            if let Some(filter) = &params.filter {
                filter.validate()?;
            }
            return Ok(Vec::new());
        };
        if inner.index.is_none() && store.live_count() > 0 {
            tracing::debug!(
                "Tenant '{}' has no index, scanning {} records",
                self.tenant(),
                store.live_count()
            );
        }
        crate::vector::search(store, inner.index.as_ref(), self.metric, query, params, budget)
    }

    /// Resolves ranked neighbors into their stored text and metadata.
    #[must_use]
    pub fn records(&self, neighbors: &[Neighbor]) -> Vec<RetrievedRecord> {
        let inner = self.inner.read();
        let Some(store) = inner.store.as_ref() else {
            return Vec::new();
        };
        neighbors
            .iter()
            .filter_map(|n| {
                let mut metadata: Metadata = store.metadata(n.id)?.clone();
                let text = match metadata.remove(TEXT_KEY) {
                    Some(MetadataValue::String(text)) => Some(text),
                    _ => None,
                };
                Some(RetrievedRecord {
                    id: n.id,
                    distance: n.distance,
                    text,
                    metadata,
                })
            })
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> TableStats {
        let inner = self.inner.read();
        let Some(store) = inner.store.as_ref() else {
            return TableStats::empty(self.tenant(), self.metric);
        };
        TableStats {
            tenant: self.tenant().to_string(),
            state: TableState::Open,
            record_count: store.live_count(),
            deleted_count: store.deleted_count(),
            partition_count: inner.index.as_ref().map_or(0, IvfPqIndex::num_partitions),
            index_built: inner.index.is_some(),
            indexed_count: inner.index.as_ref().map_or(0, |index| {
                index
                    .partitions()
                    .iter()
                    .flat_map(|p| p.ids())
                    .filter(|id| store.is_live(**id))
                    .count()
            }),
            unindexed_count: inner.unindexed_count(),
            dimension: Some(store.dimension().get()),
            metric: self.metric,
        }
    }
}
