//! Search executor: probe, approximate scan, exact re-rank.
//!
//! 1. Validate the query length against the table dimension.
//! 2. Probe the `nprobes` partitions whose centroids are closest.
//! 3. Gather live, filter-matching postings from those partitions plus the
//!    whole unindexed overflow tail.
//! 4. Keep the `k * refine_factor` best candidates by approximate distance
//!    from each probed partition and from the overflow tail.
//! 5. Recompute exact distances on the raw embeddings, sort, truncate to `k`.
//!
//! Without an index every live record is scored exactly (brute-force mode).
//! Ranking is always by `(distance, record id)` ascending.

use std::time::{Duration, Instant};

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;

use crate::error::{RagError, RagResult};
use crate::vector::distance;
use crate::vector::filter::FilterClause;
use crate::vector::index::IvfPqIndex;
use crate::vector::storage::RecordStore;
use crate::vector::types::{Metric, Neighbor, RecordId};

/// Default number of partitions probed per query.
pub const DEFAULT_NPROBES: usize = 20;

/// Tuning knobs of a single search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub k: usize,
    /// Clamped to `[1, num_partitions]`.
    pub nprobes: usize,
    /// Shortlist multiplier; `0` is treated as `1`.
    pub refine_factor: usize,
    pub filter: Option<FilterClause>,
}

impl SearchParams {
    #[must_use]
    pub fn new(k: usize) -> Self {
        Self {
            k,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_nprobes(mut self, nprobes: usize) -> Self {
        self.nprobes = nprobes;
        self
    }

    #[must_use]
    pub fn with_refine_factor(mut self, refine_factor: usize) -> Self {
        self.refine_factor = refine_factor;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterClause) -> Self {
        self.filter = Some(filter);
        self
    }

    fn shortlist_len(&self) -> usize {
        self.k.saturating_mul(self.refine_factor.max(1))
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            k: 10,
            nprobes: DEFAULT_NPROBES,
            refine_factor: 1,
            filter: None,
        }
    }
}

/// Time and cancellation limits of a search.
#[derive(Debug, Clone, Default)]
pub struct SearchBudget {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
    best_effort: bool,
}

impl SearchBudget {
    /// No deadline, not cancellable.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Option<Duration>) -> Self {
        self.with_deadline(timeout.map(|t| Instant::now() + t))
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// On deadline, rank whatever candidates were gathered instead of
    /// failing with `SearchTimeout`.
    #[must_use]
    pub fn best_effort(mut self, enabled: bool) -> Self {
        self.best_effort = enabled;
        self
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// `Ok(true)` to keep scanning, `Ok(false)` to stop and rank the partial
    /// candidate set.
    fn proceed(&self, started: Instant) -> RagResult<bool> {
        if self.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                if self.best_effort {
                    tracing::warn!(
                        "Search deadline reached after {:?}, ranking partial candidate set",
                        started.elapsed()
                    );
                    Ok(false)
                } else {
                    Err(RagError::SearchTimeout {
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    })
                }
            }
            _ => Ok(true),
        }
    }
}

/// Runs a k-nearest-neighbor query over one table.
///
/// `metric` is the table metric used when no index exists; a built index
/// carries its own.
pub fn search(
    store: &RecordStore,
    index: Option<&IvfPqIndex>,
    metric: Metric,
    query: &[f32],
    params: &SearchParams,
    budget: &SearchBudget,
) -> RagResult<Vec<Neighbor>> {
    let started = Instant::now();

    store.dimension().validate_vector(query)?;
    if let Some(filter) = &params.filter {
        filter.validate()?;
    }
    if budget.is_cancelled() {
        return Err(RagError::Cancelled);
    }
    if params.k == 0 || store.live_count() == 0 {
        return Ok(Vec::new());
    }

    let accept = |id: RecordId| -> bool {
        match &params.filter {
            Some(filter) => store.metadata(id).is_some_and(|m| filter.matches(m)),
            None => true,
        }
    };

    let results = match index {
        Some(index) if index.dimension() == store.dimension() => {
            indexed_search(store, index, query, params, budget, started, &accept)?
        }
        _ => brute_force(store, metric, query, params, budget, started, &accept)?,
    };

    tracing::debug!(
        "Search k={} nprobes={} refine_factor={} returned {} results in {:?}",
        params.k,
        params.nprobes,
        params.refine_factor,
        results.len(),
        started.elapsed()
    );
    Ok(results)
}

fn indexed_search(
    store: &RecordStore,
    index: &IvfPqIndex,
    query: &[f32],
    params: &SearchParams,
    budget: &SearchBudget,
    started: Instant,
    accept: &(dyn Fn(RecordId) -> bool + Sync),
) -> RagResult<Vec<Neighbor>> {
    let metric = index.metric();
    let m = index.num_sub_vectors();
    let probes = index.nearest_partitions(query, params.nprobes);
    tracing::debug!("Probing partitions {:?}", probes);

    // Each probed partition contributes its own best `k * refine_factor`
    // postings, so probing more partitions only ever adds candidates.
    let per_source = params.shortlist_len();
    let mut shortlist: Vec<Neighbor> = Vec::new();
    let mut complete = true;

    for partition_id in &probes {
        if !budget.proceed(started)? {
            complete = false;
            break;
        }
        let Some(partition) = index.partition(*partition_id) else {
            continue;
        };
        let table = index.distance_table(query, *partition_id);
        let scored: Vec<Neighbor> = partition
            .postings(m)
            .filter(|(id, _)| store.is_live(*id) && accept(*id))
            .map(|(id, codes)| Neighbor::new(id, table.distance(codes)))
            .collect();
        shortlist.extend(top_n(scored, per_source));
    }

    // Unindexed tail: exact distance doubles as the approximate one.
    if complete && budget.proceed(started)? {
        let tail: Vec<Neighbor> = store
            .live_ids_after(index.indexed_through())
            .filter(|id| accept(*id))
            .filter_map(|id| {
                store
                    .read_vector(id)
                    .map(|v| Neighbor::new(id, distance::distance(metric, query, &v)))
            })
            .collect();
        shortlist.extend(top_n(tail, per_source));
    }

    let mut reranked: Vec<Neighbor> = shortlist
        .par_iter()
        .filter_map(|candidate| {
            store
                .read_vector(candidate.id)
                .map(|v| Neighbor::new(candidate.id, distance::distance(metric, query, &v)))
        })
        .collect();
    reranked.sort_by(Neighbor::rank_cmp);
    reranked.truncate(params.k);
    Ok(reranked)
}

/// Scores every live record exactly.
fn brute_force(
    store: &RecordStore,
    metric: Metric,
    query: &[f32],
    params: &SearchParams,
    budget: &SearchBudget,
    started: Instant,
    accept: &(dyn Fn(RecordId) -> bool + Sync),
) -> RagResult<Vec<Neighbor>> {
    const CHUNK: usize = 4096;

    let ids: Vec<RecordId> = store.live_ids().filter(|id| accept(*id)).collect();
    let mut scored = Vec::with_capacity(ids.len());

    for chunk in ids.chunks(CHUNK) {
        if !budget.proceed(started)? {
            break;
        }
        scored.par_extend(chunk.par_iter().filter_map(|&id| {
            store
                .read_vector(id)
                .map(|v| Neighbor::new(id, distance::distance(metric, query, &v)))
        }));
    }

    Ok(top_n(scored, params.k))
}

/// Best `n` by `(distance, id)`, sorted.
fn top_n(mut items: Vec<Neighbor>, n: usize) -> Vec<Neighbor> {
    if n == 0 {
        return Vec::new();
    }
    if items.len() > n {
        items.select_nth_unstable_by(n - 1, Neighbor::rank_cmp);
        items.truncate(n);
    }
    items.sort_by(Neighbor::rank_cmp);
    items
}
