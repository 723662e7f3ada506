//! K-means clustering for partitioning the index.
//!
//! Seeded K-means++ initialization followed by Lloyd iterations. Distances
//! are computed in the table metric; for cosine tables the caller passes
//! unit-normalized vectors and centroids are re-normalized after every
//! update so that coarse ranking stays consistent with the metric.
//!
//! # Algorithm Details
//! - Initialization: K-means++ driven by a caller-provided seeded RNG
//! - Max iterations: 100 (configurable through [`KMeansParams`])
//! - Convergence: no assignment changes or mean centroid shift < 1e-4
//! - Assignment step runs in parallel with rayon

use std::time::Instant;

use rand::Rng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use thiserror::Error;

use crate::vector::distance::{self, EPSILON};
use crate::vector::types::{Metric, PartitionId};

/// Maximum number of iterations for K-means clustering.
pub const MAX_ITERATIONS: usize = 100;

/// Convergence tolerance for centroid updates.
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Parameters of one clustering run.
#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    pub k: usize,
    pub metric: Metric,
    pub max_iterations: usize,
    /// Abort with [`ClusteringError::DeadlineExceeded`] once passed.
    pub deadline: Option<Instant>,
}

impl KMeansParams {
    #[must_use]
    pub fn new(k: usize, metric: Metric) -> Self {
        Self {
            k,
            metric,
            max_iterations: MAX_ITERATIONS,
            deadline: None,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Result of K-means clustering operation.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each of the input dimension.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster assignment for each input vector.
    pub assignments: Vec<PartitionId>,

    /// Number of iterations until convergence.
    pub iterations: usize,
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error("Empty vector set provided for clustering")]
    EmptyVectorSet,

    #[error("Invalid cluster count {k} for {vectors} vectors")]
    InvalidClusterCount { k: usize, vectors: usize },

    #[error("Dimension mismatch in vectors")]
    DimensionMismatch,

    #[error("Failed to initialize centroids")]
    InitializationFailed,

    #[error("Clustering deadline exceeded after {iterations} iterations")]
    DeadlineExceeded { iterations: usize },
}

/// Performs K-means clustering on a set of vectors.
///
/// Deterministic for a fixed RNG seed.
pub fn kmeans_clustering(
    vectors: &[&[f32]],
    params: KMeansParams,
    rng: &mut StdRng,
) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }

    let k = params.k;
    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount {
            k,
            vectors: vectors.len(),
        });
    }

    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::DimensionMismatch);
    }

    let mut centroids = initialize_centroids_kmeans_plus_plus(vectors, params.metric, k, rng)?;
    let mut assignments: Vec<PartitionId> = Vec::new();
    let mut iterations = 0;

    loop {
        iterations += 1;

        let new_assignments = assign_all(vectors, &centroids, params.metric);
        let converged = new_assignments == assignments;
        assignments = new_assignments;

        if converged || iterations >= params.max_iterations {
            break;
        }

        if params.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ClusteringError::DeadlineExceeded { iterations });
        }

        let new_centroids = update_centroids(vectors, &assignments, k, params.metric, rng);
        let movement = calculate_centroid_movement(&centroids, &new_centroids);
        centroids = new_centroids;

        if movement < CONVERGENCE_TOLERANCE {
            // Assignments must reflect the final centroids.
            assignments = assign_all(vectors, &centroids, params.metric);
            break;
        }
    }

    if iterations >= params.max_iterations {
        tracing::debug!(
            "K-means did not fully converge after {} iterations",
            params.max_iterations
        );
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// Assigns a vector to the nearest centroid; lower index wins exact ties.
pub fn assign_to_nearest_centroid(
    vector: &[f32],
    centroids: &[Vec<f32>],
    metric: Metric,
) -> PartitionId {
    let mut best_distance = f32::INFINITY;
    let mut best_cluster = 0usize;

    for (i, centroid) in centroids.iter().enumerate() {
        let d = distance::distance(metric, vector, centroid);
        if d < best_distance {
            best_distance = d;
            best_cluster = i;
        }
    }

    PartitionId::new(best_cluster as u32)
}

fn assign_all(vectors: &[&[f32]], centroids: &[Vec<f32>], metric: Metric) -> Vec<PartitionId> {
    vectors
        .par_iter()
        .map(|vector| assign_to_nearest_centroid(vector, centroids, metric))
        .collect()
}

/// Updates centroids as the mean of their assigned vectors.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[PartitionId],
    k: usize,
    metric: Metric,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let dimension = vectors[0].len();
    let mut new_centroids = vec![vec![0.0; dimension]; k];
    let mut cluster_sizes = vec![0usize; k];

    for (vector, cluster) in vectors.iter().zip(assignments.iter()) {
        let idx = cluster.index();
        for (acc, &value) in new_centroids[idx].iter_mut().zip(vector.iter()) {
            *acc += value;
        }
        cluster_sizes[idx] += 1;
    }

    for (centroid, &size) in new_centroids.iter_mut().zip(cluster_sizes.iter()) {
        if size == 0 {
            // Empty cluster: reseed from a random input vector
            let random_idx = rng.random_range(0..vectors.len());
            *centroid = vectors[random_idx].to_vec();
        } else {
            for value in centroid.iter_mut() {
                *value /= size as f32;
            }
        }

        if metric == Metric::Cosine {
            distance::normalize(centroid);
        }
    }

    new_centroids
}

/// Initializes centroids using the K-means++ algorithm.
fn initialize_centroids_kmeans_plus_plus(
    vectors: &[&[f32]],
    metric: Metric,
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first_idx = rng.random_range(0..vectors.len());
    centroids.push(vectors[first_idx].to_vec());

    // Squared distance from each vector to its closest chosen centroid.
    let mut min_distances: Vec<f32> = vectors
        .iter()
        .map(|v| seeding_distance(v, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f32 = min_distances.iter().sum();

        let next_idx = if total < EPSILON {
            // All points coincide with existing centroids; fall back to the
            // first vector not yet used so k distinct slots still exist.
            (0..vectors.len())
                .find(|&i| !centroids.iter().any(|c| c.as_slice() == vectors[i]))
                .unwrap_or(centroids.len() % vectors.len())
        } else {
            let target = rng.random::<f32>() * total;
            let mut cumulative = 0.0;
            let mut chosen = min_distances
                .iter()
                .rposition(|&d| d > 0.0)
                .unwrap_or(vectors.len() - 1);
            for (i, &d) in min_distances.iter().enumerate() {
                cumulative += d;
                if cumulative >= target && d > 0.0 {
                    chosen = i;
                    break;
                }
            }
            chosen
        };

        let centroid = vectors[next_idx].to_vec();
        for (slot, v) in min_distances.iter_mut().zip(vectors.iter()) {
            *slot = slot.min(seeding_distance(v, &centroid));
        }
        centroids.push(centroid);
    }

    if centroids.len() != k {
        return Err(ClusteringError::InitializationFailed);
    }

    if metric == Metric::Cosine {
        for c in &mut centroids {
            distance::normalize(c);
        }
    }

    Ok(centroids)
}

/// K-means++ weights always use squared Euclidean distance so that they are
/// non-negative for every metric.
fn seeding_distance(a: &[f32], b: &[f32]) -> f32 {
    distance::l2_squared(a, b)
}

/// Mean Euclidean shift of centroids between iterations.
fn calculate_centroid_movement(old: &[Vec<f32>], new: &[Vec<f32>]) -> f32 {
    old.iter()
        .zip(new.iter())
        .map(|(o, n)| distance::l2_squared(o, n).sqrt())
        .sum::<f32>()
        / old.len() as f32
}
