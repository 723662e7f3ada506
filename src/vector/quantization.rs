//! Product quantization of partition residuals.
//!
//! A residual (vector minus its partition centroid) is split into
//! `num_sub_vectors` contiguous sub-spaces. Each sub-space learns up to 256
//! codewords with K-means, so a residual is stored as one byte per
//! sub-space. Query-time distances use a per-query lookup table: one table
//! read per sub-space instead of `dim` multiply-adds.
//!
//! Dimensions that do not divide evenly are split with the first
//! sub-spaces one element wider.

use rand::rngs::StdRng;
use rayon::prelude::*;

use crate::error::{RagError, RagResult};
use crate::vector::clustering::{KMeansParams, kmeans_clustering};
use crate::vector::distance;
use crate::vector::types::Metric;

/// Maximum codewords per sub-space (codes are `u8`).
pub const MAX_CODEWORDS: usize = 256;

/// Lloyd iterations per sub-space; sub-spaces are small and converge fast.
const SUBSPACE_ITERATIONS: usize = 25;

/// Codebook of one contiguous sub-space.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Subspace {
    pub(crate) start: usize,
    pub(crate) len: usize,
    /// `count * len` floats.
    pub(crate) codewords: Vec<f32>,
}

impl Subspace {
    #[inline]
    fn count(&self) -> usize {
        self.codewords.len() / self.len.max(1)
    }

    #[inline]
    fn codeword(&self, code: usize) -> &[f32] {
        &self.codewords[code * self.len..(code + 1) * self.len]
    }

    fn nearest(&self, sub_vec: &[f32]) -> u8 {
        let mut best = 0usize;
        let mut best_dist = f32::INFINITY;
        for c in 0..self.count() {
            let d = distance::l2_squared(sub_vec, self.codeword(c));
            if d < best_dist {
                best_dist = d;
                best = c;
            }
        }
        best as u8
    }
}

/// Trained product quantizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantizer {
    pub(crate) dimension: usize,
    pub(crate) subspaces: Vec<Subspace>,
}

impl ProductQuantizer {
    /// Trains codebooks on residual vectors.
    ///
    /// `num_sub_vectors` must lie in `[1, dimension]`.
    pub fn train(
        residuals: &[Vec<f32>],
        dimension: usize,
        num_sub_vectors: usize,
        rng: &mut StdRng,
    ) -> RagResult<Self> {
        if num_sub_vectors == 0 || num_sub_vectors > dimension {
            return Err(RagError::Config(format!(
                "num_sub_vectors must be between 1 and {dimension}, got {num_sub_vectors}"
            )));
        }
        if residuals.is_empty() {
            return Err(RagError::InsufficientData {
                records: 0,
                partitions: 1,
            });
        }

        let mut subspaces = Vec::with_capacity(num_sub_vectors);
        for (start, len) in subspace_bounds(dimension, num_sub_vectors) {
            let slices: Vec<&[f32]> = residuals.iter().map(|r| &r[start..start + len]).collect();
            let k = slices.len().min(MAX_CODEWORDS);
            let params = KMeansParams {
                k,
                metric: Metric::L2,
                max_iterations: SUBSPACE_ITERATIONS,
                deadline: None,
            };
            let result = kmeans_clustering(&slices, params, rng)
                .map_err(|e| RagError::Config(format!("sub-space quantizer training failed: {e}")))?;

            subspaces.push(Subspace {
                start,
                len,
                codewords: result.centroids.into_iter().flatten().collect(),
            });
        }

        Ok(Self {
            dimension,
            subspaces,
        })
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn num_sub_vectors(&self) -> usize {
        self.subspaces.len()
    }

    /// Encodes a residual into one code per sub-space.
    #[must_use]
    pub fn encode(&self, residual: &[f32]) -> Vec<u8> {
        self.subspaces
            .iter()
            .map(|s| s.nearest(&residual[s.start..s.start + s.len]))
            .collect()
    }

    /// Encodes many residuals in parallel.
    #[must_use]
    pub fn encode_batch(&self, residuals: &[Vec<f32>]) -> Vec<Vec<u8>> {
        residuals.par_iter().map(|r| self.encode(r)).collect()
    }

    /// Reconstructs an approximate residual from codes.
    #[must_use]
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        let mut out = vec![0.0; self.dimension];
        for (s, &code) in self.subspaces.iter().zip(codes) {
            out[s.start..s.start + s.len].copy_from_slice(s.codeword(code as usize));
        }
        out
    }

    /// Builds the lookup table for scanning one partition.
    ///
    /// `query` is in index space (unit-normalized for cosine tables).
    #[must_use]
    pub fn distance_table(&self, metric: Metric, query: &[f32], centroid: &[f32]) -> DistanceTable {
        let mut table = Vec::with_capacity(self.subspaces.len() * MAX_CODEWORDS);
        let mut strides = Vec::with_capacity(self.subspaces.len());

        let offset = match metric {
            Metric::L2 => 0.0,
            Metric::Cosine => 1.0 - distance::dot(query, centroid),
            Metric::Dot => -distance::dot(query, centroid),
        };

        for s in &self.subspaces {
            strides.push(table.len());
            let q_sub = &query[s.start..s.start + s.len];
            let c_sub = &centroid[s.start..s.start + s.len];
            for code in 0..s.count() {
                let cw = s.codeword(code);
                let entry = match metric {
                    // || (q - c) - r ||^2 over this sub-space
                    Metric::L2 => q_sub
                        .iter()
                        .zip(c_sub)
                        .zip(cw)
                        .map(|((q, c), r)| {
                            let d = q - c - r;
                            d * d
                        })
                        .sum(),
                    // -(q . r); the centroid term is folded into the offset
                    Metric::Cosine | Metric::Dot => -distance::dot(q_sub, cw),
                };
                table.push(entry);
            }
        }

        DistanceTable {
            table,
            strides,
            offset,
        }
    }
}

/// Per-query, per-partition lookup table of partial distances.
#[derive(Debug, Clone)]
pub struct DistanceTable {
    table: Vec<f32>,
    strides: Vec<usize>,
    offset: f32,
}

impl DistanceTable {
    /// Approximate distance of an encoded residual.
    #[inline]
    #[must_use]
    pub fn distance(&self, codes: &[u8]) -> f32 {
        self.offset
            + self
                .strides
                .iter()
                .zip(codes)
                .map(|(&base, &code)| self.table[base + code as usize])
                .sum::<f32>()
    }
}

/// Splits `dimension` into `parts` contiguous `(start, len)` ranges.
pub(crate) fn subspace_bounds(dimension: usize, parts: usize) -> Vec<(usize, usize)> {
    let base = dimension / parts;
    let extra = dimension % parts;
    let mut start = 0;
    (0..parts)
        .map(|i| {
            let len = base + usize::from(i < extra);
            let range = (start, len);
            start += len;
            range
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_subspace_bounds_cover_dimension() {
        assert_eq!(subspace_bounds(8, 4), vec![(0, 2), (2, 2), (4, 2), (6, 2)]);
        assert_eq!(subspace_bounds(10, 3), vec![(0, 4), (4, 3), (7, 3)]);
        let total: usize = subspace_bounds(128, 7).iter().map(|(_, l)| l).sum();
        assert_eq!(total, 128);
    }

    #[test]
    fn test_rejects_invalid_sub_vector_count() {
        let data = random_vectors(10, 4, 1);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(ProductQuantizer::train(&data, 4, 0, &mut rng).is_err());
        assert!(ProductQuantizer::train(&data, 4, 5, &mut rng).is_err());
    }

    #[test]
    fn test_small_training_set_is_lossless() {
        // Fewer points than codewords: every point becomes a codeword.
        let data = random_vectors(20, 8, 2);
        let mut rng = StdRng::seed_from_u64(2);
        let pq = ProductQuantizer::train(&data, 8, 4, &mut rng).unwrap();
        assert_eq!(pq.num_sub_vectors(), 4);

        for v in &data {
            let codes = pq.encode(v);
            assert_eq!(codes.len(), 4);
            let decoded = pq.decode(&codes);
            assert!(distance::l2_squared(v, &decoded) < 1e-6);
        }
    }

    #[test]
    fn test_l2_table_matches_reconstruction() {
        let data = random_vectors(300, 12, 3);
        let mut rng = StdRng::seed_from_u64(3);
        let pq = ProductQuantizer::train(&data, 12, 3, &mut rng).unwrap();

        let centroid = vec![0.1; 12];
        let query = random_vectors(1, 12, 4).remove(0);
        let table = pq.distance_table(Metric::L2, &query, &centroid);

        for v in data.iter().take(20) {
            let codes = pq.encode(v);
            let recon: Vec<f32> = pq
                .decode(&codes)
                .iter()
                .zip(&centroid)
                .map(|(r, c)| r + c)
                .collect();
            let expected = distance::l2_squared(&query, &recon);
            assert!((table.distance(&codes) - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn test_dot_table_matches_reconstruction() {
        let data = random_vectors(100, 6, 5);
        let mut rng = StdRng::seed_from_u64(5);
        let pq = ProductQuantizer::train(&data, 6, 2, &mut rng).unwrap();

        let centroid = vec![0.2, -0.1, 0.0, 0.3, 0.1, -0.2];
        let query = random_vectors(1, 6, 6).remove(0);
        let table = pq.distance_table(Metric::Dot, &query, &centroid);

        let codes = pq.encode(&data[0]);
        let recon: Vec<f32> = pq
            .decode(&codes)
            .iter()
            .zip(&centroid)
            .map(|(r, c)| r + c)
            .collect();
        let expected = -distance::dot(&query, &recon);
        assert!((table.distance(&codes) - expected).abs() < 1e-4);
    }
}
