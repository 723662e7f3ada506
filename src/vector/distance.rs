//! Exact distance kernels.
//!
//! Every metric is expressed as a distance where smaller means closer, so
//! one ascending sort ranks results regardless of metric.

use crate::vector::types::Metric;

/// Epsilon for floating-point norm comparisons.
pub(crate) const EPSILON: f32 = 1e-10;

/// Computes the exact distance between two equal-length vectors.
#[inline]
pub fn distance(metric: Metric, a: &[f32], b: &[f32]) -> f32 {
    match metric {
        Metric::L2 => l2_squared(a, b),
        Metric::Cosine => 1.0 - cosine_similarity(a, b),
        Metric::Dot => -dot(a, b),
    }
}

/// Squared Euclidean distance.
#[inline]
pub fn l2_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Computes cosine similarity in `[-1, 1]`; zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = norm(a);
    let norm_b = norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot(a, b) / (norm_a * norm_b)
    }
}

#[inline]
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalizes a vector in-place to unit length.
///
/// Vectors with a near-zero norm are left as they are.
pub fn normalize(vector: &mut [f32]) {
    let n = norm(vector);
    if n > EPSILON {
        for value in vector.iter_mut() {
            *value /= n;
        }
    }
}

/// Creates a normalized copy of a vector.
pub fn normalized(vector: &[f32]) -> Vec<f32> {
    let mut copy = vector.to_vec();
    normalize(&mut copy);
    copy
}
