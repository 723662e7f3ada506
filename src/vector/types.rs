//! Type-safe wrappers and core types for the vector subsystem.
//!
//! Newtypes keep record ids, partition ids and dimensions from being mixed
//! up with plain integers. Ordering on [`RecordId`] is the deterministic
//! tie-break used everywhere results are ranked.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};

/// Identifier of a record inside one tenant's table.
///
/// Uses `NonZeroU32` so that zero never appears as a valid id; ids are
/// assigned `1..` in insertion order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(NonZeroU32);

impl RecordId {
    /// Creates a new `RecordId`, returning `None` for zero.
    #[must_use]
    pub fn new(id: u32) -> Option<Self> {
        NonZeroU32::new(id).map(Self)
    }

    /// Creates a new `RecordId`, panicking if zero.
    ///
    /// # Panics
    /// Panics if `id` is zero. Use `new()` for fallible construction.
    #[must_use]
    pub fn new_unchecked(id: u32) -> Self {
        Self(NonZeroU32::new(id).expect("RecordId cannot be zero"))
    }

    /// Returns the underlying u32 value.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.0.get()
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.get().to_le_bytes()
    }

    /// Creates from little-endian bytes, returning `None` for zero.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        Self::new(u32::from_le_bytes(bytes))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a partition inside a built index.
///
/// Zero-based because partitions are addressed positionally; lower ids win
/// exact centroid-distance ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionId(u32);

impl PartitionId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed embedding length of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension`, rejecting zero.
    pub fn new(dim: usize) -> RagResult<Self> {
        if dim == 0 {
            return Err(RagError::Config(
                "vector dimension cannot be zero".to_string(),
            ));
        }
        Ok(Self(dim))
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has exactly this dimension and only finite
    /// components.
    ///
    /// Vectors are never truncated or padded.
    pub fn validate_vector(&self, vector: &[f32]) -> RagResult<()> {
        if vector.len() != self.0 {
            return Err(RagError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        match vector.iter().position(|x| !x.is_finite()) {
            Some(position) => Err(RagError::NonFiniteComponent { position }),
            None => Ok(()),
        }
    }
}

/// Distance metric of a table.
///
/// All metrics are expressed as distances: smaller is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// `1 - cosine_similarity`.
    Cosine,
    /// Negated inner product.
    Dot,
}

impl Metric {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::L2 => "l2",
            Self::Cosine => "cosine",
            Self::Dot => "dot",
        }
    }

    pub(crate) const fn to_byte(self) -> u8 {
        match self {
            Self::L2 => 0,
            Self::Cosine => 1,
            Self::Dot => 2,
        }
    }

    pub(crate) const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::L2),
            1 => Some(Self::Cosine),
            2 => Some(Self::Dot),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Self::L2),
            "cosine" => Ok(Self::Cosine),
            "dot" | "inner_product" => Ok(Self::Dot),
            other => Err(RagError::Config(format!(
                "unknown metric '{other}', expected one of: l2, cosine, dot"
            ))),
        }
    }
}

/// One ranked search result: a record id and its exact distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: RecordId,
    pub distance: f32,
}

impl Neighbor {
    #[must_use]
    pub fn new(id: RecordId, distance: f32) -> Self {
        Self { id, distance }
    }

    /// Total order by (distance, id).
    ///
    /// Distances are finite because non-finite vectors are rejected at the
    /// record and query boundary.
    pub fn rank_cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}
