//! Error types for the embedding store.
//!
//! Every public operation returns either a success value or one tagged
//! [`RagError`] kind. Validation errors are surfaced immediately; transient
//! storage and embedding failures are retried by the orchestrator before
//! they surface as `IngestFailed` or `SearchTimeout`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for store, index, search and pipeline operations.
#[derive(Error, Debug)]
pub enum RagError {
    /// Embedding length differs from the table dimension.
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    /// NaN or infinite component in an embedding or query vector.
    #[error("Vector component {position} is not a finite number")]
    NonFiniteComponent { position: usize },

    #[error("Invalid tenant id '{id}': {reason}")]
    InvalidTenantId { id: String, reason: &'static str },

    /// Too few records to build the requested partition count.
    #[error(
        "Insufficient data to build index: {records} records for {partitions} partitions\nSuggestion: Ingest more records or lower index.num_partitions"
    )]
    InsufficientData { records: usize, partitions: usize },

    #[error("Invalid metadata filter: {0}")]
    InvalidFilter(String),

    /// Any failure inside the all-or-nothing embed + write unit.
    #[error("Ingest into tenant '{tenant}' failed: {reason}")]
    IngestFailed { tenant: String, reason: String },

    #[error("Search timed out after {elapsed_ms}ms")]
    SearchTimeout { elapsed_ms: u64 },

    #[error("Index build timed out after {elapsed_ms}ms")]
    BuildTimeout { elapsed_ms: u64 },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Storage error at '{path}': {source}")]
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Storage file '{path}' is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    Embedding(String),

    /// The answer-generation backend failed.
    #[error("Answer generation failed: {0}")]
    Generation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl RagError {
    /// Builds a `Storage` error for `path`.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Builds a `Corrupted` error for `path`.
    pub fn corrupted(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::NonFiniteComponent { .. } => "NON_FINITE_COMPONENT",
            Self::InvalidTenantId { .. } => "INVALID_TENANT_ID",
            Self::InsufficientData { .. } => "INSUFFICIENT_DATA",
            Self::InvalidFilter(_) => "INVALID_FILTER",
            Self::IngestFailed { .. } => "INGEST_FAILED",
            Self::SearchTimeout { .. } => "SEARCH_TIMEOUT",
            Self::BuildTimeout { .. } => "BUILD_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Storage { .. } => "STORAGE_ERROR",
            Self::Corrupted { .. } => "CORRUPTED",
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::Generation(_) => "GENERATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether a retry with backoff may succeed.
    ///
    /// Validation errors are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Storage { .. } | Self::Embedding(_) | Self::SearchTimeout { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::NonFiniteComponent { .. } => vec![
                "Check the embedding backend for overflow or division by zero",
            ],
            Self::InvalidTenantId { .. } => vec![
                "Tenant ids may only contain ASCII letters, digits, '-' and '_'",
            ],
            Self::InsufficientData { .. } => vec![
                "Queries keep working through an exhaustive scan until enough records exist",
                "Lower index.num_partitions for small tables",
            ],
            Self::IngestFailed { .. } => vec![
                "No records from the failed batch were written, the batch can be retried as a whole",
                "Check the embedding backend and disk space",
            ],
            Self::SearchTimeout { .. } => vec![
                "Lower nprobes or refine_factor, or raise search.timeout_ms",
                "Enable search.best_effort to accept partial candidate sets",
            ],
            Self::Corrupted { .. } => vec![
                "Run 'ragdb rebuild <tenant>' to regenerate the index from raw records",
            ],
            Self::Storage { .. } => vec![
                "Check disk space and file permissions in the data directory",
            ],
            _ => vec![],
        }
    }
}

/// Result type alias for store operations
pub type RagResult<T> = Result<T, RagError>;
