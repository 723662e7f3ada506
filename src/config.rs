//! Configuration module for the embedding store.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.ragdb/settings.toml`, searched upward)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `RAGDB_` and use double
//! underscores to separate nested levels:
//! - `RAGDB_INDEX__NUM_PARTITIONS=32` sets `index.num_partitions`
//! - `RAGDB_SEARCH__NPROBES=8` sets `search.nprobes`
//! - `RAGDB_CACHE__CAPACITY=0` disables the query cache

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, RagResult};
use crate::vector::{EmbeddingBackend, IndexParams, Metric};

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".ragdb";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Base directory of all tenant namespaces
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Number of K-means partitions
    #[serde(default = "default_num_partitions")]
    pub num_partitions: usize,

    /// Product-quantization sub-vectors per embedding
    #[serde(default = "default_num_sub_vectors")]
    pub num_sub_vectors: usize,

    #[serde(default)]
    pub metric: Metric,

    /// Seed of the K-means and codebook training. Omitted from a config
    /// file it falls back to 42, so builds are reproducible unless a
    /// caller sets `None` in code to draw one per build.
    #[serde(default = "default_seed", skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Unindexed records that trigger a rebuild during ingest
    #[serde(default = "default_rebuild_threshold")]
    pub rebuild_threshold: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rebuild_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_nprobes")]
    pub nprobes: usize,

    #[serde(default = "default_refine_factor")]
    pub refine_factor: usize,

    #[serde(default = "default_k")]
    pub k: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Rank partial candidates on timeout instead of failing
    #[serde(default)]
    pub best_effort: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum cached queries; 0 disables the cache
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IngestConfig {
    /// Retries of a transient embedding or storage failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First retry delay; doubled per attempt
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ContextConfig {
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,

    #[serde(default = "default_true")]
    pub include_citations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub backend: EmbeddingBackend,

    /// Output dimension of the hash backend
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
}

// Default value functions
fn default_version() -> u32 {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".ragdb/data")
}

fn default_true() -> bool {
    true
}

fn default_num_partitions() -> usize {
    16
}

fn default_num_sub_vectors() -> usize {
    8
}

fn default_seed() -> Option<u64> {
    Some(42)
}

fn default_rebuild_threshold() -> usize {
    256
}

fn default_nprobes() -> usize {
    crate::vector::DEFAULT_NPROBES
}

fn default_refine_factor() -> usize {
    1
}

fn default_k() -> usize {
    5
}

fn default_cache_capacity() -> usize {
    1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_max_context_chars() -> usize {
    4000
}

fn default_embedding_dimension() -> usize {
    crate::vector::VECTOR_DIMENSION_384
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            debug: false,
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            cache: CacheConfig::default(),
            ingest: IngestConfig::default(),
            context: ContextConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            num_partitions: default_num_partitions(),
            num_sub_vectors: default_num_sub_vectors(),
            metric: Metric::default(),
            seed: default_seed(),
            rebuild_threshold: default_rebuild_threshold(),
            rebuild_timeout_ms: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            nprobes: default_nprobes(),
            refine_factor: default_refine_factor(),
            k: default_k(),
            timeout_ms: None,
            best_effort: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            embed_timeout_ms: None,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_chars: default_max_context_chars(),
            include_citations: true,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::default(),
            dimension: default_embedding_dimension(),
        }
    }
}

impl IndexConfig {
    /// Build parameters with an optional deadline derived from
    /// `rebuild_timeout_ms`.
    #[must_use]
    pub fn params(&self) -> IndexParams {
        IndexParams {
            num_partitions: self.num_partitions,
            num_sub_vectors: self.num_sub_vectors,
            metric: self.metric,
            seed: self.seed,
            deadline: self
                .rebuild_timeout_ms
                .map(|ms| Instant::now() + Duration::from_millis(ms)),
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl IngestConfig {
    #[must_use]
    pub fn embed_timeout(&self) -> Option<Duration> {
        self.embed_timeout_ms.map(Duration::from_millis)
    }

    /// Delay before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still layering env vars
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore (__) separates nested levels
            .merge(Env::prefixed("RAGDB_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by looking for a `.ragdb` directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join("settings.toml"))
    }

    /// Rejects values the store can not run with.
    pub fn validate(&self) -> RagResult<()> {
        let invalid = |msg: &str| Err(RagError::Config(msg.to_string()));
        if self.index.num_partitions == 0 {
            return invalid("index.num_partitions must be at least 1");
        }
        if self.index.num_sub_vectors == 0 {
            return invalid("index.num_sub_vectors must be at least 1");
        }
        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be at least 1");
        }
        if self.search.k == 0 {
            return invalid("search.k must be at least 1");
        }
        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        Self::init_config_file_in(Path::new("."), force)
    }

    /// Same as [`Settings::init_config_file`] rooted at `dir`.
    pub fn init_config_file_in(
        dir: &Path,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = dir.join(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = r#"# ragdb Configuration File

# Version of the configuration schema
version = 1

# Base directory of tenant namespaces (one sub-directory per tenant)
data_dir = ".ragdb/data"

# Global debug mode
debug = false

[index]
# K-means partitions per tenant index
num_partitions = 16
# Product-quantization sub-vectors per embedding
num_sub_vectors = 8
# Distance metric: "l2", "cosine" or "dot"
metric = "l2"
# Seed of index training; builds are reproducible and an omitted seed means 42
seed = 42
# Unindexed records that trigger an automatic rebuild during ingest
rebuild_threshold = 256
# rebuild_timeout_ms = 30000

[search]
# Partitions probed per query (clamped to the partition count)
nprobes = 20
# Shortlist multiplier for exact re-ranking (1 = no refinement)
refine_factor = 1
# Results per query
k = 5
# timeout_ms = 500
# Rank partial candidates on timeout instead of failing
best_effort = false

[cache]
# Cached query results (0 disables the cache)
capacity = 1024

[ingest]
max_retries = 3
# First retry delay in milliseconds, doubled per attempt
retry_backoff_ms = 50
# embed_timeout_ms = 10000

[context]
max_context_chars = 4000
include_citations = true

[embedding]
# "hash" (offline, deterministic) or "fastembed" (requires the fastembed feature)
backend = "hash"
dimension = 384
"#;

        std::fs::write(&config_path, template)?;
        Ok(config_path)
    }
}
