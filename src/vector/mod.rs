//! Vector storage, indexing and search.
//!
//! # Architecture
//! Each tenant table is a [`RecordStore`] (memory-mapped vector column plus
//! JSON-lines metadata) and an optional [`IvfPqIndex`] persisted next to it.
//! The index partitions vectors with K-means and stores product-quantized
//! residuals per partition. [`search`] probes the nearest partitions, ranks
//! candidates by approximate distance and re-ranks a shortlist exactly.

mod clustering;
mod codec;
pub mod distance;
pub mod embedding;
pub mod filter;
pub mod index;
mod quantization;
pub mod search;
pub mod storage;
mod types;

pub use clustering::{ClusteringError, KMeansParams, KMeansResult, kmeans_clustering};
pub use embedding::{
    EmbeddingBackend, EmbeddingGenerator, HashEmbeddingGenerator, VECTOR_DIMENSION_384,
    create_generator,
};
#[cfg(feature = "fastembed")]
pub use embedding::FastEmbedGenerator;
pub use filter::{FilterClause, FilterCondition, FilterOperator, Metadata, MetadataValue};
pub use index::{IndexParams, IvfPqIndex, Partition};
pub use quantization::{DistanceTable, ProductQuantizer};
pub use search::{DEFAULT_NPROBES, SearchBudget, SearchParams, search};
pub use storage::{AppendMark, NewRecord, RecordStore};
pub use types::{Metric, Neighbor, PartitionId, RecordId, VectorDimension};
