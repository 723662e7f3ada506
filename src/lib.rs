//! Multi-tenant embedding store with a partitioned, product-quantized ANN
//! index and a retrieval pipeline on top.

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod rag;
pub mod tenant;
pub mod vector;

// Explicit exports for better API clarity
pub use cache::{CacheKey, CacheStats, QueryCache, SharedResources};
pub use config::Settings;
pub use error::{RagError, RagResult};
pub use rag::{
    Answer, AssembledContext, ContextAssembler, Document, GenerationBackend, IngestReport,
    QueryOptions, QueryResult, RagOrchestrator, RetrievedRecord, TableState, TableStats,
    TenantTable,
};
pub use tenant::{NamespaceRoot, TenantId, TenantNamespace};
pub use vector::{
    EmbeddingGenerator, FilterClause, FilterCondition, FilterOperator, IvfPqIndex, Metadata,
    MetadataValue, Metric, Neighbor, NewRecord, RecordId, SearchBudget, SearchParams,
    VectorDimension,
};
