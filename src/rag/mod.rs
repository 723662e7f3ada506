//! Retrieval pipeline: tenant tables, the orchestrator driving ingest and
//! query, and context assembly for answer generation.

pub mod context;
pub mod generation;
pub mod orchestrator;
pub mod table;

pub use context::{
    AssembledContext, ContextAssembler, ContextEntry, RetrievedRecord, SOURCE_KEY, TEXT_KEY,
};
pub use generation::{GenerationBackend, build_prompt};
pub use orchestrator::{
    Answer, Document, IngestReport, QueryOptions, QueryResult, RagOrchestrator,
};
pub use table::{AppendOutcome, RebuildPolicy, TableState, TableStats, TenantTable};
