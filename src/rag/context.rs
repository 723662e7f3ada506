//! Context assembly for the generation hand-off.
//!
//! Turns ranked hits into an ordered, deduplicated list and a prompt block
//! bounded by a character budget, with optional numbered citations.

use std::collections::HashSet;

use serde::Serialize;

use crate::config::ContextConfig;
use crate::vector::{Metadata, MetadataValue, RecordId};

/// Reserved metadata key holding the ingested document text.
pub const TEXT_KEY: &str = "text";

/// Metadata key used as the citation source when present.
pub const SOURCE_KEY: &str = "source";

/// Bytes of formatting added around each block.
const BLOCK_OVERHEAD: usize = 50;

/// A search hit resolved to its stored text and metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedRecord {
    pub id: RecordId,
    pub distance: f32,
    pub text: Option<String>,
    /// Metadata without the reserved text key.
    pub metadata: Metadata,
}

impl RetrievedRecord {
    /// Citation label: the `source` field, or the record id.
    #[must_use]
    pub fn source(&self) -> String {
        match self.metadata.get(SOURCE_KEY) {
            Some(MetadataValue::String(s)) if !s.is_empty() => s.clone(),
            _ => format!("record {}", self.id.get()),
        }
    }
}

/// One entry of the assembled context, in rank order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextEntry {
    /// 1-based citation number.
    pub rank: usize,
    pub id: RecordId,
    pub distance: f32,
    pub source: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssembledContext {
    pub entries: Vec<ContextEntry>,
    pub prompt: String,
}

impl AssembledContext {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct citation sources, sorted.
    #[must_use]
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.entries.iter().map(|e| e.source.clone()).collect();
        sources.sort();
        sources.dedup();
        sources
    }
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_context_chars: usize,
    include_citations: bool,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::from(&ContextConfig::default())
    }
}

impl From<&ContextConfig> for ContextAssembler {
    fn from(config: &ContextConfig) -> Self {
        Self::new(config.max_context_chars, config.include_citations)
    }
}

impl ContextAssembler {
    #[must_use]
    pub fn new(max_context_chars: usize, include_citations: bool) -> Self {
        Self {
            max_context_chars,
            include_citations,
        }
    }

    /// Builds the context from hits already in rank order.
    ///
    /// Hits without text, repeated record ids and repeated texts are skipped.
    /// Stops at the first block that would exceed the character budget, so
    /// the result is always a prefix of the ranking.
    #[must_use]
    pub fn assemble(&self, hits: &[RetrievedRecord]) -> AssembledContext {
        let mut seen_ids = HashSet::new();
        let mut seen_texts = HashSet::new();
        let mut entries = Vec::new();
        let mut prompt = String::new();
        let mut used = 0;

        for hit in hits {
            let Some(text) = hit.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
                continue;
            };
            if !seen_ids.insert(hit.id) || !seen_texts.insert(text) {
                continue;
            }

            let cost = text.chars().count() + BLOCK_OVERHEAD;
            if used + cost > self.max_context_chars {
                break;
            }
            used += cost;

            let rank = entries.len() + 1;
            let source = hit.source();
            if self.include_citations {
                prompt.push_str(&format!(
                    "[{rank}] (source: {source}, distance: {:.4})\n{text}\n\n",
                    hit.distance
                ));
            } else {
                prompt.push_str(text);
                prompt.push_str("\n\n");
            }
            entries.push(ContextEntry {
                rank,
                id: hit.id,
                distance: hit.distance,
                source,
                text: text.to_string(),
            });
        }

        AssembledContext {
            entries,
            prompt: prompt.trim_end().to_string(),
        }
    }
}
