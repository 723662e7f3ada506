//! Hand-off point to an external answer generator.

use async_trait::async_trait;

use crate::error::RagResult;
use crate::rag::context::AssembledContext;

/// Produces an answer from a question and its assembled context.
///
/// The store treats implementations as opaque: typically an LLM client.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, question: &str, context: &AssembledContext) -> RagResult<String>;
}

/// Default prompt layout for backends that take a single prompt string.
#[must_use]
pub fn build_prompt(question: &str, context: &AssembledContext) -> String {
    if context.is_empty() {
        return format!(
            "No reference material was found.\n\nQuestion: {question}\nAnswer:"
        );
    }
    format!(
        "Answer the question using only the reference material below. \
         Cite sources by their [n] number.\n\n{}\n\nQuestion: {question}\nAnswer:",
        context.prompt
    )
}
