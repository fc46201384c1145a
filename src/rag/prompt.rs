//! Turns retrieved notes and the conversation into a single model input.

use super::retriever::{Relevance, DEFAULT_MIN_SIMILARITY};
use crate::llm::Message;
use crate::store::QueryResult;

const INSTRUCTION: &str = "You are an AI assistant helping a user with their notes. \
Use the following context to answer the user's question.";

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    min_similarity: f32,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self {
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }
}

impl PromptAssembler {
    pub fn new(min_similarity: f32) -> Self {
        Self { min_similarity }
    }

    /// Builds the prompt. Pure: identical inputs give byte-identical output.
    ///
    /// The question is the content of the last message; an empty history
    /// yields an empty question.
    pub fn assemble(&self, messages: &[Message], retrieved: &[QueryResult]) -> String {
        let context = self.format_context(retrieved);
        let question = messages
            .last()
            .map(|message| message.content.as_str())
            .unwrap_or_default();

        format!(
            "{INSTRUCTION}\n\nContext:\n{context}\n\nUser's Question:\n{question}\n\nAnswer:"
        )
    }

    fn format_context(&self, retrieved: &[QueryResult]) -> String {
        let mut relevant: Vec<&QueryResult> = retrieved
            .iter()
            .filter(|result| result.similarity > self.min_similarity)
            .collect();
        relevant.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));

        relevant
            .iter()
            .map(|result| {
                format!(
                    "Note title: {} - {}:\n\n{}",
                    result.metadata.title,
                    Relevance::classify(result.similarity),
                    result.document
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
