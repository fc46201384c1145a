use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::core::errors::RagError;
use crate::store::{QueryResult, VectorStore};

/// Results at or below this similarity are never handed to the model.
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.2;

/// Relevance band of a similarity score, used when presenting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Relevance {
    HighlyRelevant,
    Relevant,
    SlightlyRelevant,
    NotRelevant,
}

impl Relevance {
    pub fn classify(similarity: f32) -> Self {
        if similarity > 0.6 {
            Relevance::HighlyRelevant
        } else if similarity > 0.4 {
            Relevance::Relevant
        } else if similarity > 0.2 {
            Relevance::SlightlyRelevant
        } else {
            Relevance::NotRelevant
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Relevance::HighlyRelevant => "Highly relevant",
            Relevance::Relevant => "Relevant",
            Relevance::SlightlyRelevant => "Slightly relevant",
            Relevance::NotRelevant => "Not relevant",
        }
    }
}

impl fmt::Display for Relevance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    min_similarity: f32,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self::with_min_similarity(store, DEFAULT_MIN_SIMILARITY)
    }

    pub fn with_min_similarity(store: Arc<dyn VectorStore>, min_similarity: f32) -> Self {
        Self {
            store,
            min_similarity: min_similarity.clamp(-1.0, 1.0),
        }
    }

    pub fn min_similarity(&self) -> f32 {
        self.min_similarity
    }

    /// Up to `n_results` notes for `question`, most similar first, with
    /// everything at or below the relevance floor removed.
    pub async fn retrieve(
        &self,
        question: &str,
        n_results: usize,
    ) -> Result<Vec<QueryResult>, RagError> {
        let results = self.store.query(question, n_results).await?;
        let total = results.len();
        let relevant: Vec<QueryResult> = results
            .into_iter()
            .filter(|result| result.similarity > self.min_similarity)
            .collect();

        tracing::debug!(
            "Retrieved {} of {} candidates above similarity {}",
            relevant.len(),
            total,
            self.min_similarity
        );
        Ok(relevant)
    }
}
