//! Vector store for note embeddings.
//!
//! One entry per note id, holding the embedding of the note text, the text
//! itself and display metadata. Queries rank every entry by cosine
//! similarity; callers rely only on the ordered-result contract, so an
//! approximate index can replace the full scan without touching them.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::errors::RagError;
use crate::embedding::EmbeddingProvider;

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// Display metadata stored next to each embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteMetadata {
    pub title: String,
}

impl NoteMetadata {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }
}

/// One ranked hit. Built per query, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id: String,
    pub document: String,
    pub metadata: NoteMetadata,
    /// Cosine similarity in [-1, 1].
    pub similarity: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Provider used to embed inserted text and query text.
    fn embedder(&self) -> &Arc<dyn EmbeddingProvider>;

    /// Embed `text` and replace any existing entry for `id`.
    async fn upsert(&self, id: &str, text: &str, metadata: NoteMetadata) -> Result<(), RagError>;

    /// Remove the entry for `id`. Returns whether one existed.
    async fn delete(&self, id: &str) -> Result<bool, RagError>;

    /// Top `k` entries for a precomputed query vector, most similar first.
    /// Equal scores keep insertion order.
    async fn query_embedding(&self, vector: &[f32], k: usize)
        -> Result<Vec<QueryResult>, RagError>;

    async fn count(&self) -> Result<usize, RagError>;

    /// Drop every entry, e.g. before re-embedding with a new model.
    async fn clear(&self) -> Result<(), RagError>;

    /// Top `k` entries for `text`, most similar first.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<QueryResult>, RagError> {
        ensure_k(k)?;
        let vector = self.embedder().embed(text).await?;
        self.query_embedding(&vector, k).await
    }
}

pub(crate) fn ensure_k(k: usize) -> Result<(), RagError> {
    if k == 0 {
        return Err(RagError::InvalidArgument(
            "result count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn ensure_dimension(expected: usize, vector: &[f32]) -> Result<(), RagError> {
    if vector.len() != expected {
        return Err(RagError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_k_is_rejected() {
        assert!(matches!(ensure_k(0), Err(RagError::InvalidArgument(_))));
        assert!(ensure_k(1).is_ok());
    }

    #[test]
    fn dimension_check_reports_both_sizes() {
        let err = ensure_dimension(3, &[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }
}
