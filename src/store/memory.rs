use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::{ensure_dimension, ensure_k, NoteMetadata, QueryResult, VectorStore};
use crate::core::errors::RagError;
use crate::embedding::EmbeddingProvider;
use crate::vector_math::rank_descending_by_cosine;

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    vector: Vec<f32>,
    document: String,
    metadata: NoteMetadata,
}

/// Full-scan store kept in insertion order.
///
/// Replacing an entry keeps its original position, so tie order only changes
/// when a note is deleted and indexed again.
pub struct InMemoryVectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryVectorStore {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries
            .read()
            .map(|entries| entries.iter().any(|entry| entry.id == id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    async fn upsert(&self, id: &str, text: &str, metadata: NoteMetadata) -> Result<(), RagError> {
        // Embed before taking the lock; readers never see a half-built entry.
        let vector = self.embedder.embed(text).await?;
        ensure_dimension(self.embedder.dimension(), &vector)?;

        let entry = Entry {
            id: id.to_string(),
            vector,
            document: text.to_string(),
            metadata,
        };

        let mut entries = self.entries.write().map_err(RagError::internal)?;
        match entries.iter_mut().find(|existing| existing.id == id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        tracing::debug!(note_id = id, total = entries.len(), "Indexed note");
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, RagError> {
        let mut entries = self.entries.write().map_err(RagError::internal)?;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        Ok(entries.len() != before)
    }

    async fn query_embedding(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<QueryResult>, RagError> {
        ensure_k(k)?;
        ensure_dimension(self.embedder.dimension(), vector)?;

        let entries = self.entries.read().map_err(RagError::internal)?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let candidates: Vec<&[f32]> = entries.iter().map(|entry| entry.vector.as_slice()).collect();
        let ranked = rank_descending_by_cosine(vector, &candidates)?;

        Ok(ranked
            .into_iter()
            .take(k)
            .map(|(idx, similarity)| {
                let entry = &entries[idx];
                QueryResult {
                    id: entry.id.clone(),
                    document: entry.document.clone(),
                    metadata: entry.metadata.clone(),
                    similarity,
                }
            })
            .collect())
    }

    async fn count(&self) -> Result<usize, RagError> {
        Ok(self.entries.read().map_err(RagError::internal)?.len())
    }

    async fn clear(&self) -> Result<(), RagError> {
        self.entries.write().map_err(RagError::internal)?.clear();
        Ok(())
    }
}
