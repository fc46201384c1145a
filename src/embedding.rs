//! Embedding provider seam.
//!
//! The vector store embeds note text on insert and the retriever embeds the
//! question on query; both go through this trait so the concrete model stays
//! swappable.

use async_trait::async_trait;

use crate::core::errors::RagError;
use crate::core::progress::ProgressFn;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logs (e.g. "llama_server").
    fn name(&self) -> &str;

    /// Identifies the model behind the vectors. Stores drop persisted vectors
    /// when it changes.
    fn model_id(&self) -> &str {
        self.name()
    }

    /// Length of every vector returned by `embed`.
    fn dimension(&self) -> usize;

    /// Acquire model resources. Must succeed before the first `embed`.
    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError>;

    /// Embed one text. Fails with `RagError::Embedding` when no vector can be produced.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError>;
}
