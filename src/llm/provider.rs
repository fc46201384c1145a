use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::errors::RagError;
use crate::core::progress::ProgressFn;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// return the backend name (e.g. "llama_server")
    fn name(&self) -> &str;

    /// acquire model resources, reporting progress as it goes
    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError>;

    /// start producing tokens for `prompt`, in generation order.
    ///
    /// The producer must stop once the receiver is dropped.
    async fn stream(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError>;
}
