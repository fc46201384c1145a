use async_trait::async_trait;

use super::types::RecognizedWord;
use crate::core::errors::RagError;
use crate::core::progress::ProgressFn;

#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// return the recognizer name (e.g. "whisper_server")
    fn name(&self) -> &str;

    /// acquire model resources, reporting progress as it goes
    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError>;

    /// decode mono PCM samples into timestamped words, in spoken order
    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Vec<RecognizedWord>, RagError>;
}
