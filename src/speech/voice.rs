//! Dictation: an audio source and a transcription session started and
//! stopped together.

use std::sync::Arc;

use async_trait::async_trait;

use super::engine::{TranscriptStream, TranscriptionEngine};
use super::ingest::AudioSink;
use crate::core::errors::RagError;

/// Microphone (or any PCM producer) with its own start/stop.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Begin pushing buffers into `sink`. Must not block on the consumer.
    async fn start(&self, sink: AudioSink) -> Result<(), RagError>;

    async fn stop(&self);
}

pub struct VoiceInput {
    source: Arc<dyn AudioSource>,
    engine: TranscriptionEngine,
}

impl VoiceInput {
    pub fn new(source: Arc<dyn AudioSource>, engine: TranscriptionEngine) -> Self {
        Self { source, engine }
    }

    /// Opens the session, then starts the source feeding it.
    pub async fn start(&self) -> Result<TranscriptStream, RagError> {
        let stream = self.engine.start_stream()?;
        if let Err(err) = self.source.start(self.engine.audio_sink()).await {
            tracing::error!("Audio source failed to start: {}", err);
            drop(stream);
            return Err(err);
        }
        Ok(stream)
    }

    pub async fn stop(&self) {
        self.source.stop().await;
        self.engine.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::core::progress::ignore_progress;
    use crate::speech::engine::StreamSettings;
    use crate::testing::ScriptedRecognizer;

    struct BurstSource {
        buffers: usize,
        fail: bool,
        running: AtomicBool,
    }

    #[async_trait]
    impl AudioSource for BurstSource {
        async fn start(&self, sink: AudioSink) -> Result<(), RagError> {
            if self.fail {
                return Err(RagError::Transcription("microphone unavailable".to_string()));
            }
            self.running.store(true, Ordering::SeqCst);
            for _ in 0..self.buffers {
                sink.push(vec![0.0; 100]);
            }
            Ok(())
        }

        async fn stop(&self) {
            self.running.store(false, Ordering::SeqCst);
        }
    }

    async fn engine() -> TranscriptionEngine {
        let recognizer = ScriptedRecognizer::new(vec![
            vec![("note", 0.05)],
            vec![("note", 0.05), ("this", 0.10)],
        ]);
        let engine = TranscriptionEngine::new(
            Arc::new(recognizer),
            StreamSettings {
                sample_rate: 1_000,
                step: Duration::from_millis(100),
                max_window: Duration::from_secs(30),
            },
            8,
        );
        engine.load(&ignore_progress).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn start_and_stop_together() {
        let engine = engine().await;
        let source = Arc::new(BurstSource {
            buffers: 2,
            fail: false,
            running: AtomicBool::new(false),
        });
        let voice = VoiceInput::new(source.clone(), engine.clone());

        let mut stream = voice.start().await.unwrap();
        assert!(source.running.load(Ordering::SeqCst));

        stream.next().await.unwrap().unwrap();
        let update = stream.next().await.unwrap().unwrap();
        assert_eq!(update.committed, "note");
        assert_eq!(update.text(), "note this");

        voice.stop().await;
        assert!(!source.running.load(Ordering::SeqCst));
        assert!(stream.next().await.is_none());
        assert!(!engine.is_streaming());
    }

    #[tokio::test]
    async fn source_failure_releases_the_session() {
        let engine = engine().await;
        let voice = VoiceInput::new(
            Arc::new(BurstSource {
                buffers: 0,
                fail: true,
                running: AtomicBool::new(false),
            }),
            engine.clone(),
        );

        assert!(voice.start().await.is_err());
        assert!(!engine.is_streaming());
    }
}
