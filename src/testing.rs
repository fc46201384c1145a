//! Controllable model fakes shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::errors::{Component, RagError};
use crate::core::progress::{LoadProgress, ProgressFn};
use crate::embedding::EmbeddingProvider;
use crate::llm::GenerationBackend;
use crate::speech::{RecognizedWord, SpeechRecognizer};

/// Embedder with vectors assigned per text. Unknown text embeds to all zeros.
pub struct FakeEmbedder {
    dimension: usize,
    model: String,
    delay: Duration,
    loaded: AtomicBool,
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: "fake".to_string(),
            delay: Duration::ZERO,
            loaded: AtomicBool::new(true),
            vectors: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn unloaded(dimension: usize) -> Self {
        let embedder = Self::new(dimension);
        embedder.loaded.store(false, Ordering::SeqCst);
        embedder
    }

    pub fn with_model_id(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Every `embed` call sleeps this long first.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_vector(self, text: &str, vector: Vec<f32>) -> Self {
        self.set_vector(text, vector);
        self
    }

    pub fn set_vector(&self, text: &str, vector: Vec<f32>) {
        self.vectors
            .lock()
            .unwrap()
            .insert(text.to_string(), vector);
    }

    pub fn fail_on(&self, text: &str) {
        self.failing.lock().unwrap().insert(text.to_string());
    }

    pub fn recover(&self, text: &str) {
        self.failing.lock().unwrap().remove(text);
    }

    pub fn into_provider(self) -> Arc<dyn EmbeddingProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn name(&self) -> &str {
        "fake"
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        on_progress(LoadProgress::new(Component::Embedding, 1.0, "loaded"));
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(RagError::Embedding("model not loaded".to_string()));
        }
        if self.failing.lock().unwrap().contains(text) {
            return Err(RagError::Embedding(format!("cannot embed '{}'", text)));
        }
        Ok(self
            .vectors
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_else(|| vec![0.0; self.dimension]))
    }
}

/// Generation backend that replays scripted tokens.
///
/// With a token delay the producer paces itself so tests can interrupt
/// mid-stream.
pub struct ScriptedBackend {
    tokens: Vec<String>,
    delay: Duration,
    fail_load: AtomicBool,
    fail_after: Mutex<Option<usize>>,
    streams_started: AtomicUsize,
    producer_stopped: Arc<AtomicBool>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(tokens: &[&str]) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            delay: Duration::ZERO,
            fail_load: AtomicBool::new(false),
            fail_after: Mutex::new(None),
            streams_started: AtomicUsize::new(0),
            producer_stopped: Arc::new(AtomicBool::new(false)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_load(self) -> Self {
        self.fail_load.store(true, Ordering::SeqCst);
        self
    }

    pub fn set_load_failure(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Emit an error item after `n` tokens on the next streams.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    pub fn streams_started(&self) -> usize {
        self.streams_started.load(Ordering::SeqCst)
    }

    pub fn producer_stopped(&self) -> bool {
        self.producer_stopped.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        on_progress(LoadProgress::new(Component::Generation, 0.5, "warming up"));
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(RagError::load(Component::Generation, "weights missing"));
        }
        on_progress(LoadProgress::new(Component::Generation, 1.0, "ready"));
        Ok(())
    }

    async fn stream(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
        self.streams_started.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.producer_stopped.store(false, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(4);
        let tokens = self.tokens.clone();
        let delay = self.delay;
        let fail_after = *self.fail_after.lock().unwrap();
        let stopped = self.producer_stopped.clone();

        tokio::spawn(async move {
            for (index, token) in tokens.into_iter().enumerate() {
                if fail_after == Some(index) {
                    let _ = tx
                        .send(Err(RagError::Generation("backend crashed".to_string())))
                        .await;
                    break;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(Ok(token)).await.is_err() {
                    break;
                }
            }
            stopped.store(true, Ordering::SeqCst);
        });

        Ok(rx)
    }
}

/// Recognizer that returns one scripted hypothesis per decode call.
/// Once the script runs out the last hypothesis repeats.
pub struct ScriptedRecognizer {
    hypotheses: Mutex<VecDeque<Vec<RecognizedWord>>>,
    last: Mutex<Vec<RecognizedWord>>,
    fail_load: AtomicBool,
    decodes: AtomicUsize,
    window_lengths: Mutex<Vec<usize>>,
}

impl ScriptedRecognizer {
    /// Each hypothesis is a list of `(word, end_seconds)`.
    pub fn new(hypotheses: Vec<Vec<(&str, f32)>>) -> Self {
        let hypotheses = hypotheses
            .into_iter()
            .map(|words| {
                words
                    .into_iter()
                    .map(|(text, end)| RecognizedWord {
                        text: text.to_string(),
                        start: (end - 0.3).max(0.0),
                        end,
                    })
                    .collect()
            })
            .collect();
        Self {
            hypotheses: Mutex::new(hypotheses),
            last: Mutex::new(Vec::new()),
            fail_load: AtomicBool::new(false),
            decodes: AtomicUsize::new(0),
            window_lengths: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_load(self) -> Self {
        self.fail_load.store(true, Ordering::SeqCst);
        self
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn window_lengths(&self) -> Vec<usize> {
        self.window_lengths.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(RagError::load(Component::Transcription, "no model"));
        }
        on_progress(LoadProgress::new(Component::Transcription, 1.0, "ready"));
        Ok(())
    }

    async fn transcribe(
        &self,
        samples: &[f32],
        _sample_rate: u32,
    ) -> Result<Vec<RecognizedWord>, RagError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);
        self.window_lengths.lock().unwrap().push(samples.len());
        let next = self.hypotheses.lock().unwrap().pop_front();
        match next {
            Some(words) => {
                *self.last.lock().unwrap() = words.clone();
                Ok(words)
            }
            None => Ok(self.last.lock().unwrap().clone()),
        }
    }
}
