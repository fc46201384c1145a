//! The assistant: retrieval, prompt assembly and generation behind one
//! `generate` call, plus the conversation it accumulates.
//!
//! Transcription is loaded alongside generation and exposed through
//! `transcription()`; whether dictation may run during a generation is left
//! to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::try_join3;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::core::config::RagConfig;
use crate::core::errors::{Component, RagError};
use crate::core::progress::ProgressFn;
use crate::embedding::EmbeddingProvider;
use crate::llm::{GenerationEngine, Message};
use crate::rag::{PromptAssembler, Retriever};
use crate::speech::TranscriptionEngine;
use crate::store::{QueryResult, VectorStore};

/// How a `generate` call ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerateOutcome {
    Completed {
        answer: String,
        sources: Vec<QueryResult>,
    },
    /// Not recorded in the conversation.
    Interrupted { partial: String },
}

pub struct RagService {
    embedder: Arc<dyn EmbeddingProvider>,
    retriever: Retriever,
    assembler: PromptAssembler,
    generation: GenerationEngine,
    transcription: TranscriptionEngine,
    n_results: usize,
    embedder_loaded: AtomicBool,
    busy: AtomicBool,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    history: Mutex<Vec<Message>>,
}

impl RagService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        generation: GenerationEngine,
        transcription: TranscriptionEngine,
        config: &RagConfig,
    ) -> Self {
        Self {
            embedder: store.embedder().clone(),
            retriever: Retriever::with_min_similarity(store, config.min_similarity),
            assembler: PromptAssembler::new(config.min_similarity),
            generation,
            transcription,
            n_results: config.n_results.max(1),
            embedder_loaded: AtomicBool::new(false),
            busy: AtomicBool::new(false),
            cancel: Mutex::new(None),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Loads the embedding, generation and transcription models concurrently.
    /// Ready only when all three succeed; a failed load may be retried.
    pub async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        let embedding = async {
            if self.embedder_loaded.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.embedder.load(on_progress).await.map_err(|err| match err {
                RagError::Load { .. } => err,
                other => RagError::load(Component::Embedding, other),
            })?;
            self.embedder_loaded.store(true, Ordering::SeqCst);
            Ok::<(), RagError>(())
        };

        let result = try_join3(
            embedding,
            self.generation.load(on_progress),
            self.transcription.load(on_progress),
        )
        .await;

        match result {
            Ok(_) => {
                tracing::info!("Assistant ready");
                Ok(())
            }
            Err(err) => {
                tracing::error!("Assistant failed to load: {}", err);
                Err(err)
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.readiness().is_ok()
    }

    pub fn is_generating(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Answers `question` from the notes, streaming tokens to `on_token`.
    ///
    /// On completion the question and answer are appended to the history
    /// together. Interrupted or failed generations leave it untouched.
    /// `interrupt()` applies from the moment the call is accepted, including
    /// while the question is still being embedded.
    pub async fn generate<F>(
        &self,
        question: &str,
        mut on_token: F,
    ) -> Result<GenerateOutcome, RagError>
    where
        F: FnMut(&str) + Send,
    {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidArgument("question is empty".to_string()));
        }
        self.readiness()?;

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RagError::ConcurrentGeneration);
        }
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        *self.cancel_slot() = Some(cancel_tx);
        let _busy = BusyGuard {
            busy: &self.busy,
            cancel: &self.cancel,
        };

        let sources = tokio::select! {
            biased;
            _ = &mut cancel_rx => return Ok(interrupted_before_generation("retrieval")),
            sources = self.retriever.retrieve(question, self.n_results) => sources?,
        };
        let user = Message::user(question);
        let prompt = {
            let mut messages = self.history().clone();
            messages.push(user.clone());
            self.assembler.assemble(&messages, &sources)
        };
        tracing::debug!(sources = sources.len(), "Prompt assembled");

        let mut stream = tokio::select! {
            biased;
            _ = &mut cancel_rx => return Ok(interrupted_before_generation("session start")),
            stream = self.generation.stream(&prompt) => stream?,
        };

        let mut text = String::new();
        let mut cancelled = false;
        loop {
            let item = tokio::select! {
                biased;
                _ = &mut cancel_rx, if !cancelled => {
                    cancelled = true;
                    self.generation.interrupt();
                    continue;
                }
                item = stream.next() => item,
            };
            let Some(item) = item else {
                break;
            };
            let token = item?;
            on_token(&token);
            text.push_str(&token);
        }

        if cancelled || stream.was_interrupted() {
            tracing::info!("Generation interrupted after {} chars", text.len());
            return Ok(GenerateOutcome::Interrupted { partial: text });
        }

        let answer = text.trim().to_string();
        let mut history = self.history();
        history.push(user);
        history.push(Message::assistant(answer.clone()));
        Ok(GenerateOutcome::Completed { answer, sources })
    }

    /// Stops the in-flight `generate` call, if any. Repeated calls are no-ops.
    pub fn interrupt(&self) {
        if let Some(cancel) = self.cancel_slot().take() {
            let _ = cancel.send(());
            tracing::info!("Assistant interrupt requested");
        }
        self.generation.interrupt();
    }

    pub fn history(&self) -> MutexGuard<'_, Vec<Message>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear_history(&self) {
        self.history().clear();
    }

    pub fn transcription(&self) -> &TranscriptionEngine {
        &self.transcription
    }

    pub fn generation(&self) -> &GenerationEngine {
        &self.generation
    }

    fn cancel_slot(&self) -> MutexGuard<'_, Option<oneshot::Sender<()>>> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn readiness(&self) -> Result<(), RagError> {
        if !self.embedder_loaded.load(Ordering::SeqCst) {
            return Err(RagError::NotReady(Component::Embedding));
        }
        if !self.generation.is_ready() {
            return Err(RagError::NotReady(Component::Generation));
        }
        if !self.transcription.is_loaded() {
            return Err(RagError::NotReady(Component::Transcription));
        }
        Ok(())
    }
}

fn interrupted_before_generation(phase: &str) -> GenerateOutcome {
    tracing::info!("Generation interrupted during {}", phase);
    GenerateOutcome::Interrupted {
        partial: String::new(),
    }
}

struct BusyGuard<'a> {
    busy: &'a AtomicBool,
    cancel: &'a Mutex<Option<oneshot::Sender<()>>>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.busy.store(false, Ordering::SeqCst);
    }
}
