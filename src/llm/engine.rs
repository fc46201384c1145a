//! Generation lifecycle around a `GenerationBackend`.
//!
//! `Idle -> Loading -> Ready -> Generating -> Ready`, with `Loading -> Failed`
//! on a failed load. Every transition goes through the single `slot` mutex,
//! which is what makes generation single-flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{self, Stream};
use tokio::sync::{mpsc, oneshot};

use super::provider::GenerationBackend;
use super::types::GenerationOutcome;
use crate::core::errors::{Component, RagError};
use crate::core::progress::ProgressFn;

/// Observable engine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Loading,
    Ready,
    Generating,
    Failed(String),
}

enum Slot {
    Idle,
    Loading,
    Ready,
    Generating {
        session: u64,
        cancel: Option<oneshot::Sender<()>>,
    },
    Failed(String),
}

struct Shared {
    slot: Mutex<Slot>,
    next_session: AtomicU64,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct GenerationEngine {
    backend: Arc<dyn GenerationBackend>,
    shared: Arc<Shared>,
}

impl GenerationEngine {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot::Idle),
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn state(&self) -> EngineState {
        match &*self.shared.slot() {
            Slot::Idle => EngineState::Idle,
            Slot::Loading => EngineState::Loading,
            Slot::Ready => EngineState::Ready,
            Slot::Generating { .. } => EngineState::Generating,
            Slot::Failed(reason) => EngineState::Failed(reason.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(&*self.shared.slot(), Slot::Ready | Slot::Generating { .. })
    }

    /// Loads the backend once. Already loaded is a no-op; a failed load can be retried.
    pub async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        {
            let mut slot = self.shared.slot();
            match &*slot {
                Slot::Ready | Slot::Generating { .. } => return Ok(()),
                Slot::Loading => {
                    return Err(RagError::load(
                        Component::Generation,
                        "a load is already in progress",
                    ))
                }
                Slot::Idle | Slot::Failed(_) => *slot = Slot::Loading,
            }
        }

        let mut guard = LoadGuard {
            shared: &self.shared,
            armed: true,
        };
        tracing::info!("Loading generation backend {}", self.backend.name());
        let result = self.backend.load(on_progress).await;
        guard.armed = false;

        let mut slot = self.shared.slot();
        match result {
            Ok(()) => {
                *slot = Slot::Ready;
                tracing::info!("Generation backend {} ready", self.backend.name());
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    RagError::Load { .. } => err,
                    other => RagError::load(Component::Generation, other),
                };
                *slot = Slot::Failed(err.to_string());
                tracing::error!("Generation backend failed to load: {}", err);
                Err(err)
            }
        }
    }

    /// Starts a generation session and returns its token stream.
    ///
    /// Rejected with `ConcurrentGeneration` while another session is live and
    /// with `NotReady` before a successful load. Dropping the stream ends the
    /// session and stops the backend producer.
    pub async fn stream(&self, prompt: &str) -> Result<TokenStream, RagError> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let session = {
            let mut slot = self.shared.slot();
            match &*slot {
                Slot::Ready => {}
                Slot::Generating { .. } => return Err(RagError::ConcurrentGeneration),
                _ => return Err(RagError::NotReady(Component::Generation)),
            }
            let session = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
            *slot = Slot::Generating {
                session,
                cancel: Some(cancel_tx),
            };
            session
        };

        let guard = SessionGuard {
            shared: Some(self.shared.clone()),
            session,
        };
        tracing::debug!(session, "Generation started");

        let tokens = match self.backend.stream(prompt).await {
            Ok(tokens) => tokens,
            Err(err) => {
                drop(guard);
                return Err(match err {
                    RagError::Generation(_) => err,
                    other => RagError::Generation(other.to_string()),
                });
            }
        };

        Ok(TokenStream {
            tokens,
            cancel: cancel_rx,
            guard,
            done: false,
            interrupted: false,
        })
    }

    /// Runs one generation to its end, calling `on_token` for every token in order.
    pub async fn generate<F>(
        &self,
        prompt: &str,
        mut on_token: F,
    ) -> Result<GenerationOutcome, RagError>
    where
        F: FnMut(&str) + Send,
    {
        let mut stream = self.stream(prompt).await?;
        let mut text = String::new();

        while let Some(item) = stream.next().await {
            let token = item?;
            on_token(&token);
            text.push_str(&token);
        }

        if stream.was_interrupted() {
            tracing::info!("Generation interrupted after {} chars", text.len());
            Ok(GenerationOutcome::Interrupted { partial: text })
        } else {
            Ok(GenerationOutcome::Completed(text))
        }
    }

    /// Asks the live session, if any, to stop. Repeated calls are no-ops.
    pub fn interrupt(&self) {
        let mut slot = self.shared.slot();
        if let Slot::Generating { session, cancel } = &mut *slot {
            if let Some(cancel) = cancel.take() {
                let _ = cancel.send(());
                tracing::info!(session = *session, "Generation interrupt requested");
            }
        }
    }
}

struct LoadGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.shared.slot();
        if matches!(&*slot, Slot::Loading) {
            *slot = Slot::Idle;
        }
    }
}

/// Returns the engine to `Ready` when its session ends.
struct SessionGuard {
    shared: Option<Arc<Shared>>,
    session: u64,
}

impl SessionGuard {
    fn release(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let mut slot = shared.slot();
        if let Slot::Generating { session, .. } = &*slot {
            if *session == self.session {
                *slot = Slot::Ready;
                tracing::debug!(session = self.session, "Generation session released");
            }
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lazy token sequence of one generation session.
pub struct TokenStream {
    tokens: mpsc::Receiver<Result<String, RagError>>,
    cancel: oneshot::Receiver<()>,
    guard: SessionGuard,
    done: bool,
    interrupted: bool,
}

impl TokenStream {
    /// Next token, or `None` once the session completed or was interrupted.
    /// A backend failure is yielded once, then the stream ends.
    pub async fn next(&mut self) -> Option<Result<String, RagError>> {
        if self.done {
            return None;
        }

        let item = tokio::select! {
            biased;
            _ = &mut self.cancel => {
                self.interrupted = true;
                None
            }
            item = self.tokens.recv() => item,
        };

        match item {
            Some(Ok(token)) => Some(Ok(token)),
            Some(Err(err)) => {
                self.finish();
                Some(Err(err))
            }
            None => {
                self.finish();
                None
            }
        }
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted
    }

    /// Adapts the session into a `futures` stream.
    pub fn into_stream(self) -> impl Stream<Item = Result<String, RagError>> + Send {
        stream::unfold(self, |mut tokens| async move {
            tokens.next().await.map(|item| (item, tokens))
        })
    }

    fn finish(&mut self) {
        self.done = true;
        self.tokens.close();
        self.guard.release();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::StreamExt;

    use super::*;
    use crate::core::progress::{ignore_progress, LoadProgress};
    use crate::testing::ScriptedBackend;

    async fn ready_engine(backend: ScriptedBackend) -> (GenerationEngine, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let engine = GenerationEngine::new(backend.clone());
        engine.load(&ignore_progress).await.unwrap();
        (engine, backend)
    }

    #[tokio::test]
    async fn load_reports_progress_and_becomes_ready() {
        let engine = GenerationEngine::new(Arc::new(ScriptedBackend::new(&["a"])));
        let seen = Mutex::new(Vec::new());
        let on_progress = |p: LoadProgress| seen.lock().unwrap().push(p.progress);

        assert_eq!(engine.state(), EngineState::Idle);
        engine.load(&on_progress).await.unwrap();

        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);

        // second load is a no-op
        engine.load(&ignore_progress).await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn failed_load_can_be_retried() {
        let backend = Arc::new(ScriptedBackend::new(&["a"]).failing_load());
        let engine = GenerationEngine::new(backend.clone());

        let err = engine.load(&ignore_progress).await.unwrap_err();
        assert!(matches!(err, RagError::Load { component: Component::Generation, .. }));
        assert!(matches!(engine.state(), EngineState::Failed(_)));
        assert!(matches!(
            engine.generate("p", |_| {}).await,
            Err(RagError::NotReady(Component::Generation))
        ));

        backend.set_load_failure(false);
        engine.load(&ignore_progress).await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn generate_streams_tokens_in_order() {
        let (engine, backend) =
            ready_engine(ScriptedBackend::new(&["The", " answer", " is", " 42"])).await;
        let mut seen = Vec::new();

        let outcome = engine
            .generate("prompt", |token| seen.push(token.to_string()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["The", " answer", " is", " 42"]);
        assert_eq!(outcome, GenerationOutcome::Completed("The answer is 42".to_string()));
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(backend.prompts(), vec!["prompt".to_string()]);
    }

    #[tokio::test]
    async fn second_generate_is_rejected_while_generating() {
        let (engine, backend) = ready_engine(
            ScriptedBackend::new(&["a", "b", "c"]).with_delay(Duration::from_millis(50)),
        )
        .await;

        let stream = engine.stream("first").await.unwrap();
        let err = engine.generate("second", |_| {}).await.unwrap_err();

        assert!(matches!(err, RagError::ConcurrentGeneration));
        assert_eq!(engine.state(), EngineState::Generating);
        assert_eq!(backend.streams_started(), 1);

        drop(stream);
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn interrupt_mid_stream_returns_partial_without_answer() {
        let (engine, _backend) = ready_engine(
            ScriptedBackend::new(&["one", " two", " three", " four", " five"])
                .with_delay(Duration::from_millis(30)),
        )
        .await;

        let runner = engine.clone();
        let task = tokio::spawn(async move { runner.generate("p", |_| {}).await });

        tokio::time::sleep(Duration::from_millis(70)).await;
        engine.interrupt();
        engine.interrupt();

        let outcome = task.await.unwrap().unwrap();
        match outcome {
            GenerationOutcome::Interrupted { partial } => {
                assert!(partial.len() < "one two three four five".len());
            }
            other => panic!("expected interruption, got {:?}", other),
        }
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn interrupt_without_session_is_a_noop() {
        let (engine, _backend) = ready_engine(ScriptedBackend::new(&["x"])).await;

        engine.interrupt();
        engine.interrupt();
        assert_eq!(engine.state(), EngineState::Ready);

        let outcome = engine.generate("p", |_| {}).await.unwrap();
        assert_eq!(outcome, GenerationOutcome::Completed("x".to_string()));
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_producer() {
        let (engine, backend) = ready_engine(
            ScriptedBackend::new(&["a", "b", "c", "d", "e", "f", "g", "h"])
                .with_delay(Duration::from_millis(10)),
        )
        .await;

        let mut stream = engine.stream("p").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "a");
        drop(stream);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(backend.producer_stopped());
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn backend_failure_is_a_generation_error() {
        let (engine, backend) = ready_engine(ScriptedBackend::new(&["a", "b", "c"])).await;
        backend.fail_after(1);

        let err = engine.generate("p", |_| {}).await.unwrap_err();

        assert!(matches!(err, RagError::Generation(_)));
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[tokio::test]
    async fn token_stream_adapts_to_futures_stream() {
        let (engine, _backend) = ready_engine(ScriptedBackend::new(&["x", "y"])).await;

        let tokens: Vec<String> = engine
            .stream("p")
            .await
            .unwrap()
            .into_stream()
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(tokens, vec!["x", "y"]);
        assert_eq!(engine.state(), EngineState::Ready);
    }
}
