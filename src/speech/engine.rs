//! Streaming transcription sessions over a `SpeechRecognizer`.
//!
//! Audio arrives through the engine's `AudioSink`. A session decodes the
//! uncommitted window every `step` of new audio and yields transcript
//! updates until `stop()` is called or the stream is dropped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{oneshot, Mutex as AsyncMutex, OwnedMutexGuard};

use super::agreement::LocalAgreement;
use super::ingest::{AudioReceiver, AudioSink};
use super::recognizer::SpeechRecognizer;
use super::types::TranscriptUpdate;
use crate::core::config::SpeechConfig;
use crate::core::errors::{Component, RagError};
use crate::core::progress::ProgressFn;

/// Decode pacing for a session.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub sample_rate: u32,
    pub step: Duration,
    pub max_window: Duration,
}

impl StreamSettings {
    fn step_samples(&self) -> usize {
        ((self.step.as_secs_f64() * self.sample_rate as f64) as usize).max(1)
    }

    fn max_window_samples(&self) -> usize {
        (self.max_window.as_secs_f64() * self.sample_rate as f64) as usize
    }
}

impl From<&SpeechConfig> for StreamSettings {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            step: Duration::from_millis(config.step_ms),
            max_window: Duration::from_secs(config.max_window_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Failed(String),
}

struct ActiveSession {
    id: u64,
    stop: Option<oneshot::Sender<()>>,
}

struct State {
    load: LoadState,
    session: Option<ActiveSession>,
}

struct Shared {
    state: Mutex<State>,
    next_session: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct TranscriptionEngine {
    recognizer: Arc<dyn SpeechRecognizer>,
    settings: StreamSettings,
    shared: Arc<Shared>,
    sink: AudioSink,
    audio: Arc<AsyncMutex<AudioReceiver>>,
}

impl TranscriptionEngine {
    pub fn new(
        recognizer: Arc<dyn SpeechRecognizer>,
        settings: StreamSettings,
        ingest_capacity: usize,
    ) -> Self {
        let (sink, audio) = AudioSink::channel(ingest_capacity);
        Self {
            recognizer,
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    load: LoadState::Unloaded,
                    session: None,
                }),
                next_session: AtomicU64::new(1),
            }),
            sink,
            audio: Arc::new(AsyncMutex::new(audio)),
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.shared.state().load.clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.state().load == LoadState::Loaded
    }

    pub fn is_streaming(&self) -> bool {
        self.shared.state().session.is_some()
    }

    pub async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        {
            let mut state = self.shared.state();
            match state.load {
                LoadState::Loaded => return Ok(()),
                LoadState::Loading => {
                    return Err(RagError::load(
                        Component::Transcription,
                        "a load is already in progress",
                    ))
                }
                LoadState::Unloaded | LoadState::Failed(_) => state.load = LoadState::Loading,
            }
        }

        let mut guard = LoadGuard {
            shared: &self.shared,
            armed: true,
        };
        tracing::info!("Loading speech recognizer {}", self.recognizer.name());
        let result = self.recognizer.load(on_progress).await;
        guard.armed = false;

        let mut state = self.shared.state();
        match result {
            Ok(()) => {
                state.load = LoadState::Loaded;
                tracing::info!("Speech recognizer {} ready", self.recognizer.name());
                Ok(())
            }
            Err(err) => {
                let err = match err {
                    RagError::Load { .. } => err,
                    other => RagError::load(Component::Transcription, other),
                };
                state.load = LoadState::Failed(err.to_string());
                tracing::error!("Speech recognizer failed to load: {}", err);
                Err(err)
            }
        }
    }

    /// Where the audio source pushes PCM buffers.
    pub fn audio_sink(&self) -> AudioSink {
        self.sink.clone()
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.sink.dropped_chunks()
    }

    /// Begins a session with an empty transcript. Audio pushed before this
    /// call is discarded.
    pub fn start_stream(&self) -> Result<TranscriptStream, RagError> {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (id, mut audio) = {
            let mut state = self.shared.state();
            if state.load != LoadState::Loaded {
                return Err(RagError::NotReady(Component::Transcription));
            }
            if state.session.is_some() {
                return Err(RagError::TranscriptionBusy);
            }
            let audio = self
                .audio
                .clone()
                .try_lock_owned()
                .map_err(|_| RagError::TranscriptionBusy)?;
            let id = self.shared.next_session.fetch_add(1, Ordering::SeqCst);
            state.session = Some(ActiveSession {
                id,
                stop: Some(stop_tx),
            });
            (id, audio)
        };
        let guard = SessionGuard {
            shared: Some(self.shared.clone()),
            session: id,
        };

        let mut stale = 0usize;
        while audio.try_recv().is_ok() {
            stale += 1;
        }
        tracing::info!(session = id, stale_buffers = stale, "Transcription started");

        Ok(TranscriptStream {
            recognizer: self.recognizer.clone(),
            settings: self.settings.clone(),
            audio: Some(audio),
            stop: stop_rx,
            guard,
            window: Vec::new(),
            pending: 0,
            agreement: LocalAgreement::default(),
            done: false,
        })
    }

    /// Ends the active session, if any.
    pub fn stop(&self) {
        let mut state = self.shared.state();
        if let Some(session) = state.session.as_mut() {
            if let Some(stop) = session.stop.take() {
                let _ = stop.send(());
                tracing::info!(session = session.id, "Transcription stop requested");
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
        let mut state = self.shared.state();
        if state.load == LoadState::Loading {
            state.load = LoadState::Unloaded;
        }
    }
}

struct SessionGuard {
    shared: Option<Arc<Shared>>,
    session: u64,
}

impl SessionGuard {
    fn release(&mut self) {
        let Some(shared) = self.shared.take() else {
            return;
        };
        let mut state = shared.state();
        if state.session.as_ref().map(|s| s.id) == Some(self.session) {
            state.session = None;
            tracing::debug!(session = self.session, "Transcription session released");
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct TranscriptStream {
    recognizer: Arc<dyn SpeechRecognizer>,
    settings: StreamSettings,
    audio: Option<OwnedMutexGuard<AudioReceiver>>,
    stop: oneshot::Receiver<()>,
    guard: SessionGuard,
    window: Vec<f32>,
    pending: usize,
    agreement: LocalAgreement,
    done: bool,
}

impl TranscriptStream {
    /// Next transcript update, or `None` once the session is stopped.
    /// A decoder failure is yielded once, then the stream ends.
    pub async fn next(&mut self) -> Option<Result<TranscriptUpdate, RagError>> {
        if self.done {
            return None;
        }

        let step = self.settings.step_samples();
        while self.pending < step {
            let Some(audio) = self.audio.as_mut() else {
                self.finish();
                return None;
            };
            let chunk = tokio::select! {
                biased;
                _ = &mut self.stop => None,
                chunk = audio.recv() => chunk,
            };
            match chunk {
                Some(chunk) => {
                    self.pending += chunk.len();
                    self.window.extend_from_slice(&chunk);
                }
                None => {
                    self.finish();
                    return None;
                }
            }
        }
        self.pending = 0;

        let sample_rate = self.settings.sample_rate;
        let force = self.window.len() >= self.settings.max_window_samples();
        let decoded = tokio::select! {
            biased;
            _ = &mut self.stop => None,
            words = self.recognizer.transcribe(&self.window, sample_rate) => Some(words),
        };

        let words = match decoded {
            Some(Ok(words)) => words,
            Some(Err(err)) => {
                self.finish();
                let err = match err {
                    RagError::Transcription(_) => err,
                    other => RagError::Transcription(other.to_string()),
                };
                tracing::error!("Transcription failed: {}", err);
                return Some(Err(err));
            }
            None => {
                self.finish();
                return None;
            }
        };

        let window_secs = self.window.len() as f32 / sample_rate as f32;
        let agreement = self.agreement.apply(words, window_secs, force);
        let trim = (agreement.trim_secs * sample_rate as f32).round() as usize;
        let trim = trim.min(self.window.len());
        self.window.drain(..trim);

        if force {
            tracing::debug!(window_secs, "Transcription window force-committed");
        }
        Some(Ok(agreement.update))
    }

    fn finish(&mut self) {
        self.done = true;
        self.audio = None;
        self.guard.release();
    }
}
