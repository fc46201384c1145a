mod agreement;
pub mod engine;
pub mod ingest;
pub mod recognizer;
pub mod types;
pub mod voice;
pub mod whisper_server;

pub use engine::{LoadState, StreamSettings, TranscriptStream, TranscriptionEngine};
pub use ingest::AudioSink;
pub use recognizer::SpeechRecognizer;
pub use types::{RecognizedWord, TranscriptUpdate};
pub use voice::{AudioSource, VoiceInput};
pub use whisper_server::WhisperServerRecognizer;
