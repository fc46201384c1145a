use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub rag: RagConfig,
    pub generation: ModelServerConfig,
    pub embedding: ModelServerConfig,
    pub speech: SpeechConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rag: RagConfig::default(),
            generation: ModelServerConfig::default(),
            embedding: ModelServerConfig {
                port: 8090,
                n_ctx: 512,
                ..ModelServerConfig::default()
            },
            speech: SpeechConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Notes fetched from the vector store per question.
    pub n_results: usize,
    /// Results at or below this cosine similarity are dropped.
    pub min_similarity: f32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            n_results: 1,
            min_similarity: 0.2,
        }
    }
}

/// A locally spawned llama.cpp / whisper.cpp style HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelServerConfig {
    /// Explicit server binary; falls back to `bin/` in the data dir, then `PATH`.
    pub binary: Option<String>,
    pub model_path: String,
    pub port: u16,
    pub n_ctx: usize,
    pub n_gpu_layers: i32,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Output size of the embedding model. Ignored for generation.
    pub dimension: usize,
    pub startup_timeout_secs: u64,
}

impl Default for ModelServerConfig {
    fn default() -> Self {
        Self {
            binary: None,
            model_path: String::new(),
            port: 8088,
            n_ctx: 2048,
            n_gpu_layers: -1,
            max_tokens: 1024,
            temperature: 0.7,
            dimension: 384,
            startup_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub binary: Option<String>,
    pub model_path: String,
    pub port: u16,
    pub language: String,
    pub sample_rate: u32,
    /// Samples per buffer pushed by the audio source.
    pub buffer_length: usize,
    /// New audio required before the window is decoded again.
    pub step_ms: u64,
    /// Window length after which the hypothesis is committed unconditionally.
    pub max_window_secs: u64,
    /// Audio buffers held between the source and the decoder before dropping.
    pub ingest_capacity: usize,
    pub startup_timeout_secs: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            binary: None,
            model_path: String::new(),
            port: 8092,
            language: "en".to_string(),
            sample_rate: 16_000,
            buffer_length: 1_600,
            step_ms: 1_000,
            max_window_secs: 30,
            ingest_capacity: 256,
            startup_timeout_secs: 60,
        }
    }
}
