//! whisper.cpp `whisper-server` recognizer.
//!
//! Each decode uploads the window as a 16-bit mono WAV to `/inference` and
//! reads word timings from the `verbose_json` response.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;

use super::recognizer::SpeechRecognizer;
use super::types::RecognizedWord;
use crate::core::config::SpeechConfig;
use crate::core::errors::{Component, RagError};
use crate::core::progress::{LoadProgress, ProgressFn};
use crate::model_server::{find_server_binary, ModelServer, ServerSpec};

const SERVER_BINARY: &str = "whisper-server";

pub struct WhisperServerRecognizer {
    server: ModelServer,
    config: SpeechConfig,
}

impl WhisperServerRecognizer {
    pub fn new(config: SpeechConfig, bin_dir: &Path, client: Client) -> Self {
        let spec = ServerSpec {
            component: Component::Transcription,
            binary: find_server_binary(config.binary.as_deref(), bin_dir, SERVER_BINARY),
            args: vec![
                "-m".to_string(),
                config.model_path.clone(),
                "--port".to_string(),
                config.port.to_string(),
                "-l".to_string(),
                config.language.clone(),
            ],
            port: config.port,
            health_path: "/".to_string(),
            startup_timeout: Duration::from_secs(config.startup_timeout_secs),
        };
        Self {
            server: ModelServer::new(spec, client),
            config,
        }
    }

    pub async fn shutdown(&self) {
        self.server.stop().await;
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperServerRecognizer {
    fn name(&self) -> &str {
        "whisper_server"
    }

    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        if self.config.model_path.trim().is_empty() {
            return Err(RagError::load(
                Component::Transcription,
                "no model_path configured",
            ));
        }
        if !Path::new(&self.config.model_path).exists() {
            return Err(RagError::load(
                Component::Transcription,
                format!("model file not found: {}", self.config.model_path),
            ));
        }
        on_progress(LoadProgress::new(
            Component::Transcription,
            0.0,
            "Starting whisper-server",
        ));
        self.server.ensure_running(on_progress).await
    }

    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Vec<RecognizedWord>, RagError> {
        let wav = encode_wav(samples, sample_rate);
        let file = Part::bytes(wav)
            .file_name("window.wav")
            .mime_str("audio/wav")
            .map_err(|e| RagError::Transcription(e.to_string()))?;
        let form = Form::new()
            .part("file", file)
            .text("response_format", "verbose_json")
            .text("temperature", "0.0")
            .text("language", self.config.language.clone());

        let url = format!("{}/inference", self.server.base_url());
        let res = self
            .server
            .client()
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| RagError::Transcription(e.to_string()))?;

        if !res.status().is_success() {
            return Err(RagError::Transcription(format!(
                "whisper-server error: {}",
                res.status()
            )));
        }

        let data: Value = res
            .json()
            .await
            .map_err(|e| RagError::Transcription(e.to_string()))?;
        Ok(parse_verbose_json(&data))
    }
}

/// Words from a `verbose_json` response. Segments without word timings are
/// split on whitespace with times spread evenly across the segment.
pub(crate) fn parse_verbose_json(data: &Value) -> Vec<RecognizedWord> {
    let Some(segments) = data["segments"].as_array() else {
        return Vec::new();
    };

    let mut words = Vec::new();
    for segment in segments {
        let seg_start = segment["start"].as_f64().unwrap_or(0.0) as f32;
        let seg_end = segment["end"].as_f64().unwrap_or(seg_start as f64) as f32;

        if let Some(timed) = segment["words"].as_array().filter(|w| !w.is_empty()) {
            for word in timed {
                let text = word["word"].as_str().unwrap_or_default().trim();
                if text.is_empty() {
                    continue;
                }
                words.push(RecognizedWord {
                    text: text.to_string(),
                    start: word["start"].as_f64().unwrap_or(seg_start as f64) as f32,
                    end: word["end"].as_f64().unwrap_or(seg_end as f64) as f32,
                });
            }
            continue;
        }

        let text = segment["text"].as_str().unwrap_or_default();
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.is_empty() {
            continue;
        }
        let span = (seg_end - seg_start).max(0.0) / parts.len() as f32;
        for (i, part) in parts.iter().enumerate() {
            words.push(RecognizedWord {
                text: part.to_string(),
                start: seg_start + span * i as f32,
                end: seg_start + span * (i + 1) as f32,
            });
        }
    }
    words
}

/// 16-bit PCM mono RIFF/WAVE.
pub(crate) fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + data_len as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}
