//! llama.cpp `llama-server` backends for generation and embedding.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::core::config::ModelServerConfig;
use crate::core::errors::{Component, RagError};
use crate::core::progress::{LoadProgress, ProgressFn};
use crate::embedding::EmbeddingProvider;
use crate::model_server::{find_server_binary, ModelServer, ServerSpec};

use super::provider::GenerationBackend;

const SERVER_BINARY: &str = "llama-server";
const TOKEN_CHANNEL_CAPACITY: usize = 100;

fn server_spec(
    component: Component,
    config: &ModelServerConfig,
    bin_dir: &Path,
    embedding: bool,
) -> ServerSpec {
    let mut args = vec![
        "-m".to_string(),
        config.model_path.clone(),
        "--port".to_string(),
        config.port.to_string(),
        "-c".to_string(),
        config.n_ctx.to_string(),
        "-ngl".to_string(),
        config.n_gpu_layers.to_string(),
    ];
    if embedding {
        args.push("--embedding".to_string());
    }

    ServerSpec {
        component,
        binary: find_server_binary(config.binary.as_deref(), bin_dir, SERVER_BINARY),
        args,
        port: config.port,
        health_path: "/health".to_string(),
        startup_timeout: Duration::from_secs(config.startup_timeout_secs),
    }
}

fn check_model_path(component: Component, config: &ModelServerConfig) -> Result<(), RagError> {
    if config.model_path.trim().is_empty() {
        return Err(RagError::load(component, "no model_path configured"));
    }
    if !Path::new(&config.model_path).exists() {
        return Err(RagError::load(
            component,
            format!("model file not found: {}", config.model_path),
        ));
    }
    Ok(())
}

/// Streams completions from a local llama-server.
pub struct LlamaServerBackend {
    server: ModelServer,
    config: ModelServerConfig,
}

impl LlamaServerBackend {
    pub fn new(config: ModelServerConfig, bin_dir: &Path, client: Client) -> Self {
        let spec = server_spec(Component::Generation, &config, bin_dir, false);
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
impl GenerationBackend for LlamaServerBackend {
    fn name(&self) -> &str {
        "llama_server"
    }

    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        check_model_path(Component::Generation, &self.config)?;
        on_progress(LoadProgress::new(
            Component::Generation,
            0.0,
            "Starting llama-server",
        ));
        self.server.ensure_running(on_progress).await
    }

    async fn stream(
        &self,
        prompt: &str,
    ) -> Result<mpsc::Receiver<Result<String, RagError>>, RagError> {
        let url = format!("{}/completion", self.server.base_url());
        let body = json!({
            "prompt": prompt,
            "stream": true,
            "n_predict": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let mut res = self
            .server
            .client()
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::Generation(e.to_string()))?;

        if !res.status().is_success() {
            return Err(RagError::Generation(format!(
                "llama-server error: {}",
                res.status()
            )));
        }

        let (tx, rx) = mpsc::channel(TOKEN_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut lines = LineBuffer::default();
            loop {
                let chunk = match res.chunk().await {
                    Ok(Some(chunk)) => chunk,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(RagError::Generation(e.to_string()))).await;
                        return;
                    }
                };

                for line in lines.push(&chunk) {
                    let Some(event) = parse_completion_line(&line) else {
                        continue;
                    };
                    if !event.content.is_empty() && tx.send(Ok(event.content)).await.is_err() {
                        tracing::debug!("Token consumer went away; abandoning completion");
                        return;
                    }
                    if event.stop {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Embeds text through a llama-server started with `--embedding`.
pub struct LlamaServerEmbedder {
    server: ModelServer,
    config: ModelServerConfig,
}

impl LlamaServerEmbedder {
    pub fn new(config: ModelServerConfig, bin_dir: &Path, client: Client) -> Self {
        let spec = server_spec(Component::Embedding, &config, bin_dir, true);
        Self {
            server: ModelServer::new(spec, client),
            config,
        }
    }

    pub fn into_provider(self) -> Arc<dyn EmbeddingProvider> {
        Arc::new(self)
    }

    pub async fn shutdown(&self) {
        self.server.stop().await;
    }
}

#[async_trait]
impl EmbeddingProvider for LlamaServerEmbedder {
    fn name(&self) -> &str {
        "llama_server"
    }

    fn model_id(&self) -> &str {
        &self.config.model_path
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    async fn load(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        check_model_path(Component::Embedding, &self.config)?;
        on_progress(LoadProgress::new(
            Component::Embedding,
            0.0,
            "Starting embedding server",
        ));
        self.server.ensure_running(on_progress).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, RagError> {
        let url = format!("{}/embedding", self.server.base_url());
        let res = self
            .server
            .client()
            .post(&url)
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;

        if !res.status().is_success() {
            return Err(RagError::Embedding(format!(
                "llama-server error: {}",
                res.status()
            )));
        }

        let data: Value = res
            .json()
            .await
            .map_err(|e| RagError::Embedding(e.to_string()))?;
        let vector = parse_embedding_response(&data)?;
        if vector.len() != self.config.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.config.dimension,
                actual: vector.len(),
            });
        }
        Ok(vector)
    }
}

/// Splits a byte stream into complete lines; partial lines wait for the next chunk.
#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }
}

#[derive(Debug, PartialEq)]
pub(crate) struct CompletionEvent {
    pub content: String,
    pub stop: bool,
}

/// Parses one `data: {...}` line of the streaming completion endpoint.
pub(crate) fn parse_completion_line(line: &str) -> Option<CompletionEvent> {
    let payload = line.strip_prefix("data:")?.trim_start();
    let value: Value = serde_json::from_str(payload).ok()?;
    Some(CompletionEvent {
        content: value["content"].as_str().unwrap_or_default().to_string(),
        stop: value["stop"].as_bool().unwrap_or(false),
    })
}

/// Accepts `{"embedding": [..]}`, `{"embedding": [[..]]}` and
/// `[{"embedding": [[..]]}]` (newer llama-server builds).
pub(crate) fn parse_embedding_response(data: &Value) -> Result<Vec<f32>, RagError> {
    let embedding = match data {
        Value::Array(items) => items.first().map(|item| &item["embedding"]),
        Value::Object(_) => Some(&data["embedding"]),
        _ => None,
    }
    .ok_or_else(|| RagError::Embedding("empty embedding response".to_string()))?;

    let flat = match embedding {
        Value::Array(rows) if rows.first().is_some_and(Value::is_array) => &rows[0],
        other => other,
    };

    let vector: Vec<f32> = serde_json::from_value(flat.clone())
        .map_err(|_| RagError::Embedding("invalid embedding response".to_string()))?;
    if vector.is_empty() {
        return Err(RagError::Embedding("empty embedding vector".to_string()));
    }
    Ok(vector)
}
