//! Locally spawned model server processes (llama.cpp / whisper.cpp style).
//!
//! The server binary is started on first load, its output is forwarded to
//! the log, and load completes once the health endpoint answers with a
//! success status.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::core::errors::{Component, RagError};
use crate::core::progress::{LoadProgress, ProgressFn};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How to launch one server.
#[derive(Debug, Clone)]
pub struct ServerSpec {
    pub component: Component,
    pub binary: PathBuf,
    pub args: Vec<String>,
    pub port: u16,
    pub health_path: String,
    pub startup_timeout: Duration,
}

#[derive(Clone)]
pub struct ModelServer {
    inner: Arc<Mutex<ServerManager>>,
    client: Client,
    spec: Arc<ServerSpec>,
}

struct ServerManager {
    child: Option<Child>,
}

impl ModelServer {
    pub fn new(spec: ServerSpec, client: Client) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServerManager { child: None })),
            client,
            spec: Arc::new(spec),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.spec.port)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Spawns the server if it is not already running and waits until healthy.
    pub async fn ensure_running(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        let mut manager = self.inner.lock().await;

        if let Some(child) = manager.child.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => {
                    tracing::warn!(
                        "{} server exited with {}; restarting",
                        self.spec.component,
                        status
                    );
                }
                Err(err) => tracing::warn!("Failed to poll {} server: {}", self.spec.component, err),
            }
            manager.child = None;
        }

        let child = self.spawn()?;
        manager.child = Some(child);

        if let Err(err) = self.wait_for_health(on_progress).await {
            if let Some(mut child) = manager.child.take() {
                let _ = child.kill().await;
            }
            return Err(err);
        }

        on_progress(LoadProgress::new(self.spec.component, 1.0, "Server ready"));
        Ok(())
    }

    pub async fn stop(&self) {
        let mut manager = self.inner.lock().await;
        if let Some(mut child) = manager.child.take() {
            let _ = child.kill().await;
            tracing::info!("Stopped {} server", self.spec.component);
        }
    }

    fn spawn(&self) -> Result<Child, RagError> {
        let spec = &self.spec;
        let mut cmd = Command::new(&spec.binary);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            RagError::load(
                spec.component,
                format!("failed to spawn {}: {}", spec.binary.display(), e),
            )
        })?;
        tracing::info!(
            "Spawned {} server {} on port {}",
            spec.component,
            spec.binary.display(),
            spec.port
        );

        let label = spec.component.as_str();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!("[{}-server] {}", label, line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    tracing::debug!("[{}-server-err] {}", label, line);
                }
            });
        }

        Ok(child)
    }

    async fn wait_for_health(&self, on_progress: &ProgressFn<'_>) -> Result<(), RagError> {
        let url = format!("{}{}", self.base_url(), self.spec.health_path);
        let attempts = (self.spec.startup_timeout.as_millis() / HEALTH_POLL_INTERVAL.as_millis())
            .max(1) as u32;

        for attempt in 0..attempts {
            if let Ok(res) = self.client.get(&url).send().await {
                if res.status().is_success() {
                    return Ok(());
                }
            }
            on_progress(LoadProgress::new(
                self.spec.component,
                attempt as f32 / attempts as f32,
                "Waiting for model server",
            ));
            tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
        }

        Err(RagError::load(
            self.spec.component,
            format!("timed out waiting for server at {}", url),
        ))
    }
}

/// Resolves a server binary: explicit path, then `bin/` in the data dir, then `PATH`.
pub fn find_server_binary(configured: Option<&str>, bin_dir: &Path, name: &str) -> PathBuf {
    if let Some(configured) = configured.filter(|path| !path.trim().is_empty()) {
        return PathBuf::from(configured);
    }

    let candidates = [
        bin_dir.join(format!("{}.exe", name)),
        bin_dir.join(name),
    ];
    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}
