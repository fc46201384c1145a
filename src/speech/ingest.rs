//! Push side of the audio path.
//!
//! Audio sources run on their own clock and must never block, so buffers go
//! through a bounded channel and are dropped (and counted) when it is full.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

pub(crate) type AudioReceiver = mpsc::Receiver<Vec<f32>>;

#[derive(Clone)]
pub struct AudioSink {
    tx: mpsc::Sender<Vec<f32>>,
    dropped: Arc<AtomicU64>,
}

impl AudioSink {
    pub(crate) fn channel(capacity: usize) -> (Self, AudioReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Hands one buffer to the decoder. Returns `false` if it was dropped.
    pub fn push(&self, chunk: Vec<f32>) -> bool {
        if chunk.is_empty() {
            return true;
        }
        match self.tx.try_send(chunk) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "Audio ingest channel full; dropping buffer");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
