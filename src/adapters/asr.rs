//! ASR (speech recognition) adapter contract (spec.md §4.2).

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::pipeline::messages::Transcript;

/// An open ASR session handle bound to one turn's audio.
#[async_trait]
pub trait AsrSession: Send + Sync {
    /// Push a PCM body (header already stripped by the wire codec) into the
    /// adapter's internal buffer. Non-blocking: the adapter buffers
    /// internally and reports progress via `next_event`.
    async fn feed(&self, pcm: &[u8]) -> Result<()>;

    /// Pull the next transcript event, in order. Returns `None` once the
    /// adapter has emitted its terminal `Final` and has nothing left to say.
    async fn next_event(&self) -> Result<Option<Transcript>>;

    /// Release adapter-side resources for this handle.
    async fn close(&self) -> Result<()>;
}

/// Factory for ASR sessions (spec.md §4.2's `open(...)`).
#[async_trait]
pub trait AsrAdapter: Send + Sync {
    /// Open a new session for `turn_id`. The core always requests 16 kHz /
    /// 16-bit / mono and never resamples; a real adapter that cannot accept
    /// that rate is a configuration error, not something this trait models.
    async fn open(&self, turn_id: u64) -> Result<Box<dyn AsrSession>>;
}

/// A deterministic, scripted ASR adapter for tests and the demo binary.
///
/// Each call to `open` consumes the next script entry in order; a session's
/// `feed` calls are ignored (the script already encodes what would have been
/// recognized), and `next_event` replays the scripted partials/final.
pub struct MockAsrAdapter {
    scripts: Mutex<std::collections::VecDeque<Vec<Transcript>>>,
}

impl MockAsrAdapter {
    /// Build an adapter that will hand out `scripts`, one per `open` call, in
    /// order. Each script is a sequence of `Transcript`s already carrying
    /// the intended `turn_id`.
    pub fn new(scripts: Vec<Vec<Transcript>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }
}

#[async_trait]
impl AsrAdapter for MockAsrAdapter {
    async fn open(&self, turn_id: u64) -> Result<Box<dyn AsrSession>> {
        let script = self
            .scripts
            .lock()
            .await
            .pop_front()
            .unwrap_or_default();
        Ok(Box::new(MockAsrSession {
            turn_id,
            events: Mutex::new(script.into()),
        }))
    }
}

struct MockAsrSession {
    turn_id: u64,
    events: Mutex<std::collections::VecDeque<Transcript>>,
}

#[async_trait]
impl AsrSession for MockAsrSession {
    async fn feed(&self, _pcm: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn next_event(&self) -> Result<Option<Transcript>> {
        let _ = self.turn_id;
        Ok(self.events.lock().await.pop_front())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
