//! TTS (speech synthesis) adapter contract (spec.md §4.2 sibling, referenced
//! in §4.3's surrounding text and §4.9's failure semantics).

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A running synthesis; pull-based, cancellable.
#[async_trait]
pub trait TtsStream: Send + Sync {
    /// Pull the next raw PCM chunk. Returns `None` once synthesis has
    /// finished naturally or been cancelled.
    async fn next_chunk(&self) -> Result<Option<Vec<u8>>>;
}

/// Factory for TTS synthesis runs.
#[async_trait]
pub trait TtsAdapter: Send + Sync {
    /// Synthesize `text` into PCM. The adapter MUST observe `cancellation`
    /// and stop producing chunks within a bounded grace window once it
    /// fires.
    async fn synthesize(
        &self,
        text: &str,
        cancellation: CancellationToken,
    ) -> Result<Box<dyn TtsStream>>;
}

/// A deterministic, scripted TTS adapter for tests and the demo binary.
///
/// Each call to `synthesize` hands out the next scripted chunk sequence,
/// falling back to a single synthetic chunk derived from `text`'s length so
/// callers that don't care about exact bytes can still exercise ordering.
pub struct MockTtsAdapter {
    scripts: Mutex<std::collections::VecDeque<Vec<Vec<u8>>>>,
}

impl MockTtsAdapter {
    pub fn new(scripts: Vec<Vec<Vec<u8>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }

    /// Build an adapter that synthesizes one chunk per call, `chunk_len`
    /// bytes of silence, for `calls` calls.
    pub fn silent(calls: usize, chunk_len: usize) -> Self {
        Self::new(vec![vec![vec![0u8; chunk_len]]; calls])
    }
}

#[async_trait]
impl TtsAdapter for MockTtsAdapter {
    async fn synthesize(
        &self,
        _text: &str,
        cancellation: CancellationToken,
    ) -> Result<Box<dyn TtsStream>> {
        let chunks = self.scripts.lock().await.pop_front().unwrap_or_default();
        Ok(Box::new(MockTtsStream {
            chunks: Mutex::new(chunks.into()),
            cancellation,
        }))
    }
}

/// An adapter whose synthesis calls always fail, to exercise the
/// all-segments-fail path (spec.md §4.9: "if all segments fail, send
/// error").
pub struct FailingTtsAdapter;

#[async_trait]
impl TtsAdapter for FailingTtsAdapter {
    async fn synthesize(
        &self,
        _text: &str,
        _cancellation: CancellationToken,
    ) -> Result<Box<dyn TtsStream>> {
        Err(crate::error::OrchestratorError::TtsAdapter(
            "synthesis unavailable".into(),
        ))
    }
}

/// An adapter whose `fail_at`-th call (0-indexed) fails; every other call
/// succeeds with one chunk of `chunk`. Exercises the per-segment-failure
/// continuation path (spec.md §4.9: "continue with next segment if any").
pub struct FlakyTtsAdapter {
    fail_at: usize,
    chunk: Vec<u8>,
    calls: Mutex<usize>,
}

impl FlakyTtsAdapter {
    pub fn new(fail_at: usize, chunk: Vec<u8>) -> Self {
        Self {
            fail_at,
            chunk,
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl TtsAdapter for FlakyTtsAdapter {
    async fn synthesize(
        &self,
        _text: &str,
        cancellation: CancellationToken,
    ) -> Result<Box<dyn TtsStream>> {
        let mut calls = self.calls.lock().await;
        let this_call = *calls;
        *calls += 1;
        drop(calls);

        if this_call == self.fail_at {
            return Err(crate::error::OrchestratorError::TtsAdapter(
                "synthesis failed".into(),
            ));
        }
        Ok(Box::new(MockTtsStream {
            chunks: Mutex::new(vec![self.chunk.clone()].into()),
            cancellation,
        }))
    }
}

struct MockTtsStream {
    chunks: Mutex<std::collections::VecDeque<Vec<u8>>>,
    cancellation: CancellationToken,
}

#[async_trait]
impl TtsStream for MockTtsStream {
    async fn next_chunk(&self) -> Result<Option<Vec<u8>>> {
        if self.cancellation.is_cancelled() {
            return Ok(None);
        }
        Ok(self.chunks.lock().await.pop_front())
    }
}
