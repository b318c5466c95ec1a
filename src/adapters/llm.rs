//! LLM (token generation) adapter contract (spec.md §4.3).

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::session::types::ChatMessage;

/// A running generation; pull-based, cancellable.
#[async_trait]
pub trait LlmStream: Send + Sync {
    /// Pull the next token fragment. Returns `None` once generation has
    /// finished naturally or been cancelled; the final fragment before
    /// `None` is not distinguished here — the caller tracks completion via
    /// its own `is_complete` bookkeeping against the cancellation token.
    async fn next_fragment(&self) -> Result<Option<String>>;
}

/// Factory for LLM generations.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Start a generation for `prompt` given `history`. The adapter MUST
    /// observe `cancellation` and stop producing fragments within a bounded
    /// grace window once it fires; the core treats a cancelled generation as
    /// definitively abandoned and never resumes it.
    async fn generate(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        cancellation: CancellationToken,
    ) -> Result<Box<dyn LlmStream>>;
}

/// A deterministic, scripted LLM adapter for tests and the demo binary.
pub struct MockLlmAdapter {
    scripts: Mutex<std::collections::VecDeque<Vec<String>>>,
}

impl MockLlmAdapter {
    /// `scripts[i]` is the sequence of token fragments returned by the
    /// `i`-th call to `generate`.
    pub fn new(scripts: Vec<Vec<String>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }
}

#[async_trait]
impl LlmAdapter for MockLlmAdapter {
    async fn generate(
        &self,
        _prompt: &str,
        _history: &[ChatMessage],
        cancellation: CancellationToken,
    ) -> Result<Box<dyn LlmStream>> {
        let fragments = self.scripts.lock().await.pop_front().unwrap_or_default();
        Ok(Box::new(MockLlmStream {
            fragments: Mutex::new(fragments.into()),
            cancellation,
        }))
    }
}

struct MockLlmStream {
    fragments: Mutex<std::collections::VecDeque<String>>,
    cancellation: CancellationToken,
}

#[async_trait]
impl LlmStream for MockLlmStream {
    async fn next_fragment(&self) -> Result<Option<String>> {
        if self.cancellation.is_cancelled() {
            return Ok(None);
        }
        Ok(self.fragments.lock().await.pop_front())
    }
}

/// An adapter whose generations never produce a first token, to exercise the
/// LLM first-token timeout path (spec.md §5 "Timeouts").
pub struct HangingLlmAdapter;

#[async_trait]
impl LlmAdapter for HangingLlmAdapter {
    async fn generate(
        &self,
        _prompt: &str,
        _history: &[ChatMessage],
        cancellation: CancellationToken,
    ) -> Result<Box<dyn LlmStream>> {
        Ok(Box::new(HangingLlmStream { cancellation }))
    }
}

struct HangingLlmStream {
    cancellation: CancellationToken,
}

#[async_trait]
impl LlmStream for HangingLlmStream {
    async fn next_fragment(&self) -> Result<Option<String>> {
        self.cancellation.cancelled().await;
        Ok(None)
    }
}
