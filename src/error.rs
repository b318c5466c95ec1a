//! Error types for the dialogue orchestrator.

/// Top-level error type for the orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Malformed frame, unknown command, audio alignment violation.
    #[error("client protocol error: {0}")]
    ClientProtocol(String),

    /// ASR adapter failure (transient or fatal, see call site).
    #[error("ASR adapter error: {0}")]
    AsrAdapter(String),

    /// LLM adapter failure (transient or fatal, see call site).
    #[error("LLM adapter error: {0}")]
    LlmAdapter(String),

    /// TTS adapter failure (transient or fatal, see call site).
    #[error("TTS adapter error: {0}")]
    TtsAdapter(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Client channel write/read failure or abnormal close.
    #[error("channel error: {0}")]
    Channel(String),

    /// An event referenced a turn or session that no longer exists.
    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;
