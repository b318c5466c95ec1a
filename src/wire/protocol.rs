//! JSON message types exchanged over the client channel (spec.md §6.1).

use serde::{Deserialize, Serialize};

/// A client-originated text command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClientCommand {
    Start,
    Stop,
    Reset,
    Interrupt,
    ClearQueues,
}

/// `status` frame's `status` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Listening,
    Stopped,
    Idle,
    Error,
}

/// A server-originated text frame. Every variant carries `session_id`;
/// turn-scoped variants also carry `turn_id` (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Status {
        session_id: String,
        status: StatusKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    PartialTranscript {
        session_id: String,
        turn_id: u64,
        content: String,
    },
    FinalTranscript {
        session_id: String,
        turn_id: u64,
        content: String,
    },
    LlmStatus {
        session_id: String,
        turn_id: u64,
        status: &'static str,
    },
    LlmResponse {
        session_id: String,
        turn_id: u64,
        content: String,
        is_complete: bool,
    },
    TtsStart {
        session_id: String,
        turn_id: u64,
        format: &'static str,
    },
    TtsEnd {
        session_id: String,
        turn_id: u64,
    },
    TtsStop {
        session_id: String,
        turn_id: u64,
    },
    InterruptAcknowledged {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        turn_id: Option<u64>,
    },
    StopAcknowledged {
        session_id: String,
        queues_cleared: bool,
    },
    Error {
        session_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        turn_id: Option<u64>,
        message: String,
    },
}

impl ServerFrame {
    pub fn status(session_id: impl Into<String>, status: StatusKind) -> Self {
        Self::Status {
            session_id: session_id.into(),
            status,
            message: None,
        }
    }

    pub fn status_with_message(
        session_id: impl Into<String>,
        status: StatusKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Status {
            session_id: session_id.into(),
            status,
            message: Some(message.into()),
        }
    }

    pub fn llm_status_processing(session_id: impl Into<String>, turn_id: u64) -> Self {
        Self::LlmStatus {
            session_id: session_id.into(),
            turn_id,
            status: "processing",
        }
    }

    pub fn tts_start(session_id: impl Into<String>, turn_id: u64) -> Self {
        Self::TtsStart {
            session_id: session_id.into(),
            turn_id,
            format: "pcm",
        }
    }

    pub fn error(
        session_id: impl Into<String>,
        turn_id: Option<u64>,
        message: impl Into<String>,
    ) -> Self {
        Self::Error {
            session_id: session_id.into(),
            turn_id,
            message: message.into(),
        }
    }

    /// The `turn_id` this frame is scoped to, if any. Used by the outbound
    /// scheduler's epoch-suppression check (spec.md §4.8, I2).
    pub fn turn_id(&self) -> Option<u64> {
        match self {
            Self::PartialTranscript { turn_id, .. }
            | Self::FinalTranscript { turn_id, .. }
            | Self::LlmStatus { turn_id, .. }
            | Self::LlmResponse { turn_id, .. }
            | Self::TtsStart { turn_id, .. }
            | Self::TtsEnd { turn_id, .. }
            | Self::TtsStop { turn_id, .. } => Some(*turn_id),
            Self::InterruptAcknowledged { turn_id, .. } | Self::Error { turn_id, .. } => *turn_id,
            Self::Status { .. } | Self::StopAcknowledged { .. } => None,
        }
    }
}
