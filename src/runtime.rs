//! Runtime events emitted by the pipeline for observability (SPEC_FULL.md
//! "Ambient stack", modeled on the teacher's `runtime.rs`).
//!
//! This is intentionally lightweight so emitting an event never blocks a
//! turn's critical path: the channel is a `broadcast`, so a slow or absent
//! subscriber never backs up the orchestrator.

use uuid::Uuid;

use crate::pipeline::messages::{AssistantToken, SpeechSegment, Transcript};
use crate::session::TurnPhase;

/// Events that describe what a session's turn pipeline is doing right now.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The session's coarse turn phase changed.
    PhaseChanged {
        session_id: Uuid,
        turn_id: Option<u64>,
        phase: TurnPhase,
    },
    /// A partial or final ASR transcript.
    Transcript { session_id: Uuid, transcript: Transcript },
    /// An assistant token fragment mirrored back to the client.
    AssistantToken { session_id: Uuid, token: AssistantToken },
    /// A sentence-segmented chunk handed to TTS.
    SpeechSegment { session_id: Uuid, segment: SpeechSegment },
    /// Barge-in fired, interrupting the active turn.
    BargeIn { session_id: Uuid, turn_id: Option<u64> },
    /// A turn ended in failure (LLM/TTS adapter error, timeout).
    TurnFailed {
        session_id: Uuid,
        turn_id: u64,
        message: String,
    },
}

/// Channel capacity for a session's runtime event bus. Generous enough that
/// a short-lived subscriber (e.g. a test or a CLI observer) won't lag behind
/// normal turn-taking traffic.
const RUNTIME_EVENTS_CAPACITY: usize = 256;

/// Construct a fresh broadcast channel for one session's runtime events.
pub fn channel() -> tokio::sync::broadcast::Sender<RuntimeEvent> {
    tokio::sync::broadcast::channel(RUNTIME_EVENTS_CAPACITY).0
}
