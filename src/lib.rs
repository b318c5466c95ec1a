//! A real-time speech-to-speech dialogue orchestrator.
//!
//! The crate wires together a pluggable ASR adapter, LLM adapter, and TTS
//! adapter into one turn-taking pipeline per client connection: inbound
//! audio and commands flow in over a client channel, get demultiplexed and
//! fed to the ASR adapter, transcripts drive a turn state machine that
//! invokes the LLM, LLM token fragments are segmented into sentences and
//! handed to the TTS adapter, and synthesized audio streams back out —
//! all while tracking barge-in so a user speaking over the assistant
//! interrupts cleanly rather than racing it.
//!
//! # Architecture
//!
//! - [`wire`]: the binary audio frame codec and JSON command/status frames.
//! - [`adapters`]: the ASR/LLM/TTS adapter traits and mock implementations.
//! - [`session`]: per-connection state (`Session`, `TurnContext`) and the
//!   process-wide [`session::SessionRegistry`].
//! - [`pipeline`]: the segmenter, barge-in gate, outbound scheduler, turn
//!   actor, and the [`pipeline::orchestrator`] that spawns a session's tasks.
//! - [`server`]: the axum WebSocket/HTTP transport.

pub mod adapters;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod server;
pub mod session;
pub mod wire;

pub use config::{ServerConfig, SessionConfig};
pub use error::{OrchestratorError, Result};
pub use runtime::RuntimeEvent;
pub use session::{Session, SessionRegistry, TurnPhase};
