//! Capability-set interfaces for the three external streaming subsystems
//! (spec.md §4.2, §4.3). Concrete cloud adapters are out of scope; only the
//! trait contracts and deterministic mock implementations live here.

pub mod asr;
pub mod llm;
pub mod tts;

pub use asr::{AsrAdapter, AsrSession, MockAsrAdapter};
pub use llm::{HangingLlmAdapter, LlmAdapter, LlmStream, MockLlmAdapter};
pub use tts::{FailingTtsAdapter, FlakyTtsAdapter, MockTtsAdapter, TtsAdapter, TtsStream};
