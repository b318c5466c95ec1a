//! Turn pipeline: the segmenter, barge-in gate, outbound scheduler, turn
//! actor, and the orchestrator that wires them into one running session
//! (spec.md §4).

pub mod gate;
pub mod messages;
pub mod orchestrator;
pub mod scheduler;
pub mod segmenter;
pub mod state_machine;

pub use gate::BargeInGate;
pub use messages::{AssistantToken, PcmChunk, SpeechSegment, Transcript};
pub use orchestrator::{spawn_session, InboundMessage, SessionRuntime, SessionTasks};
pub use scheduler::{OutboundItem, OutboundSender, OutboundSink};
pub use segmenter::Segmenter;
pub use state_machine::{TurnActor, TurnEvent};
