//! Session lifecycle: identity, turn state, and the process-wide registry
//! (spec.md §3, §4.5, §5).

pub mod registry;
pub mod types;

pub use registry::{SessionHandle, SessionHealth, SessionRegistry};
pub use types::{ChatMessage, ChatRole, DropCounter, EpochGate, Session, TurnContext, TurnPhase};
