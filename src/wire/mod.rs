//! Wire-level types and codecs for the client↔server channel (spec.md §3, §6.1).

pub mod codec;
pub mod protocol;

pub use codec::{decode_inbound_audio, encode_outbound_pcm, InboundAudioFrame};
pub use protocol::{ClientCommand, ServerFrame, StatusKind};
