//! Binary frame codec for the client→server audio channel (spec.md §3, §4.1).
//!
//! The codec is a pure adapter: it knows nothing about session or turn
//! state, only how to parse and validate bytes on the wire.

use crate::error::{OrchestratorError, Result};

/// Header size in bytes (`timestamp_ms` + `status_flags`, both `u32` LE).
const HEADER_LEN: usize = 8;

/// Bit 8 of `status_flags`: silence hint.
const SILENCE_HINT_BIT: u32 = 1 << 8;
/// Bit 9 of `status_flags`: first chunk of stream.
const FIRST_CHUNK_BIT: u32 = 1 << 9;
/// Mask for the reserved bits (10..=31), which must be zero.
const RESERVED_MASK: u32 = !0x3ff;

/// A parsed client→server audio frame (spec.md §3 `InboundAudioFrame`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundAudioFrame {
    pub timestamp_ms: u32,
    pub status_flags: u32,
    /// Raw PCM body: signed 16-bit little-endian, mono.
    pub pcm: Vec<u8>,
}

impl InboundAudioFrame {
    /// Coarse energy carried in the low byte of `status_flags` (0..=255).
    pub fn energy(&self) -> u8 {
        (self.status_flags & 0xff) as u8
    }

    /// Whether the silence hint bit is set.
    pub fn silence_hint(&self) -> bool {
        self.status_flags & SILENCE_HINT_BIT != 0
    }

    /// Whether this is the first chunk of a new utterance stream.
    pub fn first_chunk(&self) -> bool {
        self.status_flags & FIRST_CHUNK_BIT != 0
    }

    /// Encode this frame back to wire bytes. Used by tests and by any adapter
    /// that needs to re-frame audio (round-trip property P7).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.pcm.len());
        buf.extend_from_slice(&self.timestamp_ms.to_le_bytes());
        buf.extend_from_slice(&self.status_flags.to_le_bytes());
        buf.extend_from_slice(&self.pcm);
        buf
    }
}

/// Parse a binary client→server frame.
///
/// Returns `Err` for frames shorter than the header, bodies that aren't a
/// positive even number of bytes, or reserved bits that are set — the codec
/// does not attempt partial recovery; the caller is responsible for
/// incrementing a malformed-frame counter and emitting an `error` frame
/// (spec.md §4.1).
pub fn decode_inbound_audio(bytes: &[u8]) -> Result<InboundAudioFrame> {
    if bytes.len() < HEADER_LEN {
        return Err(OrchestratorError::ClientProtocol(format!(
            "binary frame too short: {} bytes, need at least {HEADER_LEN}",
            bytes.len()
        )));
    }

    let timestamp_ms = u32::from_le_bytes(bytes[0..4].try_into().expect("4 bytes"));
    let status_flags = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));

    if status_flags & RESERVED_MASK != 0 {
        return Err(OrchestratorError::ClientProtocol(
            "status_flags reserved bits (10..=31) must be zero".into(),
        ));
    }

    let body = &bytes[HEADER_LEN..];
    if body.is_empty() || body.len() % 2 != 0 {
        return Err(OrchestratorError::ClientProtocol(format!(
            "PCM body alignment violation: {} bytes is not a positive multiple of 2",
            body.len()
        )));
    }

    Ok(InboundAudioFrame {
        timestamp_ms,
        status_flags,
        pcm: body.to_vec(),
    })
}

/// Outbound binary PCM frames carry no header: raw bytes, delimited on the
/// text channel by `tts_start`/`tts_end`/`tts_stop` (spec.md §6.1).
pub fn encode_outbound_pcm(pcm: &[u8]) -> Vec<u8> {
    pcm.to_vec()
}
