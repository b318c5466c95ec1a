//! Message types passed between pipeline stages (spec.md §3).

/// An incremental or terminal recognition result from the ASR adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    Partial {
        turn_id: u64,
        text: String,
    },
    /// Terminal event of an utterance. At most one per turn.
    Final {
        turn_id: u64,
        text: String,
    },
}

impl Transcript {
    pub fn turn_id(&self) -> u64 {
        match self {
            Self::Partial { turn_id, .. } | Self::Final { turn_id, .. } => *turn_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Partial { text, .. } | Self::Final { text, .. } => text,
        }
    }
}

/// A single fragment emitted by the LLM token stream (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantToken {
    pub turn_id: u64,
    /// Epoch of the turn context that produced this token; stale epochs are
    /// discarded by the outbound scheduler rather than by the LLM stage.
    pub epoch: u64,
    pub fragment: String,
    /// True on the last token of a turn; `fragment` still holds only the
    /// final delta, the running buffer is accumulated by the caller.
    pub is_complete: bool,
}

/// A complete speakable unit produced by the sentence segmenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    pub turn_id: u64,
    pub epoch: u64,
    /// Monotonically increasing within a turn.
    pub segment_index: u64,
    pub text: String,
}

/// One chunk of synthesized PCM audio, ordered by `(segment_index, chunk_index)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmChunk {
    pub turn_id: u64,
    pub epoch: u64,
    pub segment_index: u64,
    pub chunk_index: u64,
    pub pcm: Vec<u8>,
}
