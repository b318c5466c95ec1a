//! Configuration types for the dialogue orchestrator.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the WebSocket/HTTP listener binds to.
    pub bind_addr: SocketAddr,
    /// Per-session tuning.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("valid default bind addr"),
            session: SessionConfig::default(),
        }
    }
}

/// Audio format constraints (spec.md §6.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Required inbound sample rate in Hz. The core never resamples.
    pub input_sample_rate: u32,
    /// Server TTS output sample rate in Hz.
    pub output_sample_rate: u32,
    /// Input channel count (1 = mono).
    pub input_channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            input_channels: 1,
        }
    }
}

/// Bounded-queue sizes between pipeline stages (spec.md §5 backpressure).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Inbound demux → ASR feed.
    pub asr_feed: usize,
    /// ASR event stream → state machine.
    pub asr_events: usize,
    /// LLM token stream → sentence segmenter.
    pub llm_tokens: usize,
    /// Segmenter → TTS.
    pub tts_input: usize,
    /// Any producer → outbound scheduler.
    pub outbound: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            asr_feed: 64,
            asr_events: 16,
            llm_tokens: 32,
            tts_input: 8,
            outbound: 64,
        }
    }
}

/// Barge-in / VAD gate configuration (spec.md §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInConfig {
    /// Energy threshold (0..=255, matches the wire status-flag scale) above
    /// which a frame is considered speech.
    pub energy_threshold: u8,
    /// Consecutive above-threshold frames required before firing barge-in.
    pub dwell_frames: u32,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 40,
            dwell_frames: 2,
        }
    }
}

/// Sentence segmenter configuration (spec.md §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Hard length bound (characters) that forces a segment flush.
    pub max_segment_chars: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_segment_chars: 180,
        }
    }
}

/// Timeout/deadline configuration (spec.md §5 "Timeouts").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for the LLM's first token, in milliseconds.
    pub llm_first_token_ms: u64,
    /// Deadline for the TTS adapter's first audio chunk, in milliseconds.
    pub tts_first_chunk_ms: u64,
    /// Overall per-turn deadline, in milliseconds.
    pub turn_overall_ms: u64,
    /// Bound on blocking the outbound PCM queue before treating the client
    /// as slow and initiating teardown, in milliseconds.
    pub outbound_pcm_block_ms: u64,
    /// Idle session timeout (no inbound frames), in seconds.
    pub idle_session_s: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            llm_first_token_ms: 5_000,
            tts_first_chunk_ms: 3_000,
            turn_overall_ms: 60_000,
            outbound_pcm_block_ms: 200,
            idle_session_s: 600,
        }
    }
}

/// Per-session configuration bundle handed to a new [`crate::session::Session`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub audio: AudioConfig,
    pub channels: ChannelConfig,
    pub barge_in: BargeInConfig,
    pub segmenter: SegmenterConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            channels: ChannelConfig::default(),
            barge_in: BargeInConfig::default(),
            segmenter: SegmenterConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// Parse a [`ServerConfig`] from a TOML string, falling back to defaults for
/// any field (or whole section) the document omits.
pub fn parse_toml(source: &str) -> crate::error::Result<ServerConfig> {
    toml::from_str(source).map_err(|e| crate::error::OrchestratorError::Config(e.to_string()))
}
