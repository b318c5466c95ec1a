//! VAD / barge-in gate: detects user speech during assistant playback from
//! inbound audio frame metadata (spec.md §4.7).
//!
//! Adapted from the RMS-energy thresholding approach in the teacher's energy
//! VAD: instead of computing RMS over raw samples, the gate reads the coarse
//! energy byte the wire codec already extracted from each frame's
//! `status_flags`, since the client reports it once per frame rather than
//! requiring the core to re-derive it from PCM.

use crate::config::BargeInConfig;
use crate::wire::InboundAudioFrame;

/// Tracks consecutive above-threshold frames and fires once a configured
/// dwell is reached. Only meaningful while the turn is in `THINKING` or
/// `SPEAKING`; the caller is responsible for not feeding it frames outside
/// those phases.
pub struct BargeInGate {
    energy_threshold: u8,
    dwell_frames: u32,
    consecutive_above: u32,
}

impl BargeInGate {
    pub fn new(config: &BargeInConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            dwell_frames: config.dwell_frames,
            consecutive_above: 0,
        }
    }

    /// Feed one inbound frame. Returns `true` exactly on the frame that
    /// completes the dwell count, i.e. barge-in fires once per dwell run.
    pub fn observe(&mut self, frame: &InboundAudioFrame) -> bool {
        let above_threshold = frame.energy() > self.energy_threshold && !frame.silence_hint();
        if !above_threshold {
            self.consecutive_above = 0;
            return false;
        }

        self.consecutive_above += 1;
        if self.consecutive_above == self.dwell_frames {
            // Keep counting so a longer burst doesn't retrigger on its own,
            // but also doesn't need to be reset by the caller.
            self.consecutive_above += 1;
            return true;
        }
        false
    }

    /// Reset dwell tracking, e.g. when a new turn begins.
    pub fn reset(&mut self) {
        self.consecutive_above = 0;
    }
}
