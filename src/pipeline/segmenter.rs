//! Sentence segmenter: groups LLM tokens into speakable units (spec.md §4.6).

use crate::pipeline::messages::SpeechSegment;

/// ASCII sentence-terminating punctuation: flushes once followed by
/// whitespace or stream end, so "3.14" and "Dr." mid-sentence don't split.
const ASCII_TERMINATORS: [char; 3] = ['.', '?', '!'];

/// CJK sentence-terminating punctuation: flushes immediately, since CJK
/// prose has no space between sentences.
const CJK_TERMINATORS: [char; 3] = ['。', '？', '！'];

/// Stateless across turns: construct one per turn.
pub struct Segmenter {
    turn_id: u64,
    epoch: u64,
    max_segment_chars: usize,
    buffer: String,
    next_segment_index: u64,
    /// Set once a terminator has been buffered; the segment flushes once the
    /// following character (whitespace) arrives, or at stream end.
    pending_terminator: bool,
}

impl Segmenter {
    pub fn new(turn_id: u64, epoch: u64, max_segment_chars: usize) -> Self {
        Self {
            turn_id,
            epoch,
            max_segment_chars,
            buffer: String::new(),
            next_segment_index: 0,
            pending_terminator: false,
        }
    }

    /// Feed one token fragment. Returns any segments the fragment completed,
    /// in order (ordinarily zero or one, but a fragment containing multiple
    /// terminators can complete more than one).
    pub fn push(&mut self, fragment: &str) -> Vec<SpeechSegment> {
        let mut completed = Vec::new();
        for ch in fragment.chars() {
            if self.pending_terminator && ch.is_whitespace() {
                self.buffer.push(ch);
                self.pending_terminator = false;
                completed.push(self.flush());
                continue;
            }
            self.pending_terminator = false;

            self.buffer.push(ch);
            if CJK_TERMINATORS.contains(&ch) {
                completed.push(self.flush());
            } else if ASCII_TERMINATORS.contains(&ch) {
                self.pending_terminator = true;
            } else if self.buffer.chars().count() >= self.max_segment_chars {
                completed.push(self.flush());
            }
        }
        completed
    }

    /// Flush whatever remains in the buffer, e.g. on stream end. Returns
    /// `None` if the buffer is empty.
    pub fn finish(&mut self) -> Option<SpeechSegment> {
        self.pending_terminator = false;
        if self.buffer.trim().is_empty() {
            self.buffer.clear();
            return None;
        }
        Some(self.flush())
    }

    fn flush(&mut self) -> SpeechSegment {
        self.pending_terminator = false;
        let text = std::mem::take(&mut self.buffer);
        let segment_index = self.next_segment_index;
        self.next_segment_index += 1;
        SpeechSegment {
            turn_id: self.turn_id,
            epoch: self.epoch,
            segment_index,
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushes_on_terminal_punctuation() {
        let mut seg = Segmenter::new(1, 0, 180);
        let out = seg.push("Hello there. ");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "Hello there. ");
        assert_eq!(out[0].segment_index, 0);
    }

    #[test]
    fn flushes_on_length_bound() {
        let mut seg = Segmenter::new(1, 0, 10);
        let out = seg.push("0123456789extra");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text.chars().count(), 10);
    }

    #[test]
    fn finish_flushes_trailing_partial_sentence() {
        let mut seg = Segmenter::new(1, 0, 180);
        seg.push("no terminator yet");
        let tail = seg.finish().unwrap();
        assert_eq!(tail.text, "no terminator yet");
    }

    #[test]
    fn finish_on_empty_buffer_yields_nothing() {
        let mut seg = Segmenter::new(1, 0, 180);
        assert!(seg.finish().is_none());
    }

    #[test]
    fn segment_indices_increase_monotonically() {
        let mut seg = Segmenter::new(1, 0, 180);
        let first = seg.push("One. Two. ");
        assert_eq!(
            first.iter().map(|s| s.segment_index).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn handles_cjk_terminators() {
        let mut seg = Segmenter::new(1, 0, 180);
        let out = seg.push("你好。再见。");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "你好。");
        assert_eq!(out[1].text, "再见。");
    }
}
