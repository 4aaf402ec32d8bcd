//! Transcript events and finalized utterances.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Incremental transcript for one provider utterance.
///
/// Partials with the same `utterance_id` supersede earlier partials; a final
/// event closes the utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub utterance_id: u64,
    pub text: String,
    pub is_final: bool,
    /// Provider confidence in 0.0..=1.0.
    pub confidence: f32,
    /// Offset of the first word from session start.
    pub start: Duration,
    /// Offset of the last word from session start.
    pub end: Duration,
}

impl TranscriptEvent {
    pub fn partial(utterance_id: u64, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            utterance_id,
            text: text.into(),
            is_final: false,
            confidence,
            start: Duration::ZERO,
            end: Duration::ZERO,
        }
    }

    pub fn finalized(utterance_id: u64, text: impl Into<String>, confidence: f32) -> Self {
        Self {
            utterance_id,
            text: text.into(),
            is_final: true,
            confidence,
            start: Duration::ZERO,
            end: Duration::ZERO,
        }
    }

    pub fn with_offsets(mut self, start: Duration, end: Duration) -> Self {
        self.start = start;
        self.end = end;
        self
    }
}

/// Output of the transcription stage.
#[derive(Debug, Clone)]
pub enum TranscriberEvent {
    Transcript(TranscriptEvent),
    /// Audio was dropped past the reconnect watermark; the transcript has a
    /// hole of roughly this length.
    Gap { dropped: Duration },
}

/// Why an utterance boundary was declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointReason {
    SilenceTimeout,
    ExplicitCutoff,
    MaxDuration,
}

/// One finalized user turn, ready for the agent. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    /// Engine-assigned, monotonic per session.
    pub utterance_id: u64,
    pub text: String,
    /// Approximate speech duration.
    pub duration: Duration,
    pub endpoint: EndpointReason,
    pub captured_at: DateTime<Utc>,
}

impl Utterance {
    pub fn new(
        utterance_id: u64,
        text: impl Into<String>,
        duration: Duration,
        endpoint: EndpointReason,
    ) -> Self {
        Self {
            utterance_id,
            text: text.into(),
            duration,
            endpoint,
            captured_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_then_final() {
        let p = TranscriptEvent::partial(0, "book a", 0.4);
        let f = TranscriptEvent::finalized(0, "book a flight", 0.92);
        assert!(!p.is_final);
        assert!(f.is_final);
        assert_eq!(p.utterance_id, f.utterance_id);
    }

    #[test]
    fn offsets_builder() {
        let ev = TranscriptEvent::finalized(1, "hello", 0.9)
            .with_offsets(Duration::from_millis(100), Duration::from_millis(600));
        assert_eq!(ev.start, Duration::from_millis(100));
        assert_eq!(ev.end, Duration::from_millis(600));
    }
}
