//! Endpointing detector: decides when the user's utterance has ended.
//!
//! Pure state machine driven by the orchestrator loop. A trailing-silence
//! timer (shortened once a final ends in sentence punctuation) declares the
//! turn boundary; a hard maximum utterance duration is the safety cutoff.
//! Late finals inside the grace period become corrections to the just-closed
//! utterance instead of opening a new one. Emits each utterance exactly once;
//! sub-threshold voice activity and too-short bursts emit nothing.

use std::time::{Duration, Instant};
use tracing::{debug, info};
use voxflow_core::{
    EndpointReason, EndpointingConfig, TranscriptEvent, Utterance, VoiceActivitySample,
};

/// Detector output.
#[derive(Debug, Clone)]
pub enum EndpointOutput {
    /// The user's turn is complete.
    TurnReady(Utterance),
    /// A late final arrived within the grace period; append it to the
    /// just-closed utterance.
    Correction { text: String },
}

pub struct EndpointingDetector {
    config: EndpointingConfig,
    emitted: u64,

    // Live turn state.
    parts: Vec<String>,
    partial: Option<String>,
    speech_started: Option<Instant>,
    last_voice: Option<Instant>,
    last_final: Option<Instant>,
    last_provider_utterance: Option<u64>,
    ends_with_punctuation: bool,

    // Grace window for late finals.
    closed_at: Option<Instant>,
    closed_provider_utterance: Option<u64>,
}

impl EndpointingDetector {
    pub fn new(config: EndpointingConfig) -> Self {
        Self {
            config,
            emitted: 0,
            parts: Vec::new(),
            partial: None,
            speech_started: None,
            last_voice: None,
            last_final: None,
            last_provider_utterance: None,
            ends_with_punctuation: false,
            closed_at: None,
            closed_provider_utterance: None,
        }
    }

    fn active(&self) -> bool {
        self.speech_started.is_some() || !self.parts.is_empty() || self.partial.is_some()
    }

    /// Feed a transcript event.
    pub fn observe_transcript(
        &mut self,
        event: &TranscriptEvent,
        now: Instant,
    ) -> Option<EndpointOutput> {
        if !event.is_final {
            self.partial = Some(event.text.clone());
            self.speech_started.get_or_insert(now);
            return None;
        }

        let within_grace = self
            .closed_at
            .is_some_and(|t| now.duration_since(t) <= self.config.grace_period);
        if !self.active()
            && within_grace
            && self.closed_provider_utterance == Some(event.utterance_id)
        {
            debug!(text = %event.text, "late final folded into closed utterance");
            return Some(EndpointOutput::Correction {
                text: event.text.clone(),
            });
        }

        if !event.text.trim().is_empty() {
            self.parts.push(event.text.clone());
        }
        self.partial = None;
        self.last_final = Some(now);
        self.last_provider_utterance = Some(event.utterance_id);
        self.speech_started.get_or_insert(now);
        self.ends_with_punctuation = event.text.trim_end().ends_with(['.', '!', '?']);
        None
    }

    /// Feed a voice-activity sample.
    pub fn observe_voice_activity(
        &mut self,
        sample: &VoiceActivitySample,
        now: Instant,
    ) -> Option<EndpointOutput> {
        if sample.is_speech(self.config.vad_threshold) {
            self.speech_started.get_or_insert(now);
            self.last_voice = Some(now);
        }
        None
    }

    fn silence_timeout(&self) -> Duration {
        if self.ends_with_punctuation {
            self.config.punctuation_cutoff
        } else {
            self.config.silence_timeout
        }
    }

    fn silence_base(&self) -> Option<Instant> {
        match (self.last_final, self.last_voice) {
            (Some(f), Some(v)) => Some(f.max(v)),
            (Some(f), None) => Some(f),
            (None, Some(v)) => Some(v),
            (None, None) => None,
        }
    }

    /// When the orchestrator should call `tick` next.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut deadline: Option<Instant> = None;
        if let Some(start) = self.speech_started {
            deadline = Some(start + self.config.max_utterance);
        }
        if let Some(base) = self.silence_base() {
            if !self.parts.is_empty() {
                let d = base + self.silence_timeout();
                deadline = Some(deadline.map_or(d, |cur| cur.min(d)));
            } else if self.active() {
                // Transcript-less burst: time it out quietly.
                let d = base + self.config.silence_timeout;
                deadline = Some(deadline.map_or(d, |cur| cur.min(d)));
            }
        }
        deadline
    }

    /// Evaluate timers. Returns at most one boundary per user turn.
    pub fn tick(&mut self, now: Instant) -> Option<EndpointOutput> {
        if let Some(start) = self.speech_started {
            if now.duration_since(start) >= self.config.max_utterance {
                return self.commit(EndpointReason::MaxDuration, now);
            }
        }
        if let Some(base) = self.silence_base() {
            if !self.parts.is_empty() {
                if now.duration_since(base) >= self.silence_timeout() {
                    return self.commit(EndpointReason::SilenceTimeout, now);
                }
            } else if self.active() && self.partial.is_none() {
                if now.duration_since(base) >= self.config.silence_timeout {
                    debug!("transcript-less voice burst discarded");
                    self.reset_live();
                }
            }
        }
        None
    }

    /// Host-driven boundary (e.g. push-to-talk release).
    pub fn explicit_cutoff(&mut self, now: Instant) -> Option<EndpointOutput> {
        if self.active() {
            self.commit(EndpointReason::ExplicitCutoff, now)
        } else {
            None
        }
    }

    fn commit(&mut self, reason: EndpointReason, now: Instant) -> Option<EndpointOutput> {
        let mut text = self.parts.join(" ");
        if matches!(
            reason,
            EndpointReason::MaxDuration | EndpointReason::ExplicitCutoff
        ) {
            // Cutoffs may land mid-word; keep the best-effort partial.
            if let Some(partial) = self.partial.take() {
                let partial = partial.trim();
                if !partial.is_empty() {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(partial);
                }
            }
        }

        let duration = match (self.speech_started, self.last_voice.or(self.last_final)) {
            (Some(start), Some(end)) if end > start => end.duration_since(start),
            (Some(start), _) => now.duration_since(start),
            _ => Duration::ZERO,
        };
        let too_short = duration < self.config.min_speech;
        let closed_id = self.last_provider_utterance.take();
        self.reset_live();

        if text.trim().is_empty() || too_short {
            debug!(?duration, "turn candidate dropped (noise or too short)");
            return None;
        }

        self.closed_at = Some(now);
        self.closed_provider_utterance = closed_id;
        let utterance = Utterance::new(self.emitted, text, duration, reason);
        self.emitted += 1;
        info!(text = %utterance.text, ?reason, "utterance committed");
        Some(EndpointOutput::TurnReady(utterance))
    }

    fn reset_live(&mut self) {
        self.parts.clear();
        self.partial = None;
        self.speech_started = None;
        self.last_voice = None;
        self.last_final = None;
        self.last_provider_utterance = None;
        self.ends_with_punctuation = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EndpointingConfig {
        EndpointingConfig {
            silence_timeout: Duration::from_millis(800),
            punctuation_cutoff: Duration::from_millis(400),
            grace_period: Duration::from_millis(300),
            max_utterance: Duration::from_secs(30),
            min_speech: Duration::from_millis(200),
            vad_threshold: 0.5,
        }
    }

    fn speech(seq: u64) -> VoiceActivitySample {
        VoiceActivitySample::new(seq, 0.9)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn exactly_one_utterance_per_silence_window() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_voice_activity(&speech(0), t0);
        detector.observe_transcript(
            &TranscriptEvent::finalized(0, "book a flight to Boston", 0.95),
            t0 + ms(600),
        );

        assert!(detector.tick(t0 + ms(900)).is_none());

        let out = detector.tick(t0 + ms(1500)).expect("boundary expected");
        match out {
            EndpointOutput::TurnReady(utterance) => {
                assert_eq!(utterance.text, "book a flight to Boston");
                assert_eq!(utterance.endpoint, EndpointReason::SilenceTimeout);
            }
            other => panic!("unexpected output: {other:?}"),
        }

        // Never two.
        assert!(detector.tick(t0 + ms(3000)).is_none());
        assert!(detector.next_deadline().is_none());
    }

    #[test]
    fn voice_activity_defers_the_boundary() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_transcript(&TranscriptEvent::finalized(0, "let me think", 0.9), t0);
        // User hums along; silence base moves forward.
        detector.observe_voice_activity(&speech(0), t0 + ms(700));

        assert!(detector.tick(t0 + ms(900)).is_none());
        assert!(detector.tick(t0 + ms(1501)).is_some());
    }

    #[test]
    fn punctuated_final_commits_sooner() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_voice_activity(&speech(0), t0);
        detector
            .observe_transcript(&TranscriptEvent::finalized(0, "That is all.", 0.9), t0 + ms(300));

        // Past the punctuation cutoff, before the full silence timeout.
        let out = detector.tick(t0 + ms(750));
        assert!(matches!(out, Some(EndpointOutput::TurnReady(_))));
    }

    #[test]
    fn late_final_within_grace_becomes_correction() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_voice_activity(&speech(0), t0);
        detector.observe_transcript(&TranscriptEvent::finalized(7, "book a flight", 0.9), t0 + ms(400));
        let committed = detector.tick(t0 + ms(1300));
        assert!(matches!(committed, Some(EndpointOutput::TurnReady(_))));

        let late = detector.observe_transcript(
            &TranscriptEvent::finalized(7, "to Boston", 0.9),
            t0 + ms(1500),
        );
        match late {
            Some(EndpointOutput::Correction { text }) => assert_eq!(text, "to Boston"),
            other => panic!("expected correction, got {other:?}"),
        }
    }

    #[test]
    fn late_final_past_grace_opens_new_turn() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_voice_activity(&speech(0), t0);
        detector.observe_transcript(&TranscriptEvent::finalized(7, "book a flight", 0.9), t0 + ms(400));
        assert!(detector.tick(t0 + ms(1300)).is_some());

        // 500ms after the close: grace (300ms) has elapsed.
        let late = detector.observe_transcript(
            &TranscriptEvent::finalized(8, "to Boston", 0.9),
            t0 + ms(1800),
        );
        assert!(late.is_none());
        detector.observe_voice_activity(&speech(1), t0 + ms(1800));
        let out = detector.tick(t0 + ms(3000));
        match out {
            Some(EndpointOutput::TurnReady(utterance)) => {
                assert_eq!(utterance.text, "to Boston")
            }
            other => panic!("expected new turn, got {other:?}"),
        }
    }

    #[test]
    fn max_duration_is_a_safety_cutoff() {
        let mut cfg = config();
        cfg.max_utterance = Duration::from_secs(2);
        let mut detector = EndpointingDetector::new(cfg);
        let t0 = Instant::now();

        detector.observe_voice_activity(&speech(0), t0);
        // Keep talking: finals and voice activity keep deferring silence.
        detector.observe_transcript(&TranscriptEvent::finalized(0, "and then", 0.9), t0 + ms(500));
        detector.observe_voice_activity(&speech(1), t0 + ms(1900));
        detector.observe_transcript(&TranscriptEvent::partial(1, "and also", 0.5), t0 + ms(1950));

        let out = detector.tick(t0 + ms(2000)).expect("cutoff expected");
        match out {
            EndpointOutput::TurnReady(utterance) => {
                assert_eq!(utterance.endpoint, EndpointReason::MaxDuration);
                // Cutoff keeps the trailing partial, best effort.
                assert_eq!(utterance.text, "and then and also");
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn transcriptless_noise_never_emits() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_voice_activity(&speech(0), t0);
        detector.observe_voice_activity(&speech(1), t0 + ms(60));

        assert!(detector.tick(t0 + ms(900)).is_none());
        // Burst timed out quietly; no deadline remains.
        assert!(detector.next_deadline().is_none());
    }

    #[test]
    fn below_threshold_samples_ignored() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_voice_activity(&VoiceActivitySample::new(0, 0.2), t0);
        assert!(detector.next_deadline().is_none());
    }

    #[test]
    fn too_short_burst_dropped() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_voice_activity(&speech(0), t0);
        // A 50ms "uh" with a transcript, then silence.
        detector.observe_voice_activity(&speech(1), t0 + ms(50));
        detector.observe_transcript(&TranscriptEvent::finalized(0, "uh", 0.4), t0 + ms(50));

        assert!(detector.tick(t0 + ms(1000)).is_none());
    }

    #[test]
    fn explicit_cutoff_keeps_partial() {
        let mut detector = EndpointingDetector::new(config());
        let t0 = Instant::now();

        detector.observe_voice_activity(&speech(0), t0);
        detector.observe_transcript(&TranscriptEvent::finalized(0, "call my", 0.9), t0 + ms(400));
        detector.observe_transcript(&TranscriptEvent::partial(1, "dentist", 0.6), t0 + ms(600));

        let out = detector.explicit_cutoff(t0 + ms(700)).expect("cutoff");
        match out {
            EndpointOutput::TurnReady(utterance) => {
                assert_eq!(utterance.endpoint, EndpointReason::ExplicitCutoff);
                assert_eq!(utterance.text, "call my dentist");
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
