//! Barge-in monitor.
//!
//! Armed while the agent is thinking or speaking. Sustained above-threshold
//! voice activity — or a single confident partial transcript — raises an
//! interruption signal; short noise and backchannels ("uh-huh") stay below
//! the sustained-speech requirement and are ignored.

use std::time::Instant;
use tracing::{debug, info};
use voxflow_core::{
    InterruptionCause, InterruptionConfig, InterruptionSignal, TranscriptEvent,
    VoiceActivitySample,
};

pub struct InterruptionMonitor {
    config: InterruptionConfig,
    vad_threshold: f32,
    armed_turn: Option<u64>,
    speech_since: Option<Instant>,
}

impl InterruptionMonitor {
    pub fn new(config: InterruptionConfig, vad_threshold: f32) -> Self {
        Self {
            config,
            vad_threshold,
            armed_turn: None,
            speech_since: None,
        }
    }

    /// Arm for the given agent turn. Voice activity only interrupts while
    /// armed.
    pub fn arm(&mut self, turn_id: u64) {
        self.armed_turn = Some(turn_id);
        self.speech_since = None;
        debug!(turn_id, "barge-in monitor armed");
    }

    pub fn disarm(&mut self) {
        self.armed_turn = None;
        self.speech_since = None;
    }

    pub fn is_armed(&self) -> bool {
        self.armed_turn.is_some()
    }

    /// Feed a voice-activity sample. Fires once speech has been continuous
    /// for the configured minimum; any silence resets the accumulation.
    pub fn observe_voice_activity(
        &mut self,
        sample: &VoiceActivitySample,
        now: Instant,
    ) -> Option<InterruptionSignal> {
        let turn_id = self.armed_turn?;
        if !self.config.enabled {
            return None;
        }
        if !sample.is_speech(self.vad_threshold) {
            self.speech_since = None;
            return None;
        }
        let since = *self.speech_since.get_or_insert(now);
        if now.duration_since(since) >= self.config.min_sustained_speech {
            info!(turn_id, "sustained user speech while agent active");
            self.disarm();
            return Some(InterruptionSignal::new(turn_id, InterruptionCause::BargeIn));
        }
        None
    }

    /// Feed a transcript event. A confident partial interrupts immediately.
    pub fn observe_transcript(&mut self, event: &TranscriptEvent) -> Option<InterruptionSignal> {
        let turn_id = self.armed_turn?;
        if !self.config.enabled {
            return None;
        }
        if event.text.trim().is_empty() || event.confidence < self.config.min_confidence {
            return None;
        }
        info!(turn_id, confidence = event.confidence, "confident transcript while agent active");
        self.disarm();
        Some(InterruptionSignal::new(turn_id, InterruptionCause::BargeIn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> InterruptionConfig {
        InterruptionConfig {
            enabled: true,
            min_sustained_speech: Duration::from_millis(150),
            min_confidence: 0.7,
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn sustained_speech_fires_once() {
        let mut monitor = InterruptionMonitor::new(config(), 0.5);
        let t0 = Instant::now();
        monitor.arm(3);

        assert!(monitor
            .observe_voice_activity(&VoiceActivitySample::new(0, 0.9), t0)
            .is_none());
        assert!(monitor
            .observe_voice_activity(&VoiceActivitySample::new(1, 0.9), t0 + ms(60))
            .is_none());
        let signal = monitor
            .observe_voice_activity(&VoiceActivitySample::new(2, 0.9), t0 + ms(160))
            .expect("interruption expected");
        assert_eq!(signal.turn_id, 3);
        assert_eq!(signal.cause, InterruptionCause::BargeIn);

        // Fired and disarmed: no second signal.
        assert!(monitor
            .observe_voice_activity(&VoiceActivitySample::new(3, 0.9), t0 + ms(400))
            .is_none());
    }

    #[test]
    fn silence_resets_accumulation() {
        let mut monitor = InterruptionMonitor::new(config(), 0.5);
        let t0 = Instant::now();
        monitor.arm(1);

        monitor.observe_voice_activity(&VoiceActivitySample::new(0, 0.9), t0);
        // A backchannel gap.
        monitor.observe_voice_activity(&VoiceActivitySample::new(1, 0.1), t0 + ms(80));
        // Speech resumes: the clock restarts, 100ms is not enough.
        assert!(monitor
            .observe_voice_activity(&VoiceActivitySample::new(2, 0.9), t0 + ms(100))
            .is_none());
        assert!(monitor
            .observe_voice_activity(&VoiceActivitySample::new(3, 0.9), t0 + ms(200))
            .is_none());
    }

    #[test]
    fn unarmed_monitor_never_fires() {
        let mut monitor = InterruptionMonitor::new(config(), 0.5);
        let t0 = Instant::now();

        assert!(monitor
            .observe_voice_activity(&VoiceActivitySample::new(0, 0.9), t0)
            .is_none());
        assert!(monitor
            .observe_voice_activity(&VoiceActivitySample::new(1, 0.9), t0 + ms(500))
            .is_none());
    }

    #[test]
    fn confident_partial_fires_immediately() {
        let mut monitor = InterruptionMonitor::new(config(), 0.5);
        monitor.arm(9);

        assert!(monitor
            .observe_transcript(&TranscriptEvent::partial(0, "wait", 0.4))
            .is_none());
        let signal = monitor
            .observe_transcript(&TranscriptEvent::partial(0, "wait stop", 0.85))
            .expect("interruption expected");
        assert_eq!(signal.turn_id, 9);
    }

    #[test]
    fn disabled_config_ignores_everything() {
        let mut cfg = config();
        cfg.enabled = false;
        let mut monitor = InterruptionMonitor::new(cfg, 0.5);
        let t0 = Instant::now();
        monitor.arm(1);

        monitor.observe_voice_activity(&VoiceActivitySample::new(0, 0.9), t0);
        assert!(monitor
            .observe_voice_activity(&VoiceActivitySample::new(1, 0.9), t0 + ms(500))
            .is_none());
        assert!(monitor
            .observe_transcript(&TranscriptEvent::partial(0, "stop", 0.99))
            .is_none());
    }
}
