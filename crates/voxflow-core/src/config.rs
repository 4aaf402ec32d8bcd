//! Session configuration.
//!
//! Silence timeouts and barge-in sensitivity are product tuning, not
//! structure: everything lives here and nothing is hard-coded in the stages.

use crate::audio::SampleFormat;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Turn-boundary detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointingConfig {
    /// Silence after the last final transcript before the turn commits
    /// (default: 800ms).
    pub silence_timeout: Duration,

    /// Shorter cutoff once the last final ends in sentence punctuation
    /// (default: 400ms).
    pub punctuation_cutoff: Duration,

    /// Late finals within this window amend the just-closed utterance
    /// instead of opening a new one (default: 300ms).
    pub grace_period: Duration,

    /// Hard cap per utterance before auto-commit (default: 30s).
    pub max_utterance: Duration,

    /// Speech bursts shorter than this are dropped as noise (default: 200ms).
    pub min_speech: Duration,

    /// Voice-activity probability above this counts as speech (default: 0.5).
    pub vad_threshold: f32,
}

impl Default for EndpointingConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_millis(800),
            punctuation_cutoff: Duration::from_millis(400),
            grace_period: Duration::from_millis(300),
            max_utterance: Duration::from_secs(30),
            min_speech: Duration::from_millis(200),
            vad_threshold: 0.5,
        }
    }
}

/// Barge-in sensitivity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptionConfig {
    pub enabled: bool,

    /// Sustained above-threshold speech required to interrupt the agent
    /// (default: 150ms). Filters out noise and short backchannels.
    pub min_sustained_speech: Duration,

    /// A partial transcript at or above this confidence interrupts
    /// immediately (default: 0.7).
    pub min_confidence: f32,
}

impl Default for InterruptionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_sustained_speech: Duration::from_millis(150),
            min_confidence: 0.7,
        }
    }
}

/// Transcription stage resilience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Audio buffered across provider reconnects. Beyond this the oldest is
    /// dropped and a gap marker emitted instead of blocking (default: 5s).
    pub backlog_watermark: Duration,

    /// Reconnect attempts before the stage gives up (default: 5).
    pub max_reconnect_attempts: u32,

    /// Initial reconnect backoff, doubled per attempt (default: 250ms).
    pub reconnect_backoff: Duration,

    /// Deadline per provider call (default: 10s).
    pub provider_deadline: Duration,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            backlog_watermark: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            reconnect_backoff: Duration::from_millis(250),
            provider_deadline: Duration::from_secs(10),
        }
    }
}

/// Agent stage retry and fallback policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Retries after a transient failure with nothing emitted yet
    /// (default: 1).
    pub max_retries: u32,

    /// Backoff before a retry, doubled per attempt (default: 250ms).
    pub retry_backoff: Duration,

    /// Deadline for opening the completion stream (default: 30s).
    pub provider_deadline: Duration,

    /// Spoken when retries are exhausted, instead of silence.
    pub fallback_utterance: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_backoff: Duration::from_millis(250),
            provider_deadline: Duration::from_secs(30),
            fallback_utterance: "Sorry, could you say that again?".to_string(),
        }
    }
}

/// Synthesis stage policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Deadline for opening the synthesis stream (default: 30s).
    pub provider_deadline: Duration,

    /// Substitute a short tone for a fragment that fails non-fatally instead
    /// of aborting the whole turn (default: true).
    pub fallback_tone_on_error: bool,

    /// Length of the substituted tone (default: 200ms).
    pub fallback_tone_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider_deadline: Duration::from_secs(30),
            fallback_tone_on_error: true,
            fallback_tone_ms: 200,
        }
    }
}

/// Bounded queue capacities between stages. A slow downstream blocks or
/// drops per stage policy, never grows unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    pub audio_queue: usize,
    pub transcript_queue: usize,
    pub fragment_queue: usize,
    pub playback_queue: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            audio_queue: 64,
            transcript_queue: 32,
            fragment_queue: 32,
            playback_queue: 64,
        }
    }
}

/// Everything a session needs, supplied by the host at `start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub format: SampleFormat,
    pub endpointing: EndpointingConfig,
    pub interruption: InterruptionConfig,
    pub transcription: TranscriptionConfig,
    pub agent: AgentConfig,
    pub synthesis: SynthesisConfig,
    pub buffers: BufferConfig,
    /// How long a cancelled stage has to acknowledge before its output is
    /// force-dropped (default: 500ms).
    pub cancel_ack_deadline: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: SampleFormat::default(),
            endpointing: EndpointingConfig::default(),
            interruption: InterruptionConfig::default(),
            transcription: TranscriptionConfig::default(),
            agent: AgentConfig::default(),
            synthesis: SynthesisConfig::default(),
            buffers: BufferConfig::default(),
            cancel_ack_deadline: Duration::from_millis(500),
        }
    }
}

impl SessionConfig {
    pub fn with_format(format: SampleFormat) -> Self {
        Self {
            format,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.format.sample_rate == 0 {
            return Err(EngineError::Config("sample rate must be non-zero".into()));
        }
        if self.format.channels == 0 {
            return Err(EngineError::Config("channel count must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&self.endpointing.vad_threshold) {
            return Err(EngineError::Config(format!(
                "vad_threshold must be within 0..=1, got {}",
                self.endpointing.vad_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.interruption.min_confidence) {
            return Err(EngineError::Config(format!(
                "min_confidence must be within 0..=1, got {}",
                self.interruption.min_confidence
            )));
        }
        if self.endpointing.silence_timeout.is_zero() {
            return Err(EngineError::Config("silence_timeout must be non-zero".into()));
        }
        if self.endpointing.punctuation_cutoff > self.endpointing.silence_timeout {
            return Err(EngineError::Config(
                "punctuation_cutoff must not exceed silence_timeout".into(),
            ));
        }
        if self.buffers.audio_queue == 0
            || self.buffers.transcript_queue == 0
            || self.buffers.fragment_queue == 0
            || self.buffers.playback_queue == 0
        {
            return Err(EngineError::Config("queue capacities must be non-zero".into()));
        }
        if self.cancel_ack_deadline.is_zero() {
            return Err(EngineError::Config("cancel_ack_deadline must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioEncoding;

    #[test]
    fn defaults_validate() {
        assert!(SessionConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_threshold_rejected() {
        let mut config = SessionConfig::default();
        config.endpointing.vad_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_confidence_rejected() {
        let mut config = SessionConfig::default();
        config.interruption.min_confidence = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_rate_rejected() {
        let config = SessionConfig::with_format(SampleFormat::new(
            0,
            AudioEncoding::Linear16,
            1,
        ));
        assert!(config.validate().is_err());
    }
}
