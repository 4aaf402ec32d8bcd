//! Audio data types shared across the pipeline.
//!
//! Chunks are immutable once created: the sample buffer is reference-counted
//! so stages can hand them along without copying PCM data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Wire encoding of PCM samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit little-endian linear PCM.
    Linear16,
    /// 8-bit mu-law companded PCM (telephony).
    MuLaw,
}

impl AudioEncoding {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            AudioEncoding::Linear16 => 2,
            AudioEncoding::MuLaw => 1,
        }
    }
}

/// Sample format carried by every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFormat {
    /// Sample rate in Hz (e.g. 16000).
    pub sample_rate: u32,
    pub encoding: AudioEncoding,
    /// Channel count (1 for mono).
    pub channels: u16,
}

impl SampleFormat {
    pub fn new(sample_rate: u32, encoding: AudioEncoding, channels: u16) -> Self {
        Self {
            sample_rate,
            encoding,
            channels,
        }
    }

    /// Bytes of audio per second of playback.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.encoding.bytes_per_sample() * self.channels as usize
    }

    /// Playback duration of a buffer of `byte_len` bytes.
    pub fn duration_of(&self, byte_len: usize) -> Duration {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(byte_len as f64 / bps as f64)
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            encoding: AudioEncoding::Linear16,
            channels: 1,
        }
    }
}

/// One chunk of captured or synthesized audio.
///
/// `seq` increases monotonically within the producing stream so the playback
/// path can detect gaps instead of silently skipping them.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Shared immutable sample buffer.
    pub data: Arc<[u8]>,
    pub format: SampleFormat,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
}

impl AudioChunk {
    pub fn new(data: impl Into<Arc<[u8]>>, format: SampleFormat, seq: u64) -> Self {
        Self {
            data: data.into(),
            format,
            seq,
            timestamp: Utc::now(),
        }
    }

    /// Playback duration of this chunk.
    pub fn duration(&self) -> Duration {
        self.format.duration_of(self.data.len())
    }

    /// Whether this chunk directly follows `prev` in its stream.
    pub fn follows(&self, prev: &AudioChunk) -> bool {
        self.seq == prev.seq.wrapping_add(1)
    }
}

/// Voice-activity estimate for one capture chunk, supplied by the host
/// alongside the audio source. Binary detectors report 1.0/0.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VoiceActivitySample {
    pub seq: u64,
    pub probability: f32,
    pub timestamp: DateTime<Utc>,
}

impl VoiceActivitySample {
    pub fn new(seq: u64, probability: f32) -> Self {
        Self {
            seq,
            probability,
            timestamp: Utc::now(),
        }
    }

    /// Whether this sample counts as speech at the given threshold.
    pub fn is_speech(&self, threshold: f32) -> bool {
        self.probability > threshold
    }
}
