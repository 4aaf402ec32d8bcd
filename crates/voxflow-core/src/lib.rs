//! # voxflow-core — shared types for the voxflow conversation engine
//!
//! Data model, error taxonomy, and session configuration used by every stage
//! of the pipeline. The engine crate (`voxflow-engine`) builds the stages and
//! the orchestrator on top of these types.
//!
//! ```text
//! audio in ──► Transcription ──► Endpointing ──► Agent ──► Synthesis ──► Playback
//!                  │                                ▲
//!                  └── voice activity ──────────────┘ (barge-in, always live)
//! ```

pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod transcript;

pub use audio::{AudioChunk, AudioEncoding, SampleFormat, VoiceActivitySample};
pub use config::{
    AgentConfig, BufferConfig, EndpointingConfig, InterruptionConfig, SessionConfig,
    SynthesisConfig, TranscriptionConfig,
};
pub use conversation::{
    ConversationHistory, ConversationTurn, InterruptionCause, InterruptionSignal,
    ResponseFragment, Role,
};
pub use error::{EngineError, EngineResult, ProviderError};
pub use transcript::{EndpointReason, TranscriberEvent, TranscriptEvent, Utterance};
