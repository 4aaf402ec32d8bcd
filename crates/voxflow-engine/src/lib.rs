//! # voxflow-engine — real-time conversation orchestration
//!
//! Drives a duplex voice session: the user speaks, a transcriber produces
//! incremental transcripts, an endpointing detector declares the turn
//! boundary, an agent generates a reply, a synthesizer streams audio back —
//! and a barge-in monitor watches the voice-activity signal the whole time so
//! the agent can be cut off within tens of milliseconds.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Conversation Orchestrator                    │
//! │  ┌────────────┐   ┌─────────────┐   ┌───────┐   ┌───────────┐  │
//! │  │ Transcribe │ → │ Endpointing │ → │ Agent │ → │ Synthesis │  │
//! │  └────────────┘   └─────────────┘   └───────┘   └───────────┘  │
//! │        ↑                 │               ↑            │         │
//! │   audio chunks      voice activity   cancel (ack'd)   ▼         │
//! │        │                 │                      ┌──────────┐    │
//! │        │          ┌─────────────┐   flush       │ Playback │    │
//! │        └──────────│  Barge-in   │──────────────►│   Sink   │    │
//! │                   │   monitor   │  kill-switch  └──────────┘    │
//! │                   └─────────────┘                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every stage is a task; stages talk over bounded channels. Cancellation is
//! cooperative but synchronously acknowledged, and the playback sink hands
//! out per-turn tokens, so stale audio after an interruption flush is
//! structurally impossible.

pub mod agent;
pub mod cancel;
pub mod endpointing;
pub mod interruption;
pub mod orchestrator;
pub mod playback;
pub mod providers;
pub mod scripted;
pub mod session;
pub mod synthesis;
pub mod transcription;

pub use agent::{AgentHandle, AgentStage};
pub use cancel::{cancel_pair, CancelAck, CancelHandle, CancelListener};
pub use endpointing::{EndpointOutput, EndpointingDetector};
pub use interruption::InterruptionMonitor;
pub use orchestrator::ConversationEngine;
pub use playback::{BufferedPlayback, PlaybackSink, TurnToken};
pub use providers::{
    AgentPrompt, AgentProvider, FragmentStream, SynthesisStream, SynthesizedChunk, Transcriber,
    TranscriberStream, SynthesizerProvider,
};
pub use scripted::{
    FlakyAgent, ScriptedTranscriber, SessionFailure, StaticAgent, ToneSynthesizer,
};
pub use session::{
    ConversationState, SessionCommand, SessionEvent, SessionHandle, SessionInput,
};
pub use synthesis::{PlaybackItem, SynthHandle, SynthesisStage};
pub use transcription::{TranscriptionHandle, TranscriptionStage};
