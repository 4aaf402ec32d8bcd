//! Provider capability interfaces.
//!
//! One trait per stage type; one implementation per vendor, selected at
//! session construction. Callback-heavy vendor APIs are normalized to the
//! same shape everywhere: the producer pushes into a bounded channel and the
//! consumer iterates, so the orchestrator never sees a vendor's concurrency
//! idiom.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use voxflow_core::{
    AudioChunk, ConversationTurn, ProviderError, ResponseFragment, SampleFormat, TranscriptEvent,
    Utterance,
};

/// Streaming speech-to-text capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Open a transcription session for audio in `format`.
    ///
    /// Closing the returned `feed` sender flushes pending finals and ends
    /// the event stream.
    async fn open(&self, format: SampleFormat) -> Result<TranscriberStream, ProviderError>;
}

/// One live transcriber session, normalized to channels.
pub struct TranscriberStream {
    /// Audio into the provider.
    pub feed: mpsc::Sender<AudioChunk>,
    /// Partial and final transcripts out. An `Err` item reports a session
    /// failure; the stream ends after it.
    pub events: mpsc::Receiver<Result<TranscriptEvent, ProviderError>>,
}

/// Finalized utterance plus the history snapshot handed to the agent.
#[derive(Debug, Clone)]
pub struct AgentPrompt {
    pub utterance: Utterance,
    pub history: Vec<ConversationTurn>,
}

/// Language-model completion capability.
#[async_trait]
pub trait AgentProvider: Send + Sync {
    /// Begin generating a reply. Fragment `seq` starts at 0 and increases by
    /// one; the terminal fragment should carry `is_last` (closing the channel
    /// without it is tolerated). Dropping the stream cancels generation and
    /// must not corrupt the provider session for the next turn.
    async fn complete(&self, prompt: AgentPrompt) -> Result<FragmentStream, ProviderError>;
}

/// Lazy, finite sequence of response fragments.
pub struct FragmentStream {
    pub fragments: mpsc::Receiver<Result<ResponseFragment, ProviderError>>,
}

impl FragmentStream {
    /// Adapt to a `Stream` of items for combinator-style consumers.
    pub fn into_stream(self) -> ReceiverStream<Result<ResponseFragment, ProviderError>> {
        ReceiverStream::new(self.fragments)
    }
}

/// Audio synthesized for one fragment. The synthesis stage reassigns the
/// outgoing chunk sequence numbers; `fragment_seq` ties audio back to text.
#[derive(Debug, Clone)]
pub struct SynthesizedChunk {
    pub chunk: AudioChunk,
    pub fragment_seq: u64,
}

/// Streaming text-to-speech capability.
#[async_trait]
pub trait SynthesizerProvider: Send + Sync {
    /// Begin streaming synthesis. Pipelined: audio for the first fragment
    /// must start flowing before later fragments arrive, and emitted audio
    /// preserves fragment order. An `Err(Transient)` item marks a
    /// per-fragment failure — the stream continues with the next fragment;
    /// `Err(Fatal)` ends it. Dropping the stream cancels synthesis.
    async fn speak(
        &self,
        format: SampleFormat,
        fragments: mpsc::Receiver<ResponseFragment>,
    ) -> Result<SynthesisStream, ProviderError>;
}

/// Lazy sequence of synthesized audio.
pub struct SynthesisStream {
    pub audio: mpsc::Receiver<Result<SynthesizedChunk, ProviderError>>,
}

impl SynthesisStream {
    pub fn into_stream(self) -> ReceiverStream<Result<SynthesizedChunk, ProviderError>> {
        ReceiverStream::new(self.audio)
    }
}
