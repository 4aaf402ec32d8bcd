//! Scripted provider backends.
//!
//! Deterministic in-process implementations of the capability interfaces.
//! They stand in for vendor integrations during development and drive the
//! integration tests: the transcriber replays a scripted event timeline keyed
//! on fed audio, the agent returns a fixed reply split at clause boundaries,
//! and the synthesizer emits a fixed number of tone chunks per fragment.

use crate::providers::{
    AgentPrompt, AgentProvider, FragmentStream, SynthesisStream, SynthesizedChunk, Transcriber,
    TranscriberStream, SynthesizerProvider,
};
use crate::synthesis::tone_chunk;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;
use voxflow_core::{AudioChunk, ProviderError, ResponseFragment, SampleFormat, TranscriptEvent};

/// Split a reply into clause-granularity fragments, keeping delimiters so the
/// concatenation equals the original text.
pub fn split_clauses(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, ',' | '.' | '!' | '?') {
            parts.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}

/// Planned failure for one scripted transcriber session.
#[derive(Debug, Clone)]
pub struct SessionFailure {
    /// The session dies after this many fed chunks.
    pub after_chunks: usize,
    pub error: ProviderError,
}

/// Transcriber that replays scripted events when given audio chunk sequence
/// numbers are fed. Each `open` consumes the next planned failure, so tests
/// can script "first session drops, reconnect succeeds".
pub struct ScriptedTranscriber {
    script: Arc<HashMap<u64, Vec<TranscriptEvent>>>,
    failures: Arc<Mutex<VecDeque<SessionFailure>>>,
    opened: AtomicU32,
}

impl ScriptedTranscriber {
    pub fn new(script: impl IntoIterator<Item = (u64, Vec<TranscriptEvent>)>) -> Self {
        Self {
            script: Arc::new(script.into_iter().collect()),
            failures: Arc::new(Mutex::new(VecDeque::new())),
            opened: AtomicU32::new(0),
        }
    }

    /// Queue failures consumed by successive sessions, in order.
    pub fn with_failures(self, failures: impl IntoIterator<Item = SessionFailure>) -> Self {
        {
            let mut queue = self
                .failures
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            queue.extend(failures);
        }
        self
    }

    /// Number of sessions opened so far.
    pub fn sessions_opened(&self) -> u32 {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn open(&self, _format: SampleFormat) -> Result<TranscriberStream, ProviderError> {
        let session = self.opened.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front();
        let script = Arc::clone(&self.script);

        let (feed_tx, mut feed_rx) = mpsc::channel::<AudioChunk>(32);
        let (event_tx, event_rx) = mpsc::channel(32);

        tokio::spawn(async move {
            debug!(session, "scripted transcriber session open");
            let mut fed = 0usize;
            while let Some(chunk) = feed_rx.recv().await {
                fed += 1;
                if let Some(ref failure) = failure {
                    if fed > failure.after_chunks {
                        let _ = event_tx.send(Err(failure.error.clone())).await;
                        return;
                    }
                }
                if let Some(events) = script.get(&chunk.seq) {
                    for event in events {
                        if event_tx.send(Ok(event.clone())).await.is_err() {
                            return;
                        }
                    }
                }
            }
            // Feed closed: nothing pending in a scripted session, end cleanly.
        });

        Ok(TranscriberStream {
            feed: feed_tx,
            events: event_rx,
        })
    }
}

/// Agent that answers every utterance with the same reply, paced fragment by
/// fragment.
pub struct StaticAgent {
    reply: String,
    fragment_delay: Duration,
}

impl StaticAgent {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            fragment_delay: Duration::ZERO,
        }
    }

    /// Delay before each fragment, to exercise cancellation mid-generation.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }
}

#[async_trait]
impl AgentProvider for StaticAgent {
    async fn complete(&self, _prompt: AgentPrompt) -> Result<FragmentStream, ProviderError> {
        let parts = split_clauses(&self.reply);
        let delay = self.fragment_delay;
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let total = parts.len();
            for (i, text) in parts.into_iter().enumerate() {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                let fragment = ResponseFragment::new(i as u64, text, i + 1 == total);
                if tx.send(Ok(fragment)).await.is_err() {
                    // Receiver dropped: generation cancelled.
                    return;
                }
            }
        });

        Ok(FragmentStream { fragments: rx })
    }
}

/// Agent that fails transiently a configured number of times before
/// delegating to a static reply. `u32::MAX` failures means "always fail".
pub struct FlakyAgent {
    failures: AtomicU32,
    inner: StaticAgent,
}

impl FlakyAgent {
    pub fn new(failures: u32, reply: impl Into<String>) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            inner: StaticAgent::new(reply),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX, "")
    }
}

#[async_trait]
impl AgentProvider for FlakyAgent {
    async fn complete(&self, prompt: AgentPrompt) -> Result<FragmentStream, ProviderError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(ProviderError::Transient("scripted agent failure".into()));
        }
        self.inner.complete(prompt).await
    }
}

/// Synthesizer that emits a fixed number of tone chunks per fragment.
pub struct ToneSynthesizer {
    chunks_per_fragment: usize,
    chunk_ms: u64,
    chunk_delay: Duration,
    /// Fragment seqs whose synthesis fails transiently (per-fragment error
    /// item; the stream continues).
    fail_fragments: Vec<u64>,
}

impl ToneSynthesizer {
    pub fn new(chunks_per_fragment: usize, chunk_ms: u64) -> Self {
        Self {
            chunks_per_fragment,
            chunk_ms,
            chunk_delay: Duration::ZERO,
            fail_fragments: Vec::new(),
        }
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn failing_on(mut self, fragment_seqs: impl IntoIterator<Item = u64>) -> Self {
        self.fail_fragments = fragment_seqs.into_iter().collect();
        self
    }
}

#[async_trait]
impl SynthesizerProvider for ToneSynthesizer {
    async fn speak(
        &self,
        format: SampleFormat,
        mut fragments: mpsc::Receiver<ResponseFragment>,
    ) -> Result<SynthesisStream, ProviderError> {
        let chunks_per_fragment = self.chunks_per_fragment;
        let chunk_ms = self.chunk_ms;
        let delay = self.chunk_delay;
        let fail_fragments = self.fail_fragments.clone();
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut seq = 0u64;
            while let Some(fragment) = fragments.recv().await {
                if fail_fragments.contains(&fragment.seq) {
                    let failed = Err(ProviderError::Transient(format!(
                        "scripted synthesis failure on fragment {}",
                        fragment.seq
                    )));
                    if tx.send(failed).await.is_err() {
                        return;
                    }
                    continue;
                }
                for _ in 0..chunks_per_fragment {
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    let chunk = tone_chunk(format, chunk_ms, seq);
                    seq += 1;
                    let item = SynthesizedChunk {
                        chunk,
                        fragment_seq: fragment.seq,
                    };
                    if tx.send(Ok(item)).await.is_err() {
                        // Receiver dropped: synthesis cancelled.
                        return;
                    }
                }
            }
        });

        Ok(SynthesisStream { audio: rx })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxflow_core::{AudioChunk, EndpointReason, Utterance};

    fn prompt() -> AgentPrompt {
        AgentPrompt {
            utterance: Utterance::new(0, "hello", Duration::from_millis(500), EndpointReason::SilenceTimeout),
            history: Vec::new(),
        }
    }

    #[test]
    fn clauses_concatenate_back() {
        let parts = split_clauses("Sure, when would you like to travel?");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.concat(), "Sure, when would you like to travel?");
    }

    #[test]
    fn unpunctuated_text_is_one_clause() {
        assert_eq!(split_clauses("hello there"), vec!["hello there".to_string()]);
        assert!(split_clauses("").is_empty());
    }

    #[tokio::test]
    async fn static_agent_terminates_with_is_last() {
        let agent = StaticAgent::new("One. Two.");
        let mut stream = agent.complete(prompt()).await.unwrap();

        let mut fragments = Vec::new();
        while let Some(item) = stream.fragments.recv().await {
            fragments.push(item.unwrap());
        }
        assert_eq!(fragments.len(), 2);
        assert!(fragments.last().unwrap().is_last);
        assert!(!fragments[0].is_last);
    }

    #[tokio::test]
    async fn flaky_agent_recovers() {
        let agent = FlakyAgent::new(2, "Hi.");
        assert!(agent.complete(prompt()).await.is_err());
        assert!(agent.complete(prompt()).await.is_err());
        assert!(agent.complete(prompt()).await.is_ok());
    }

    #[tokio::test]
    async fn scripted_transcriber_fires_on_chunk() {
        let transcriber = ScriptedTranscriber::new([(
            2u64,
            vec![TranscriptEvent::finalized(0, "hi", 0.9)],
        )]);
        let mut stream = transcriber.open(SampleFormat::default()).await.unwrap();

        for seq in 0..3u64 {
            let chunk = AudioChunk::new(vec![0u8; 64], SampleFormat::default(), seq);
            stream.feed.send(chunk).await.unwrap();
        }
        let event = stream.events.recv().await.unwrap().unwrap();
        assert_eq!(event.text, "hi");
        assert_eq!(transcriber.sessions_opened(), 1);
    }

    #[tokio::test]
    async fn tone_synthesizer_is_pipelined_per_fragment() {
        let synth = ToneSynthesizer::new(2, 20);
        let (frag_tx, frag_rx) = mpsc::channel(4);
        let mut stream = synth.speak(SampleFormat::default(), frag_rx).await.unwrap();

        frag_tx
            .send(ResponseFragment::new(0, "first", false))
            .await
            .unwrap();
        // Audio for the first fragment arrives before any later fragment exists.
        let first = stream.audio.recv().await.unwrap().unwrap();
        assert_eq!(first.fragment_seq, 0);

        frag_tx
            .send(ResponseFragment::new(1, "second", true))
            .await
            .unwrap();
        drop(frag_tx);

        let mut rest = Vec::new();
        while let Some(item) = stream.audio.recv().await {
            rest.push(item.unwrap());
        }
        assert_eq!(rest.len(), 3);
        assert_eq!(rest.last().unwrap().fragment_seq, 1);
    }
}
