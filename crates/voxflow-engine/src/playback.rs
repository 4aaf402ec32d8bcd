//! Playback sink interface and a buffered in-memory implementation.
//!
//! The sink hands out per-turn tokens: `flush` invalidates every outstanding
//! token, so an enqueue racing a flush is rejected instead of leaking stale
//! agent audio into the next turn.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tokio::sync::Notify;
use tracing::{debug, warn};
use voxflow_core::{AudioChunk, EngineError, EngineResult};

/// Opaque per-turn generation token issued by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnToken(u64);

/// External consumer of synthesized audio. Must support immediate flush.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Token for the current turn. Invalidated by `flush`.
    fn turn_token(&self) -> TurnToken;

    /// Queue a chunk for playback. Applies backpressure when the buffer is
    /// full. Fails with a protocol error when `token` is stale.
    async fn enqueue(&self, token: TurnToken, chunk: AudioChunk) -> EngineResult<()>;

    /// Discard unplayed audio, stop current output, invalidate outstanding
    /// tokens. Returns the fresh token for the next turn.
    async fn flush(&self) -> TurnToken;

    /// Sequence number of the last chunk actually played, if any.
    fn watermark(&self) -> Option<u64>;
}

struct BufferedState {
    queue: VecDeque<AudioChunk>,
    generation: u64,
    watermark: Option<u64>,
    expected_next: Option<u64>,
    gaps: u64,
}

/// Bounded in-memory sink. The host drains it with `play_next`, which is
/// what advances the watermark — only audio the host actually pulled counts
/// as played.
pub struct BufferedPlayback {
    capacity: usize,
    state: Mutex<BufferedState>,
    space: Notify,
}

impl BufferedPlayback {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(BufferedState {
                queue: VecDeque::new(),
                generation: 0,
                watermark: None,
                expected_next: None,
                gaps: 0,
            }),
            space: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pull the next chunk for the output device. Advances the watermark.
    pub fn play_next(&self) -> Option<AudioChunk> {
        let chunk = {
            let mut state = self.lock();
            let chunk = state.queue.pop_front()?;
            state.watermark = Some(chunk.seq);
            chunk
        };
        self.space.notify_waiters();
        Some(chunk)
    }

    /// Pull everything currently queued.
    pub fn drain_all(&self) -> Vec<AudioChunk> {
        let mut played = Vec::new();
        while let Some(chunk) = self.play_next() {
            played.push(chunk);
        }
        played
    }

    pub fn queued(&self) -> usize {
        self.lock().queue.len()
    }

    /// Sequence gaps observed so far. Gaps are counted, never skipped
    /// silently.
    pub fn gap_count(&self) -> u64 {
        self.lock().gaps
    }
}

#[async_trait]
impl PlaybackSink for BufferedPlayback {
    fn turn_token(&self) -> TurnToken {
        TurnToken(self.lock().generation)
    }

    async fn enqueue(&self, token: TurnToken, chunk: AudioChunk) -> EngineResult<()> {
        loop {
            // Register for the space notification before the capacity check,
            // otherwise a play_next between check and await is lost.
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.generation != token.0 {
                    return Err(EngineError::Protocol(format!(
                        "enqueue with stale turn token (chunk seq {})",
                        chunk.seq
                    )));
                }
                if state.queue.len() < self.capacity {
                    if let Some(expected) = state.expected_next {
                        if chunk.seq != expected {
                            state.gaps += 1;
                            warn!(
                                expected,
                                got = chunk.seq,
                                "audio sequence gap at playback sink"
                            );
                        }
                    }
                    state.expected_next = Some(chunk.seq + 1);
                    state.queue.push_back(chunk);
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    async fn flush(&self) -> TurnToken {
        let token = {
            let mut state = self.lock();
            let discarded = state.queue.len();
            state.queue.clear();
            state.generation += 1;
            state.expected_next = None;
            debug!(discarded, "playback sink flushed");
            TurnToken(state.generation)
        };
        self.space.notify_waiters();
        token
    }

    fn watermark(&self) -> Option<u64> {
        self.lock().watermark
    }
}
