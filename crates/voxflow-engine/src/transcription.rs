//! Transcription stage: wraps the streaming speech-to-text provider.
//!
//! Consumes the live audio stream for the whole session and relays the
//! provider's partial/final transcripts. On a transient disconnect it
//! reconnects with exponential backoff, buffering unsent audio up to a
//! bounded watermark; past the watermark the oldest audio is dropped and a
//! gap marker emitted rather than blocking the capture path.

use crate::providers::{Transcriber, TranscriberStream};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use voxflow_core::{
    AudioChunk, EngineError, EngineResult, ProviderError, SampleFormat, TranscriberEvent,
    TranscriptionConfig,
};

/// Handle to the running transcription stage.
pub struct TranscriptionHandle {
    events: Option<mpsc::Receiver<TranscriberEvent>>,
    stop_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<EngineResult<()>>,
}

impl TranscriptionHandle {
    /// Take the event receiver. Returns `None` the second time.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TranscriberEvent>> {
        self.events.take()
    }

    /// End the current utterance boundary gracefully: close the provider
    /// feed, flush pending finals, then stop.
    pub async fn stop(mut self) -> EngineResult<()> {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.join.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(_) => Err(EngineError::ChannelClosed("transcription task")),
        }
    }

    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Bounded reconnect buffer. Holds audio not yet accepted by the provider;
/// overflow drops the oldest chunks and reports the hole.
struct AudioBacklog {
    queue: VecDeque<AudioChunk>,
    bytes: usize,
    max_bytes: usize,
    format: SampleFormat,
}

impl AudioBacklog {
    fn new(watermark: Duration, format: SampleFormat) -> Self {
        let max_bytes = (format.bytes_per_second() as f64 * watermark.as_secs_f64()) as usize;
        Self {
            queue: VecDeque::new(),
            bytes: 0,
            max_bytes: max_bytes.max(1),
            format,
        }
    }

    /// Push a chunk; returns the length of audio dropped on overflow.
    fn push(&mut self, chunk: AudioChunk) -> Option<Duration> {
        self.bytes += chunk.data.len();
        self.queue.push_back(chunk);
        let mut dropped_bytes = 0usize;
        while self.bytes > self.max_bytes {
            match self.queue.pop_front() {
                Some(old) => {
                    self.bytes -= old.data.len();
                    dropped_bytes += old.data.len();
                }
                None => break,
            }
        }
        (dropped_bytes > 0).then(|| self.format.duration_of(dropped_bytes))
    }

    fn front(&self) -> Option<&AudioChunk> {
        self.queue.front()
    }

    fn pop(&mut self) {
        if let Some(chunk) = self.queue.pop_front() {
            self.bytes -= chunk.data.len();
        }
    }

    fn len(&self) -> usize {
        self.queue.len()
    }
}

pub struct TranscriptionStage;

impl TranscriptionStage {
    /// Spawn the stage over `audio_rx`. Capture and transcription run for
    /// the session lifetime, independent of conversation state.
    pub fn spawn(
        provider: Arc<dyn Transcriber>,
        config: TranscriptionConfig,
        format: SampleFormat,
        audio_rx: mpsc::Receiver<AudioChunk>,
        out_capacity: usize,
    ) -> TranscriptionHandle {
        let (event_tx, event_rx) = mpsc::channel(out_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();
        let worker = Worker {
            provider,
            backlog: AudioBacklog::new(config.backlog_watermark, format),
            config,
            format,
        };
        let join = tokio::spawn(worker.run(audio_rx, event_tx, stop_rx));
        TranscriptionHandle {
            events: Some(event_rx),
            stop_tx: Some(stop_tx),
            join,
        }
    }
}

struct Worker {
    provider: Arc<dyn Transcriber>,
    config: TranscriptionConfig,
    format: SampleFormat,
    backlog: AudioBacklog,
}

impl Worker {
    async fn run(
        mut self,
        mut audio_rx: mpsc::Receiver<AudioChunk>,
        out: mpsc::Sender<TranscriberEvent>,
        mut stop_rx: oneshot::Receiver<()>,
    ) -> EngineResult<()> {
        let mut stream = self
            .open_with_deadline()
            .await
            .map_err(EngineError::Transcriber)?;
        info!("transcription stage started");

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => {
                    return self.drain_finals(stream, &out).await;
                }
                chunk = audio_rx.recv() => match chunk {
                    Some(chunk) => {
                        if let Some(dropped) = self.backlog.push(chunk) {
                            warn!(?dropped, "backlog past watermark, dropping oldest audio");
                            if out.send(TranscriberEvent::Gap { dropped }).await.is_err() {
                                return Ok(());
                            }
                        }
                        if !self.feed_backlog(&stream) {
                            stream = self.reconnect().await?;
                        }
                    }
                    None => {
                        // Audio source ended: flush pending finals and finish.
                        return self.drain_finals(stream, &out).await;
                    }
                },
                event = stream.events.recv() => match event {
                    Some(Ok(transcript)) => {
                        if out
                            .send(TranscriberEvent::Transcript(transcript))
                            .await
                            .is_err()
                        {
                            return Ok(());
                        }
                    }
                    Some(Err(error)) if error.is_fatal() => {
                        return Err(EngineError::Transcriber(error));
                    }
                    Some(Err(error)) => {
                        warn!(%error, "transcriber session failed, reconnecting");
                        stream = self.reconnect().await?;
                    }
                    None => {
                        debug!("transcriber event stream closed, reconnecting");
                        stream = self.reconnect().await?;
                    }
                },
            }
        }
    }

    async fn open_with_deadline(&self) -> Result<TranscriberStream, ProviderError> {
        match timeout(
            self.config.provider_deadline,
            self.provider.open(self.format),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProviderError::DeadlineExceeded(
                self.config.provider_deadline,
            )),
        }
    }

    /// Feed as much of the backlog as the provider currently accepts.
    /// Returns false when the session is gone and a reconnect is needed.
    fn feed_backlog(&mut self, stream: &TranscriberStream) -> bool {
        while let Some(front) = self.backlog.front() {
            match stream.feed.try_send(front.clone()) {
                Ok(()) => self.backlog.pop(),
                // Provider slow: keep the rest buffered, live audio keeps
                // driving the drain.
                Err(mpsc::error::TrySendError::Full(_)) => break,
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        true
    }

    async fn reconnect(&mut self) -> EngineResult<TranscriberStream> {
        let mut backoff = self.config.reconnect_backoff;
        for attempt in 1..=self.config.max_reconnect_attempts {
            sleep(backoff).await;
            backoff = backoff.saturating_mul(2);
            match self.open_with_deadline().await {
                Ok(stream) => {
                    info!(
                        attempt,
                        buffered = self.backlog.len(),
                        "transcriber reconnected, resubmitting buffered audio"
                    );
                    if self.feed_backlog(&stream) {
                        return Ok(stream);
                    }
                    warn!(attempt, "transcriber session closed during resubmit");
                }
                Err(error) if error.is_fatal() => {
                    return Err(EngineError::Transcriber(error));
                }
                Err(error) => warn!(attempt, %error, "transcriber reconnect failed"),
            }
        }
        Err(EngineError::Transcriber(ProviderError::Transient(
            "reconnect attempts exhausted".into(),
        )))
    }

    async fn drain_finals(
        mut self,
        mut stream: TranscriberStream,
        out: &mpsc::Sender<TranscriberEvent>,
    ) -> EngineResult<()> {
        let _ = self.feed_backlog(&stream);
        drop(stream.feed);
        loop {
            match timeout(self.config.provider_deadline, stream.events.recv()).await {
                Ok(Some(Ok(transcript))) => {
                    if out
                        .send(TranscriberEvent::Transcript(transcript))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(Some(Err(error))) => {
                    warn!(%error, "transcriber error during flush");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!("transcriber flush deadline exceeded");
                    break;
                }
            }
        }
        info!("transcription stage stopped");
        Ok(())
    }
}
