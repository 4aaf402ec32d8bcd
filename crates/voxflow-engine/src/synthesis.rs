//! Synthesis stage: wraps the streaming text-to-speech provider.
//!
//! Pipelined: audio for the first fragment flows before later fragments
//! arrive. The stage owns the outgoing chunk sequence numbers, enforces
//! fragment ordering, and substitutes a short tone for a fragment that fails
//! non-fatally when configured. Cancellation stops fragment consumption and
//! audio emission, acknowledged synchronously.

use crate::cancel::{cancel_pair, CancelAck, CancelHandle, CancelListener};
use crate::providers::{SynthesisStream, SynthesizerProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};
use voxflow_core::{
    AudioChunk, AudioEncoding, EngineError, EngineResult, ProviderError, ResponseFragment,
    SampleFormat, SynthesisConfig,
};

/// One synthesized chunk tied back to the fragment it voices.
#[derive(Debug, Clone)]
pub struct PlaybackItem {
    pub chunk: AudioChunk,
    pub fragment_seq: u64,
}

/// Handle to one running synthesis turn.
pub struct SynthHandle {
    input: Option<mpsc::Sender<ResponseFragment>>,
    audio: Option<mpsc::Receiver<PlaybackItem>>,
    cancel: CancelHandle,
    join: JoinHandle<EngineResult<()>>,
}

impl SynthHandle {
    /// Take the fragment input sender. Dropping it (or sending a fragment
    /// with `is_last`) flushes the provider and ends the stream.
    pub fn take_input(&mut self) -> Option<mpsc::Sender<ResponseFragment>> {
        self.input.take()
    }

    /// Take the audio receiver. Returns `None` the second time.
    pub fn take_audio(&mut self) -> Option<mpsc::Receiver<PlaybackItem>> {
        self.audio.take()
    }

    /// Cancel synthesis. Returns once no further audio can be emitted.
    /// Already-emitted unplayed chunks are the playback sink's concern.
    pub async fn cancel(&self, deadline: Duration) -> EngineResult<()> {
        self.cancel.cancel("synthesis", deadline).await
    }

    pub fn abort(&self) {
        self.join.abort();
    }

    /// Stage outcome, available after the audio stream ends.
    pub async fn outcome(self) -> EngineResult<()> {
        match self.join.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(_) => Err(EngineError::ChannelClosed("synthesis task")),
        }
    }
}

pub struct SynthesisStage;

impl SynthesisStage {
    /// `first_chunk_seq` continues the session-wide chunk numbering so the
    /// playback watermark stays comparable across turns.
    pub fn spawn(
        provider: Arc<dyn SynthesizerProvider>,
        config: SynthesisConfig,
        format: SampleFormat,
        fragment_capacity: usize,
        audio_capacity: usize,
        first_chunk_seq: u64,
    ) -> SynthHandle {
        let (in_tx, in_rx) = mpsc::channel(fragment_capacity);
        let (out_tx, out_rx) = mpsc::channel(audio_capacity);
        let (cancel_handle, cancel_listener) = cancel_pair();
        let join = tokio::spawn(run(
            provider,
            config,
            format,
            fragment_capacity,
            first_chunk_seq,
            in_rx,
            out_tx,
            cancel_listener,
        ));
        SynthHandle {
            input: Some(in_tx),
            audio: Some(out_rx),
            cancel: cancel_handle,
            join,
        }
    }
}

/// Short tone used when a fragment fails synthesis non-fatally. Low-volume
/// 440 Hz for linear PCM, companded silence for mu-law.
pub fn tone_chunk(format: SampleFormat, ms: u64, seq: u64) -> AudioChunk {
    let samples =
        (format.sample_rate as u64 * ms / 1000) as usize * format.channels as usize;
    let data: Vec<u8> = match format.encoding {
        AudioEncoding::Linear16 => {
            let mut buf = Vec::with_capacity(samples * 2);
            for i in 0..samples {
                let t = i as f32 / format.sample_rate as f32;
                let v = (t * 440.0 * std::f32::consts::TAU).sin() * 0.2;
                let s = (v * f32::from(i16::MAX)) as i16;
                buf.extend_from_slice(&s.to_le_bytes());
            }
            buf
        }
        AudioEncoding::MuLaw => vec![0xFFu8; samples],
    };
    AudioChunk::new(data, format, seq)
}

async fn run(
    provider: Arc<dyn SynthesizerProvider>,
    config: SynthesisConfig,
    format: SampleFormat,
    fragment_capacity: usize,
    first_chunk_seq: u64,
    mut in_rx: mpsc::Receiver<ResponseFragment>,
    out: mpsc::Sender<PlaybackItem>,
    mut cancel: CancelListener,
) -> EngineResult<()> {
    let (prov_tx, prov_rx) = mpsc::channel(fragment_capacity);

    let opened = tokio::select! {
        biased;
        ack = cancel.requested() => {
            drop(out);
            ack.ack();
            return Ok(());
        }
        result = timeout(config.provider_deadline, provider.speak(format, prov_rx)) => {
            match result {
                Ok(Ok(stream)) => Ok(stream),
                Ok(Err(error)) => Err(error),
                Err(_) => Err(ProviderError::DeadlineExceeded(config.provider_deadline)),
            }
        }
    };
    let mut stream: SynthesisStream = match opened {
        Ok(stream) => stream,
        Err(error) => return Err(EngineError::Synthesis(error)),
    };

    let mut prov_tx = Some(prov_tx);
    let mut next_chunk_seq = first_chunk_seq;
    let mut last_fragment_seq: Option<u64> = None;

    loop {
        tokio::select! {
            biased;
            ack = cancel.requested() => {
                drop(prov_tx);
                drop(out);
                ack.ack();
                return Ok(());
            }
            fragment = in_rx.recv(), if prov_tx.is_some() => match fragment {
                Some(fragment) => {
                    let terminal = fragment.is_last;
                    let forward = tokio::select! {
                        biased;
                        ack = cancel.requested() => Some(ack),
                        result = async {
                            if let Some(tx) = prov_tx.as_ref() {
                                // A closed provider input surfaces via the
                                // audio stream, not here.
                                let _ = tx.send(fragment).await;
                            }
                        } => {
                            let _ = result;
                            None
                        }
                    };
                    if let Some(ack) = forward {
                        drop(prov_tx);
                        drop(out);
                        ack.ack();
                        return Ok(());
                    }
                    if terminal {
                        // Close the provider input so it flushes and ends.
                        prov_tx = None;
                    }
                }
                None => {
                    prov_tx = None;
                }
            },
            item = stream.audio.recv() => match item {
                Some(Ok(synthesized)) => {
                    if let Some(last) = last_fragment_seq {
                        if synthesized.fragment_seq < last {
                            warn!(
                                got = synthesized.fragment_seq,
                                current = last,
                                "out-of-order synthesis audio discarded"
                            );
                            continue;
                        }
                    }
                    last_fragment_seq = Some(synthesized.fragment_seq);
                    let mut chunk = synthesized.chunk;
                    chunk.seq = next_chunk_seq;
                    next_chunk_seq += 1;
                    let item = PlaybackItem {
                        chunk,
                        fragment_seq: synthesized.fragment_seq,
                    };
                    match emit(item, &out, &mut cancel).await {
                        EmitResult::Sent => {}
                        EmitResult::Cancelled(ack) => {
                            drop(prov_tx);
                            drop(out);
                            ack.ack();
                            return Ok(());
                        }
                        EmitResult::Closed => return Ok(()),
                    }
                }
                Some(Err(error)) if !error.is_fatal() && config.fallback_tone_on_error => {
                    warn!(%error, "fragment synthesis failed, substituting tone");
                    let fragment_seq = last_fragment_seq.map_or(0, |s| s + 1);
                    last_fragment_seq = Some(fragment_seq);
                    let mut chunk = tone_chunk(format, config.fallback_tone_ms, 0);
                    chunk.seq = next_chunk_seq;
                    next_chunk_seq += 1;
                    let item = PlaybackItem { chunk, fragment_seq };
                    match emit(item, &out, &mut cancel).await {
                        EmitResult::Sent => {}
                        EmitResult::Cancelled(ack) => {
                            drop(prov_tx);
                            drop(out);
                            ack.ack();
                            return Ok(());
                        }
                        EmitResult::Closed => return Ok(()),
                    }
                }
                Some(Err(error)) => return Err(EngineError::Synthesis(error)),
                None => {
                    debug!(next_seq = next_chunk_seq, "synthesis complete");
                    return Ok(());
                }
            },
        }
    }
}

enum EmitResult {
    Sent,
    Cancelled(CancelAck),
    Closed,
}

async fn emit(
    item: PlaybackItem,
    out: &mpsc::Sender<PlaybackItem>,
    cancel: &mut CancelListener,
) -> EmitResult {
    tokio::select! {
        biased;
        ack = cancel.requested() => EmitResult::Cancelled(ack),
        result = out.send(item) => {
            if result.is_ok() {
                EmitResult::Sent
            } else {
                EmitResult::Closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ToneSynthesizer;

    fn test_config() -> SynthesisConfig {
        SynthesisConfig {
            provider_deadline: Duration::from_millis(500),
            fallback_tone_on_error: true,
            fallback_tone_ms: 20,
        }
    }

    fn spawn_stage(provider: ToneSynthesizer) -> SynthHandle {
        SynthesisStage::spawn(
            Arc::new(provider),
            test_config(),
            SampleFormat::default(),
            8,
            16,
            0,
        )
    }

    async fn collect(handle: &mut SynthHandle) -> Vec<PlaybackItem> {
        let mut rx = handle.take_audio().unwrap();
        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn chunk_seqs_monotonic_across_fragments() {
        let mut handle = spawn_stage(ToneSynthesizer::new(2, 20));
        let input = handle.take_input().unwrap();

        input
            .send(ResponseFragment::new(0, "Sure, ", false))
            .await
            .unwrap();
        input
            .send(ResponseFragment::new(1, "here it is.", true))
            .await
            .unwrap();
        drop(input);

        let items = collect(&mut handle).await;
        assert_eq!(items.len(), 4);
        let seqs: Vec<_> = items.iter().map(|i| i.chunk.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
        assert_eq!(items[0].fragment_seq, 0);
        assert_eq!(items[3].fragment_seq, 1);
        handle.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn failed_fragment_substitutes_tone() {
        let mut handle = spawn_stage(ToneSynthesizer::new(2, 20).failing_on([0]));
        let input = handle.take_input().unwrap();

        input
            .send(ResponseFragment::new(0, "broken", false))
            .await
            .unwrap();
        input
            .send(ResponseFragment::new(1, "fine.", true))
            .await
            .unwrap();
        drop(input);

        let items = collect(&mut handle).await;
        // One tone for the failed fragment, two real chunks for the second.
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].fragment_seq, 0);
        let seqs: Vec<_> = items.iter().map(|i| i.chunk.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        handle.outcome().await.unwrap();
    }

    #[tokio::test]
    async fn fatal_without_fallback_surfaces_error() {
        let mut config = test_config();
        config.fallback_tone_on_error = false;
        let mut handle = SynthesisStage::spawn(
            Arc::new(ToneSynthesizer::new(1, 20).failing_on([0])),
            config,
            SampleFormat::default(),
            8,
            16,
            0,
        );
        let input = handle.take_input().unwrap();
        input
            .send(ResponseFragment::new(0, "broken", true))
            .await
            .unwrap();
        drop(input);

        let items = collect(&mut handle).await;
        assert!(items.is_empty());
        let err = handle.outcome().await.unwrap_err();
        assert!(matches!(err, EngineError::Synthesis(_)));
    }

    #[tokio::test]
    async fn cancel_stops_audio_and_acknowledges() {
        let mut handle = spawn_stage(
            ToneSynthesizer::new(50, 20).with_chunk_delay(Duration::from_millis(20)),
        );
        let input = handle.take_input().unwrap();
        let mut audio = handle.take_audio().unwrap();

        input
            .send(ResponseFragment::new(0, "a long reply", true))
            .await
            .unwrap();

        // Let a couple of chunks through, then cut.
        let first = audio.recv().await.unwrap();
        assert_eq!(first.chunk.seq, 0);
        handle.cancel(Duration::from_millis(200)).await.unwrap();
        handle.cancel(Duration::from_millis(200)).await.unwrap();

        // Nothing further arrives after the cancel returned.
        assert!(audio.recv().await.is_none());
        handle.outcome().await.unwrap();
        drop(input);
    }

    #[test]
    fn tone_is_nonsilent_linear16() {
        let chunk = tone_chunk(SampleFormat::default(), 20, 7);
        assert_eq!(chunk.seq, 7);
        assert!(chunk.data.iter().any(|&b| b != 0));
        assert_eq!(chunk.duration(), Duration::from_millis(20));
    }
}
