//! Conversation orchestrator: the state machine tying the stages together.
//!
//! One task owns the whole conversation. It routes transcripts and voice
//! activity into endpointing and the barge-in monitor, drives the agent and
//! synthesis stages for one utterance at a time, and runs the interruption
//! protocol: cancel (acknowledged), flush, truncate to what was actually
//! played, listen again. The select loop is biased toward commands and voice
//! activity so interruption latency never depends on downstream progress.

use crate::agent::{AgentHandle, AgentStage};
use crate::endpointing::{EndpointOutput, EndpointingDetector};
use crate::interruption::InterruptionMonitor;
use crate::playback::{PlaybackSink, TurnToken};
use crate::providers::{AgentPrompt, AgentProvider, SynthesizerProvider, Transcriber};
use crate::session::{
    ConversationSession, ConversationState, SessionCommand, SessionEvent, SessionHandle,
    SessionInput,
};
use crate::synthesis::{PlaybackItem, SynthHandle, SynthesisStage};
use crate::transcription::{TranscriptionHandle, TranscriptionStage};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxflow_core::{
    EngineError, EngineResult, InterruptionCause, ResponseFragment, Role, SessionConfig,
    TranscriberEvent, Utterance, VoiceActivitySample,
};

/// How often the sink watermark is polled while waiting for the last chunk
/// of a turn to finish playing.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Entry point owning the provider set for a deployment.
pub struct ConversationEngine {
    config: SessionConfig,
    transcriber: Arc<dyn Transcriber>,
    agent: Arc<dyn AgentProvider>,
    synthesizer: Arc<dyn SynthesizerProvider>,
    sink: Arc<dyn PlaybackSink>,
}

impl ConversationEngine {
    pub fn new(
        config: SessionConfig,
        transcriber: Arc<dyn Transcriber>,
        agent: Arc<dyn AgentProvider>,
        synthesizer: Arc<dyn SynthesizerProvider>,
        sink: Arc<dyn PlaybackSink>,
    ) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            transcriber,
            agent,
            synthesizer,
            sink,
        })
    }

    /// Start a session over the given input streams. Audio capture and
    /// transcription run for the session lifetime, independent of
    /// conversation state.
    pub fn start(&self, input: SessionInput) -> SessionHandle {
        let (session, state_rx, events_tx) = ConversationSession::new(self.config.clone());
        let id = session.id;
        let history = Arc::clone(&session.history);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let transcription = TranscriptionStage::spawn(
            Arc::clone(&self.transcriber),
            self.config.transcription.clone(),
            self.config.format,
            input.audio,
            self.config.buffers.transcript_queue,
        );

        let orchestrator = Orchestrator {
            detector: EndpointingDetector::new(self.config.endpointing.clone()),
            monitor: InterruptionMonitor::new(
                self.config.interruption.clone(),
                self.config.endpointing.vad_threshold,
            ),
            session,
            agent: Arc::clone(&self.agent),
            synthesizer: Arc::clone(&self.synthesizer),
            sink: Arc::clone(&self.sink),
            turn: None,
            turn_counter: 0,
            next_chunk_seq: 0,
        };
        let join = tokio::spawn(orchestrator.run(transcription, input.voice_activity, cmd_rx));
        info!(%id, "🎙️ conversation session started");
        SessionHandle {
            id,
            cmd_tx,
            state_rx,
            events_tx,
            history,
            join,
        }
    }
}

/// Progress reports from the playback forwarder.
enum PlaybackProgress {
    Enqueued { chunk_seq: u64, fragment_seq: u64 },
    Failed(EngineError),
}

/// Everything belonging to one in-flight agent turn. Dropped wholesale on
/// interruption, which is what makes stray output unreachable.
struct ActiveTurn {
    turn_id: u64,
    agent_handle: Option<AgentHandle>,
    agent_rx: Option<mpsc::Receiver<ResponseFragment>>,
    synth_handle: Option<SynthHandle>,
    synth_in: Option<mpsc::Sender<ResponseFragment>>,
    progress_rx: Option<mpsc::Receiver<PlaybackProgress>>,
    pending: VecDeque<ResponseFragment>,
    fragment_texts: BTreeMap<u64, String>,
    chunk_fragments: Vec<(u64, u64)>,
    last_enqueued: Option<u64>,
    token: TurnToken,
    fallback_used: bool,
    drain_check: Option<Instant>,
}

enum TurnIo {
    Fragment(ResponseFragment),
    AgentClosed,
    Progress(PlaybackProgress),
    PlaybackClosed,
    Forwarded,
    DrainPoll,
}

struct Orchestrator {
    session: ConversationSession,
    agent: Arc<dyn AgentProvider>,
    synthesizer: Arc<dyn SynthesizerProvider>,
    sink: Arc<dyn PlaybackSink>,
    detector: EndpointingDetector,
    monitor: InterruptionMonitor,
    turn: Option<ActiveTurn>,
    turn_counter: u64,
    next_chunk_seq: u64,
}

impl Orchestrator {
    async fn run(
        mut self,
        mut transcription: TranscriptionHandle,
        mut va_rx: mpsc::Receiver<VoiceActivitySample>,
        mut cmd_rx: mpsc::Receiver<SessionCommand>,
    ) -> EngineResult<()> {
        let mut transcript_rx = match transcription.take_events() {
            Some(rx) => rx,
            None => return Err(EngineError::ChannelClosed("transcription events")),
        };
        self.session.set_state(ConversationState::ListeningToUser);

        let mut va_open = true;
        let result = loop {
            let endpoint_deadline = self.detector.next_deadline();
            tokio::select! {
                biased;
                command = cmd_rx.recv() => match command {
                    Some(SessionCommand::Stop) | None => break Ok(()),
                    Some(SessionCommand::Interrupt) => {
                        if self.turn.is_some() {
                            self.handle_interruption(InterruptionCause::ExplicitStop).await;
                        } else if let Some(output) = self.detector.explicit_cutoff(Instant::now()) {
                            if let Err(error) = self.on_endpoint(output).await {
                                break Err(error);
                            }
                        }
                    }
                },
                sample = va_rx.recv(), if va_open => match sample {
                    Some(sample) => {
                        if let Err(error) = self.on_voice_activity(sample).await {
                            break Err(error);
                        }
                    }
                    None => va_open = false,
                },
                event = transcript_rx.recv() => match event {
                    Some(event) => {
                        if let Err(error) = self.on_transcriber_event(event).await {
                            break Err(error);
                        }
                    }
                    // The stage ended: graceful when the audio source closed,
                    // otherwise its join result carries the fatal error.
                    None => break Ok(()),
                },
                _ = maybe_deadline(endpoint_deadline) => {
                    if let Some(output) = self.detector.tick(Instant::now()) {
                        if let Err(error) = self.on_endpoint(output).await {
                            break Err(error);
                        }
                    }
                }
                io = turn_io(&mut self.turn) => {
                    if let Err(error) = self.on_turn_io(io).await {
                        break Err(error);
                    }
                }
            }
        };

        self.shutdown().await;
        // Unblock any in-flight flush sends before joining the stage.
        drop(transcript_rx);
        let transcription_result = transcription.stop().await;
        let final_result = match (result, transcription_result) {
            (Err(error), _) => Err(error),
            (Ok(()), Err(error)) => Err(error),
            (Ok(()), Ok(())) => Ok(()),
        };
        if let Err(error) = &final_result {
            self.session.emit(SessionEvent::Error(error.to_string()));
        }
        self.session.set_state(ConversationState::Ended);
        info!(id = %self.session.id, "conversation session ended");
        final_result
    }

    async fn on_voice_activity(&mut self, sample: VoiceActivitySample) -> EngineResult<()> {
        let now = Instant::now();
        if let Some(signal) = self.monitor.observe_voice_activity(&sample, now) {
            self.handle_interruption(signal.cause).await;
        }
        if let Some(output) = self.detector.observe_voice_activity(&sample, now) {
            self.on_endpoint(output).await?;
        }
        Ok(())
    }

    async fn on_transcriber_event(&mut self, event: TranscriberEvent) -> EngineResult<()> {
        match event {
            TranscriberEvent::Transcript(transcript) => {
                let now = Instant::now();
                if let Some(signal) = self.monitor.observe_transcript(&transcript) {
                    self.handle_interruption(signal.cause).await;
                }
                if !transcript.is_final {
                    self.session
                        .emit(SessionEvent::PartialTranscript(transcript.clone()));
                }
                if let Some(output) = self.detector.observe_transcript(&transcript, now) {
                    self.on_endpoint(output).await?;
                }
            }
            TranscriberEvent::Gap { dropped } => {
                warn!(?dropped, "transcript gap");
                self.session.emit(SessionEvent::TranscriptGap { dropped });
            }
        }
        Ok(())
    }

    async fn on_endpoint(&mut self, output: EndpointOutput) -> EngineResult<()> {
        match output {
            EndpointOutput::Correction { text } => {
                let amended = self.session.with_history(|h| h.amend_last_user(&text));
                if amended {
                    self.session.emit(SessionEvent::UtteranceAmended { text });
                }
                Ok(())
            }
            EndpointOutput::TurnReady(utterance) => {
                if self.turn.is_some()
                    || self.session.state() != ConversationState::ListeningToUser
                {
                    warn!(
                        text = %utterance.text,
                        "utterance while agent turn active, discarding"
                    );
                    return Ok(());
                }
                self.begin_agent_turn(utterance).await
            }
        }
    }

    async fn begin_agent_turn(&mut self, utterance: Utterance) -> EngineResult<()> {
        let user_end = utterance.captured_at;
        let user_start = user_end
            - chrono::Duration::from_std(utterance.duration).unwrap_or(chrono::Duration::zero());
        self.session
            .emit(SessionEvent::UtteranceCaptured(utterance.clone()));
        if let Err(error) = self.session.with_history(|h| {
            h.record(Role::User, utterance.text.clone(), user_start, user_end)
        }) {
            warn!(%error, "failed to record user turn, discarding utterance");
            return Ok(());
        }
        let history = self.session.with_history(|h| h.snapshot());
        if let Err(error) = self
            .session
            .with_history(|h| h.open(Role::Agent, Utc::now()))
        {
            warn!(%error, "failed to open agent turn, discarding utterance");
            return Ok(());
        }

        self.turn_counter += 1;
        let turn_id = self.turn_counter;
        info!(turn_id, utterance = %utterance.text, "agent turn starting");

        let prompt = AgentPrompt { utterance, history };
        let mut agent_handle = AgentStage::spawn(
            Arc::clone(&self.agent),
            self.session.config.agent.clone(),
            prompt,
            self.session.config.buffers.fragment_queue,
        );
        let mut synth_handle = SynthesisStage::spawn(
            Arc::clone(&self.synthesizer),
            self.session.config.synthesis.clone(),
            self.session.config.format,
            self.session.config.buffers.fragment_queue,
            self.session.config.buffers.playback_queue,
            self.next_chunk_seq,
        );
        let token = self.sink.turn_token();

        // Playback forwarder: a dedicated task absorbs sink backpressure so
        // the orchestrator loop stays responsive to barge-in.
        let (progress_tx, progress_rx) = mpsc::channel(self.session.config.buffers.playback_queue);
        let audio_rx = synth_handle.take_audio();
        if let Some(audio_rx) = audio_rx {
            tokio::spawn(playback_forwarder(
                audio_rx,
                Arc::clone(&self.sink),
                token,
                progress_tx,
            ));
        }

        self.turn = Some(ActiveTurn {
            turn_id,
            agent_rx: agent_handle.take_fragments(),
            synth_in: synth_handle.take_input(),
            agent_handle: Some(agent_handle),
            synth_handle: Some(synth_handle),
            progress_rx: Some(progress_rx),
            pending: VecDeque::new(),
            fragment_texts: BTreeMap::new(),
            chunk_fragments: Vec::new(),
            last_enqueued: None,
            token,
            fallback_used: false,
            drain_check: None,
        });
        self.monitor.arm(turn_id);
        self.session.set_state(ConversationState::AgentThinking);
        Ok(())
    }

    async fn on_turn_io(&mut self, io: TurnIo) -> EngineResult<()> {
        match io {
            TurnIo::Fragment(fragment) => {
                if let Some(turn) = self.turn.as_mut() {
                    turn.fragment_texts
                        .insert(fragment.seq, fragment.text.clone());
                    turn.pending.push_back(fragment.clone());
                }
                self.session.emit(SessionEvent::AgentFragment(fragment));
                Ok(())
            }
            TurnIo::AgentClosed => self.on_agent_closed().await,
            TurnIo::Progress(PlaybackProgress::Enqueued {
                chunk_seq,
                fragment_seq,
            }) => {
                if let Some(turn) = self.turn.as_mut() {
                    turn.chunk_fragments.push((chunk_seq, fragment_seq));
                    turn.last_enqueued = Some(chunk_seq);
                }
                self.next_chunk_seq = chunk_seq + 1;
                if self.session.state() == ConversationState::AgentThinking {
                    self.session.set_state(ConversationState::AgentSpeaking);
                }
                Ok(())
            }
            TurnIo::Progress(PlaybackProgress::Failed(error)) => Err(error),
            TurnIo::PlaybackClosed => self.on_playback_closed().await,
            TurnIo::Forwarded => Ok(()),
            TurnIo::DrainPoll => self.on_drain_poll().await,
        }
    }

    async fn on_agent_closed(&mut self) -> EngineResult<()> {
        let handle = match self.turn.as_mut().and_then(|t| t.agent_handle.take()) {
            Some(handle) => handle,
            None => return Ok(()),
        };
        match handle.outcome().await {
            Ok(()) => {
                if let Some(turn) = self.turn.as_mut() {
                    // An empty reply never carries an is_last fragment; close
                    // the synthesis input so the turn can finish.
                    if turn.pending.is_empty() && turn.fragment_texts.is_empty() {
                        turn.synth_in = None;
                    }
                }
                Ok(())
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                warn!(%error, "agent failed, speaking fallback utterance");
                self.session.emit(SessionEvent::Error(error.to_string()));
                self.start_fallback();
                Ok(())
            }
        }
    }

    /// Queue the configured fallback utterance as the agent's reply.
    fn start_fallback(&mut self) {
        let Some(turn) = self.turn.as_mut() else {
            return;
        };
        if turn.fallback_used || turn.synth_in.is_none() {
            turn.pending.clear();
            turn.synth_in = None;
            return;
        }
        turn.fallback_used = true;
        // Unforwarded fragments will never be spoken; drop their text.
        for fragment in turn.pending.drain(..) {
            turn.fragment_texts.remove(&fragment.seq);
        }
        let seq = turn
            .fragment_texts
            .keys()
            .max()
            .map_or(0, |max| max + 1);
        let text = self.session.config.agent.fallback_utterance.clone();
        turn.fragment_texts.insert(seq, text.clone());
        turn.pending
            .push_back(ResponseFragment::new(seq, text, true));
        self.session.emit(SessionEvent::FallbackSpoken);
    }

    async fn on_playback_closed(&mut self) -> EngineResult<()> {
        let handle = match self.turn.as_mut().and_then(|t| t.synth_handle.take()) {
            Some(handle) => handle,
            None => return Ok(()),
        };
        match handle.outcome().await {
            Ok(()) => {
                if let Some(turn) = self.turn.as_mut() {
                    // No more audio can exist; unblock turn completion even
                    // if the provider closed its stream early.
                    turn.synth_in = None;
                    turn.pending.clear();
                }
                Ok(())
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                // Stream-level synthesis failure: truncate the turn rather
                // than leaving the agent half-spoken forever.
                warn!(%error, "synthesis stream failed, truncating agent turn");
                self.session.emit(SessionEvent::Error(error.to_string()));
                self.teardown_turn(true).await;
                Ok(())
            }
        }
    }

    async fn on_drain_poll(&mut self) -> EngineResult<()> {
        let drained = match self.turn.as_ref() {
            Some(turn) => match turn.last_enqueued {
                Some(last) => self.sink.watermark().is_some_and(|wm| wm >= last),
                None => true,
            },
            None => return Ok(()),
        };
        if drained {
            self.finish_agent_turn().await;
        } else if let Some(turn) = self.turn.as_mut() {
            turn.drain_check = Some(Instant::now() + DRAIN_POLL_INTERVAL);
        }
        Ok(())
    }

    /// Normal turn end: the terminal fragment has fully played.
    async fn finish_agent_turn(&mut self) {
        let Some(turn) = self.turn.take() else {
            return;
        };
        let content: String = turn
            .fragment_texts
            .values()
            .map(String::as_str)
            .collect();
        if let Err(error) = self
            .session
            .with_history(|h| h.close_open(Some(content), false, Utc::now()))
        {
            warn!(%error, "failed to close agent turn");
        }
        self.monitor.disarm();
        info!(turn_id = turn.turn_id, "✅ agent turn complete");
        self.session.set_state(ConversationState::ListeningToUser);
    }

    /// The interruption protocol. Cancellation is acknowledged before the
    /// flush; per-turn channels and the turn token make stray audio after
    /// the flush point structurally impossible, so we do not wait for the
    /// cancelled stages' cleanup to fully settle.
    async fn handle_interruption(&mut self, cause: InterruptionCause) {
        if self.turn.is_none() {
            return;
        }
        self.session.set_state(ConversationState::Interrupted);
        self.session.emit(SessionEvent::Interrupted(cause));
        info!(?cause, "⚡ interruption: silencing agent");
        self.teardown_turn(true).await;
    }

    /// Cancel the active stages, flush the sink, and close the agent turn
    /// truncated to what was actually played.
    async fn teardown_turn(&mut self, interrupted: bool) {
        let Some(mut turn) = self.turn.take() else {
            return;
        };
        let deadline = self.session.config.cancel_ack_deadline;

        if let Some(agent) = turn.agent_handle.take() {
            if let Err(error) = agent.cancel(deadline).await {
                warn!(%error, "agent cancel unacknowledged, force-dropping");
                self.session.emit(SessionEvent::Error(error.to_string()));
                agent.abort();
            }
        }
        if let Some(synth) = turn.synth_handle.take() {
            if let Err(error) = synth.cancel(deadline).await {
                warn!(%error, "synthesis cancel unacknowledged, force-dropping");
                self.session.emit(SessionEvent::Error(error.to_string()));
                synth.abort();
            }
        }

        // Collect progress that raced the cancellation, then drop the
        // per-turn channels: anything still in flight is unreachable.
        if let Some(mut progress_rx) = turn.progress_rx.take() {
            while let Ok(progress) = progress_rx.try_recv() {
                if let PlaybackProgress::Enqueued {
                    chunk_seq,
                    fragment_seq,
                } = progress
                {
                    turn.chunk_fragments.push((chunk_seq, fragment_seq));
                    turn.last_enqueued = Some(chunk_seq);
                    self.next_chunk_seq = self.next_chunk_seq.max(chunk_seq + 1);
                }
            }
        }
        turn.agent_rx = None;
        turn.synth_in = None;
        turn.pending.clear();

        // Discard buffered agent audio and invalidate the turn token.
        let _fresh = self.sink.flush().await;

        // The user only heard what was actually played.
        let watermark = self.sink.watermark();
        let content = spoken_content(&turn.fragment_texts, &turn.chunk_fragments, watermark);
        debug!(?watermark, content = %content, "truncating agent turn");
        if let Err(error) = self
            .session
            .with_history(|h| h.close_open(Some(content), interrupted, Utc::now()))
        {
            warn!(%error, "failed to close interrupted agent turn");
        }
        self.monitor.disarm();
        self.session.set_state(ConversationState::ListeningToUser);
    }

    async fn shutdown(&mut self) {
        if self.turn.is_some() {
            self.teardown_turn(true).await;
        }
        let _ = self.sink.flush().await;
        let open = self.session.with_history(|h| h.open_role());
        if open.is_some() {
            let _ = self
                .session
                .with_history(|h| h.close_open(None, true, Utc::now()));
        }
    }
}

/// Text of every fragment with at least one chunk at or below the played
/// watermark — fragment-granularity truncation.
fn spoken_content(
    fragment_texts: &BTreeMap<u64, String>,
    chunk_fragments: &[(u64, u64)],
    watermark: Option<u64>,
) -> String {
    let Some(watermark) = watermark else {
        return String::new();
    };
    let spoken: BTreeSet<u64> = chunk_fragments
        .iter()
        .filter(|(chunk_seq, _)| *chunk_seq <= watermark)
        .map(|(_, fragment_seq)| *fragment_seq)
        .collect();
    spoken
        .iter()
        .filter_map(|seq| fragment_texts.get(seq).map(String::as_str))
        .collect()
}

async fn maybe_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => futures::future::pending().await,
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

enum ForwardResult {
    Sent { last: bool },
    Closed,
}

async fn forward_pending(
    pending: &mut VecDeque<ResponseFragment>,
    tx: &Option<mpsc::Sender<ResponseFragment>>,
) -> ForwardResult {
    let Some(tx) = tx.as_ref() else {
        return std::future::pending().await;
    };
    match tx.reserve().await {
        Ok(permit) => match pending.pop_front() {
            Some(fragment) => {
                let last = fragment.is_last;
                permit.send(fragment);
                ForwardResult::Sent { last }
            }
            None => ForwardResult::Sent { last: false },
        },
        Err(_) => ForwardResult::Closed,
    }
}

/// Multiplex one active turn's channels. Resolves never when no turn is
/// active; each sub-stream closing is reported exactly once.
async fn turn_io(turn: &mut Option<ActiveTurn>) -> TurnIo {
    let Some(t) = turn.as_mut() else {
        return std::future::pending().await;
    };
    let can_forward = !t.pending.is_empty() && t.synth_in.is_some();
    let awaiting_drain = t.agent_rx.is_none()
        && t.progress_rx.is_none()
        && t.pending.is_empty()
        && t.synth_in.is_none();
    if awaiting_drain && t.drain_check.is_none() {
        t.drain_check = Some(Instant::now() + DRAIN_POLL_INTERVAL);
    }
    let drain_at = t.drain_check;

    tokio::select! {
        biased;
        item = recv_opt(&mut t.agent_rx) => match item {
            Some(fragment) => TurnIo::Fragment(fragment),
            None => {
                t.agent_rx = None;
                TurnIo::AgentClosed
            }
        },
        item = recv_opt(&mut t.progress_rx) => match item {
            Some(progress) => TurnIo::Progress(progress),
            None => {
                t.progress_rx = None;
                TurnIo::PlaybackClosed
            }
        },
        result = forward_pending(&mut t.pending, &t.synth_in), if can_forward => {
            match result {
                ForwardResult::Sent { last } => {
                    if last {
                        // Provider input closes so synthesis can flush.
                        t.synth_in = None;
                    }
                    TurnIo::Forwarded
                }
                ForwardResult::Closed => {
                    t.synth_in = None;
                    t.pending.clear();
                    TurnIo::Forwarded
                }
            }
        },
        _ = maybe_deadline(drain_at), if awaiting_drain => {
            t.drain_check = None;
            TurnIo::DrainPoll
        },
    }
}

/// Feeds synthesized audio into the sink, absorbing its backpressure. Exits
/// when the audio stream ends or the turn token goes stale after a flush.
async fn playback_forwarder(
    mut audio_rx: mpsc::Receiver<PlaybackItem>,
    sink: Arc<dyn PlaybackSink>,
    token: TurnToken,
    progress: mpsc::Sender<PlaybackProgress>,
) {
    while let Some(item) = audio_rx.recv().await {
        let chunk_seq = item.chunk.seq;
        let fragment_seq = item.fragment_seq;
        match sink.enqueue(token, item.chunk).await {
            Ok(()) => {
                let update = PlaybackProgress::Enqueued {
                    chunk_seq,
                    fragment_seq,
                };
                if progress.send(update).await.is_err() {
                    return;
                }
            }
            Err(EngineError::Protocol(reason)) => {
                debug!(%reason, "stale audio discarded after flush");
                return;
            }
            Err(error) => {
                let _ = progress.send(PlaybackProgress::Failed(error)).await;
                return;
            }
        }
    }
}
