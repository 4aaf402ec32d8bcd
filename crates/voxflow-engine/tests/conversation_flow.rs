//! End-to-end conversation scenarios over scripted providers.
//!
//! These drive the full pipeline — transcription, endpointing, agent,
//! synthesis, playback — with deterministic backends and a host-drained
//! buffered sink.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use voxflow_core::{
    AudioChunk, InterruptionCause, Role, SampleFormat, SessionConfig, TranscriptEvent,
    VoiceActivitySample,
};
use voxflow_engine::{
    AgentProvider, BufferedPlayback, ConversationEngine, ConversationState, PlaybackSink,
    ScriptedTranscriber, SessionEvent, SessionHandle, SessionInput, StaticAgent,
    SynthesizerProvider, ToneSynthesizer, Transcriber,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_test_writer()
        .try_init();
}

fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.endpointing.silence_timeout = Duration::from_millis(80);
    config.endpointing.punctuation_cutoff = Duration::from_millis(40);
    config.endpointing.grace_period = Duration::from_millis(60);
    config.endpointing.min_speech = Duration::from_millis(10);
    config.interruption.min_sustained_speech = Duration::from_millis(30);
    config.transcription.reconnect_backoff = Duration::from_millis(10);
    config.agent.retry_backoff = Duration::from_millis(10);
    config.cancel_ack_deadline = Duration::from_millis(200);
    config
}

/// 30ms of silence-shaped PCM at the default format.
fn chunk(seq: u64) -> AudioChunk {
    AudioChunk::new(vec![0u8; 960], SampleFormat::default(), seq)
}

fn speech(seq: u64) -> VoiceActivitySample {
    VoiceActivitySample::new(seq, 0.9)
}

struct Harness {
    handle: SessionHandle,
    audio_tx: mpsc::Sender<AudioChunk>,
    va_tx: mpsc::Sender<VoiceActivitySample>,
    sink: Arc<BufferedPlayback>,
}

fn start_session(
    config: SessionConfig,
    transcriber: Arc<dyn Transcriber>,
    agent: Arc<dyn AgentProvider>,
    synthesizer: Arc<dyn SynthesizerProvider>,
) -> Harness {
    init_tracing();
    let sink = Arc::new(BufferedPlayback::new(32));
    let engine = ConversationEngine::new(
        config,
        transcriber,
        agent,
        synthesizer,
        Arc::clone(&sink) as Arc<dyn PlaybackSink>,
    )
    .expect("config should validate");
    let (audio_tx, audio_rx) = mpsc::channel(64);
    let (va_tx, va_rx) = mpsc::channel(64);
    let handle = engine.start(SessionInput {
        audio: audio_rx,
        voice_activity: va_rx,
    });
    Harness {
        handle,
        audio_tx,
        va_tx,
        sink,
    }
}

impl Harness {
    /// Drain the sink continuously, like an output device.
    fn pump(&self) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(5)).await;
                sink.play_next();
            }
        })
    }

    /// Feed speech-shaped audio plus voice activity, one chunk per 10ms.
    async fn speak(&self, seqs: std::ops::Range<u64>) {
        for seq in seqs {
            self.audio_tx.send(chunk(seq)).await.unwrap();
            self.va_tx.send(speech(seq)).await.unwrap();
            sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    description: &str,
    mut pred: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    panic!("event stream closed waiting for {description}")
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {description}"))
}

#[tokio::test]
async fn book_a_flight_happy_path() {
    let transcriber = Arc::new(ScriptedTranscriber::new([
        (2u64, vec![TranscriptEvent::partial(0, "book a", 0.4)]),
        (
            4u64,
            vec![TranscriptEvent::finalized(0, "book a flight to Boston", 0.95)],
        ),
    ]));
    let agent = Arc::new(StaticAgent::new("Sure, when would you like to travel?"));
    let synthesizer = Arc::new(ToneSynthesizer::new(1, 20));
    let harness = start_session(test_config(), transcriber, agent, synthesizer);
    let mut events = harness.handle.events();
    let pump = harness.pump();

    harness.speak(0..5).await;

    wait_for(&mut events, "utterance", |e| {
        matches!(e, SessionEvent::UtteranceCaptured(_))
    })
    .await;
    wait_for(&mut events, "agent speaking", |e| {
        matches!(e, SessionEvent::StateChanged(ConversationState::AgentSpeaking))
    })
    .await;
    wait_for(&mut events, "turn complete", |e| {
        matches!(
            e,
            SessionEvent::StateChanged(ConversationState::ListeningToUser)
        )
    })
    .await;

    pump.abort();
    let transcript = harness.handle.stop().await.unwrap();

    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[0].content, "book a flight to Boston");
    assert!(!transcript[0].interrupted);
    assert_eq!(transcript[1].role, Role::Agent);
    assert_eq!(transcript[1].content, "Sure, when would you like to travel?");
    assert!(!transcript[1].interrupted);

    // The record is host-exportable.
    let json = serde_json::to_string(&transcript).unwrap();
    assert!(json.contains("Boston"));
}

#[tokio::test]
async fn barge_in_truncates_to_played_audio() {
    let transcriber = Arc::new(ScriptedTranscriber::new([
        (
            4u64,
            vec![TranscriptEvent::finalized(0, "tell me a story", 0.9)],
        ),
        (
            8u64,
            vec![TranscriptEvent::finalized(1, "actually stop", 0.9)],
        ),
    ]));
    // Two fragments, five chunks each.
    let agent = Arc::new(StaticAgent::new("Sure, when would you like to travel?"));
    let synthesizer = Arc::new(ToneSynthesizer::new(5, 20));
    let harness = start_session(test_config(), transcriber, agent, synthesizer);
    let mut events = harness.handle.events();

    harness.speak(0..5).await;
    wait_for(&mut events, "agent speaking", |e| {
        matches!(e, SessionEvent::StateChanged(ConversationState::AgentSpeaking))
    })
    .await;

    // All ten chunks synthesized and enqueued, none pulled yet.
    timeout(Duration::from_secs(2), async {
        while harness.sink.queued() < 10 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("synthesis should enqueue ten chunks");

    // The device plays three of them.
    for _ in 0..3 {
        harness.sink.play_next().expect("chunk queued");
    }
    assert_eq!(harness.sink.watermark(), Some(2));

    // Sustained voice-activity burst: barge-in. Audio keeps flowing, and
    // chunk 8 carries the new utterance's final transcript.
    harness.speak(5..11).await;

    wait_for(&mut events, "barge-in", |e| {
        matches!(e, SessionEvent::Interrupted(InterruptionCause::BargeIn))
    })
    .await;
    wait_for(&mut events, "listening after interruption", |e| {
        matches!(
            e,
            SessionEvent::StateChanged(ConversationState::ListeningToUser)
        )
    })
    .await;

    // Flush discarded everything unplayed, and nothing leaks in afterwards.
    assert_eq!(harness.sink.queued(), 0);
    assert_eq!(harness.sink.watermark(), Some(2));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.sink.queued(), 0);

    // The interrupting speech becomes the next user turn; drain its reply.
    let pump = harness.pump();
    wait_for(&mut events, "second utterance", |e| {
        matches!(e, SessionEvent::UtteranceCaptured(u) if u.text == "actually stop")
    })
    .await;
    wait_for(&mut events, "second turn complete", |e| {
        matches!(
            e,
            SessionEvent::StateChanged(ConversationState::ListeningToUser)
        )
    })
    .await;
    pump.abort();

    let transcript = harness.handle.stop().await.unwrap();
    assert_eq!(transcript.len(), 4);

    let roles: Vec<Role> = transcript.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Agent, Role::User, Role::Agent]);

    // Three played chunks cover only the first fragment.
    assert!(transcript[1].interrupted);
    assert_eq!(transcript[1].content, "Sure, ");
    assert_eq!(transcript[2].content, "actually stop");
    assert!(!transcript[3].interrupted);
}

#[tokio::test]
async fn host_interrupt_cuts_agent_with_explicit_cause() {
    let transcriber = Arc::new(ScriptedTranscriber::new([(
        4u64,
        vec![TranscriptEvent::finalized(0, "read me the news", 0.9)],
    )]));
    let agent = Arc::new(StaticAgent::new("First headline. Second headline."));
    let synthesizer = Arc::new(ToneSynthesizer::new(4, 20));
    let harness = start_session(test_config(), transcriber, agent, synthesizer);
    let mut events = harness.handle.events();

    harness.speak(0..5).await;
    wait_for(&mut events, "agent speaking", |e| {
        matches!(e, SessionEvent::StateChanged(ConversationState::AgentSpeaking))
    })
    .await;

    harness.handle.interrupt().await.unwrap();
    let event = wait_for(&mut events, "explicit stop", |e| {
        matches!(e, SessionEvent::Interrupted(_))
    })
    .await;
    assert!(matches!(
        event,
        SessionEvent::Interrupted(InterruptionCause::ExplicitStop)
    ));

    wait_for(&mut events, "listening after stop", |e| {
        matches!(
            e,
            SessionEvent::StateChanged(ConversationState::ListeningToUser)
        )
    })
    .await;

    let transcript = harness.handle.stop().await.unwrap();
    assert_eq!(transcript.len(), 2);
    assert!(transcript[1].interrupted);
    // Nothing was pulled by a device, so nothing counts as spoken.
    assert_eq!(transcript[1].content, "");
}

#[tokio::test]
async fn exhausted_agent_retries_speak_fallback() {
    let transcriber = Arc::new(ScriptedTranscriber::new([(
        3u64,
        vec![TranscriptEvent::finalized(0, "can you hear me", 0.9)],
    )]));
    let agent = Arc::new(voxflow_engine::FlakyAgent::always_failing());
    let synthesizer = Arc::new(ToneSynthesizer::new(1, 20));
    let harness = start_session(test_config(), transcriber, agent, synthesizer);
    let mut events = harness.handle.events();
    let pump = harness.pump();

    harness.speak(0..4).await;

    wait_for(&mut events, "fallback", |e| {
        matches!(e, SessionEvent::FallbackSpoken)
    })
    .await;
    wait_for(&mut events, "listening after fallback", |e| {
        matches!(
            e,
            SessionEvent::StateChanged(ConversationState::ListeningToUser)
        )
    })
    .await;
    pump.abort();

    assert_eq!(harness.handle.state(), ConversationState::ListeningToUser);
    let transcript = harness.handle.stop().await.unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].role, Role::Agent);
    assert_eq!(transcript[1].content, "Sorry, could you say that again?");
    assert!(!transcript[1].interrupted);
}

#[tokio::test]
async fn stop_ends_session_and_returns_transcript() {
    let transcriber = Arc::new(ScriptedTranscriber::new([(
        2u64,
        vec![TranscriptEvent::finalized(0, "hello", 0.9)],
    )]));
    let agent = Arc::new(StaticAgent::new("Hi."));
    let synthesizer = Arc::new(ToneSynthesizer::new(1, 20));
    let harness = start_session(test_config(), transcriber, agent, synthesizer);
    let mut events = harness.handle.events();
    let pump = harness.pump();

    harness.speak(0..3).await;
    wait_for(&mut events, "turn complete", |e| {
        matches!(e, SessionEvent::StateChanged(ConversationState::AgentSpeaking))
    })
    .await;
    wait_for(&mut events, "listening", |e| {
        matches!(
            e,
            SessionEvent::StateChanged(ConversationState::ListeningToUser)
        )
    })
    .await;
    pump.abort();

    let state_rx = harness.handle.state_changes();
    let transcript = harness.handle.stop().await.unwrap();
    assert_eq!(transcript.len(), 2);
    assert_eq!(*state_rx.borrow(), ConversationState::Ended);
}
