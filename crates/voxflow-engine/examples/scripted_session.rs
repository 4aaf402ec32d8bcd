//! Drive one scripted conversation end to end and print the transcript.
//!
//! Run with: cargo run -p voxflow-engine --example scripted_session

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use voxflow_core::{AudioChunk, SampleFormat, SessionConfig, TranscriptEvent, VoiceActivitySample};
use voxflow_engine::{
    BufferedPlayback, ConversationEngine, ConversationState, PlaybackSink, ScriptedTranscriber,
    SessionInput, StaticAgent, ToneSynthesizer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut config = SessionConfig::default();
    config.endpointing.silence_timeout = Duration::from_millis(300);

    let transcriber = Arc::new(ScriptedTranscriber::new([(
        4u64,
        vec![TranscriptEvent::finalized(0, "book a flight to Boston", 0.95)],
    )]));
    let agent = Arc::new(StaticAgent::new("Sure, when would you like to travel?"));
    let synthesizer = Arc::new(ToneSynthesizer::new(2, 40));
    let sink = Arc::new(BufferedPlayback::new(32));

    let engine = ConversationEngine::new(
        config,
        transcriber,
        agent,
        synthesizer,
        Arc::clone(&sink) as Arc<dyn PlaybackSink>,
    )?;

    let (audio_tx, audio_rx) = mpsc::channel(64);
    let (va_tx, va_rx) = mpsc::channel(64);
    let handle = engine.start(SessionInput {
        audio: audio_rx,
        voice_activity: va_rx,
    });

    // Pretend to be an output device.
    let pump = {
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(10)).await;
                sink.play_next();
            }
        })
    };

    // Pretend to be a microphone: 150ms of speech, then silence.
    let format = SampleFormat::default();
    for seq in 0..5u64 {
        audio_tx.send(AudioChunk::new(vec![0u8; 960], format, seq)).await?;
        va_tx.send(VoiceActivitySample::new(seq, 0.9)).await?;
        sleep(Duration::from_millis(30)).await;
    }

    // Wait for the agent's reply to finish playing.
    let mut state = handle.state_changes();
    loop {
        state.changed().await?;
        let current = *state.borrow();
        if current == ConversationState::AgentSpeaking {
            break;
        }
    }
    loop {
        state.changed().await?;
        if *state.borrow() == ConversationState::ListeningToUser {
            break;
        }
    }

    pump.abort();
    let transcript = handle.stop().await?;
    for turn in transcript {
        println!("{:?}: {}", turn.role, turn.content);
    }
    Ok(())
}
