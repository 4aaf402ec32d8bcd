//! Session object, lifecycle handle, and observable events.
//!
//! `ConversationSession` is the explicit state owned by the orchestrator
//! task: configuration, history (single writer), and the observable state
//! machine. Stage tasks never touch it directly; they get snapshots.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;
use voxflow_core::{
    AudioChunk, ConversationHistory, ConversationTurn, EngineError, EngineResult,
    InterruptionCause, ResponseFragment, SessionConfig, TranscriptEvent, Utterance,
    VoiceActivitySample,
};

/// Conversation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    ListeningToUser,
    AgentThinking,
    AgentSpeaking,
    Interrupted,
    Ended,
}

/// Host-visible happenings, broadcast as they occur.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    StateChanged(ConversationState),
    PartialTranscript(TranscriptEvent),
    UtteranceCaptured(Utterance),
    UtteranceAmended { text: String },
    TranscriptGap { dropped: Duration },
    AgentFragment(ResponseFragment),
    Interrupted(InterruptionCause),
    FallbackSpoken,
    Error(String),
}

/// Host commands into a running session.
#[derive(Debug, Clone, Copy)]
pub enum SessionCommand {
    /// End the session gracefully.
    Stop,
    /// Cut the agent off (explicit stop cause); while listening, forces the
    /// current utterance boundary instead.
    Interrupt,
}

/// Input streams for a session. Capture runs for the whole session; voice
/// activity must stay observable even while the agent speaks — that is what
/// makes barge-in possible.
pub struct SessionInput {
    pub audio: mpsc::Receiver<AudioChunk>,
    pub voice_activity: mpsc::Receiver<VoiceActivitySample>,
}

/// Session state owned by the orchestrator task.
pub(crate) struct ConversationSession {
    pub id: Uuid,
    pub config: SessionConfig,
    pub history: Arc<RwLock<ConversationHistory>>,
    state_tx: watch::Sender<ConversationState>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl ConversationSession {
    pub fn new(
        config: SessionConfig,
    ) -> (
        Self,
        watch::Receiver<ConversationState>,
        broadcast::Sender<SessionEvent>,
    ) {
        let (state_tx, state_rx) = watch::channel(ConversationState::Idle);
        let (events_tx, _) = broadcast::channel(128);
        let session = Self {
            id: Uuid::new_v4(),
            config,
            history: Arc::new(RwLock::new(ConversationHistory::new())),
            state_tx,
            events_tx: events_tx.clone(),
        };
        (session, state_rx, events_tx)
    }

    pub fn state(&self) -> ConversationState {
        *self.state_tx.borrow()
    }

    pub fn set_state(&self, next: ConversationState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            info!(state = ?next, "conversation state");
            self.emit(SessionEvent::StateChanged(next));
        }
    }

    /// Broadcast an event; nobody listening is fine.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Single-writer access to the history.
    pub fn with_history<R>(&self, f: impl FnOnce(&mut ConversationHistory) -> R) -> R {
        let mut guard = self.history.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Handle returned by `ConversationEngine::start`.
pub struct SessionHandle {
    pub(crate) id: Uuid,
    pub(crate) cmd_tx: mpsc::Sender<SessionCommand>,
    pub(crate) state_rx: watch::Receiver<ConversationState>,
    pub(crate) events_tx: broadcast::Sender<SessionEvent>,
    pub(crate) history: Arc<RwLock<ConversationHistory>>,
    pub(crate) join: JoinHandle<EngineResult<()>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConversationState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConversationState> {
        self.state_rx.clone()
    }

    /// Subscribe to session events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Ordered snapshot of the conversation so far.
    pub fn transcript(&self) -> Vec<ConversationTurn> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    /// Cut the agent off, or force the utterance boundary while listening.
    pub async fn interrupt(&self) -> EngineResult<()> {
        self.cmd_tx
            .send(SessionCommand::Interrupt)
            .await
            .map_err(|_| EngineError::SessionEnded)
    }

    /// Stop the session and return the final transcript.
    pub async fn stop(self) -> EngineResult<Vec<ConversationTurn>> {
        let _ = self.cmd_tx.send(SessionCommand::Stop).await;
        match self.join.await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => return Err(error),
            Err(join_err) if join_err.is_cancelled() => {}
            Err(_) => return Err(EngineError::ChannelClosed("orchestrator task")),
        }
        Ok(self
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxflow_core::Role;

    #[test]
    fn state_change_broadcasts_once() {
        let (session, state_rx, events) = ConversationSession::new(SessionConfig::default());
        let mut event_rx = events.subscribe();

        session.set_state(ConversationState::ListeningToUser);
        session.set_state(ConversationState::ListeningToUser);

        assert_eq!(*state_rx.borrow(), ConversationState::ListeningToUser);
        assert!(matches!(
            event_rx.try_recv(),
            Ok(SessionEvent::StateChanged(ConversationState::ListeningToUser))
        ));
        // No duplicate for the no-op transition.
        assert!(event_rx.try_recv().is_err());
    }

    #[test]
    fn history_single_writer_snapshot() {
        let (session, _state_rx, _events) = ConversationSession::new(SessionConfig::default());
        session
            .with_history(|h| h.record(Role::User, "hi", chrono::Utc::now(), chrono::Utc::now()))
            .unwrap();

        let snapshot = session.with_history(|h| h.snapshot());
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content, "hi");
    }
}
