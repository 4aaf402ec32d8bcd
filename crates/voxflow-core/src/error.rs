//! Error taxonomy for the conversation engine.
//!
//! Transient provider errors are retried with bounded backoff and stay
//! invisible to the end user beyond added latency. Fatal provider errors end
//! the session. Protocol violations discard the offending event and the
//! session continues.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by an external provider (transcriber, agent, synthesizer).
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Network blip, dropped stream, rate limit. Retried with backoff.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Auth failure, unsupported configuration. Ends the session.
    #[error("fatal provider error: {0}")]
    Fatal(String),

    /// Provider call exceeded its deadline. Treated as transient.
    #[error("provider call exceeded {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl ProviderError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProviderError::Fatal(_))
    }
}

/// Errors surfaced by the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("transcriber: {0}")]
    Transcriber(ProviderError),

    #[error("agent: {0}")]
    Agent(ProviderError),

    #[error("synthesis: {0}")]
    Synthesis(ProviderError),

    #[error("playback sink error: {0}")]
    Playback(String),

    /// Out-of-order sequence number or unexpected transition request. The
    /// offending event is logged and discarded; the session continues.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Cancellation was not acknowledged within its deadline. Fatal for the
    /// current turn only: the stage's output is force-dropped.
    #[error("cancellation of {0} stage not acknowledged in time")]
    CancelTimeout(&'static str),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("session ended")]
    SessionEnded,
}

impl EngineError {
    /// Whether this error must end the whole session.
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::Transcriber(e) | EngineError::Agent(e) | EngineError::Synthesis(e) => {
                e.is_fatal()
            }
            EngineError::SessionEnded => true,
            _ => false,
        }
    }
}
