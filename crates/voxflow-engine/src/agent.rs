//! Agent stage: wraps the language-model provider.
//!
//! Produces a lazy, finite fragment sequence terminated by `is_last` or by
//! cancellation. Cancellation is acknowledged synchronously: once `cancel`
//! returns, no further fragment can arrive. Transient failures with nothing
//! emitted yet are retried with backoff; a mid-stream failure is not silently
//! replayed, it surfaces so the orchestrator can speak the fallback.

use crate::cancel::{cancel_pair, CancelAck, CancelHandle, CancelListener};
use crate::providers::{AgentPrompt, AgentProvider, FragmentStream};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};
use voxflow_core::{AgentConfig, EngineError, EngineResult, ProviderError, ResponseFragment};

/// Handle to one running agent turn.
pub struct AgentHandle {
    fragments: Option<mpsc::Receiver<ResponseFragment>>,
    cancel: CancelHandle,
    join: JoinHandle<EngineResult<()>>,
}

impl AgentHandle {
    /// Take the fragment receiver. Returns `None` the second time.
    pub fn take_fragments(&mut self) -> Option<mpsc::Receiver<ResponseFragment>> {
        self.fragments.take()
    }

    /// Cancel generation. Returns once the stage guarantees no further
    /// fragments will be produced. Idempotent.
    pub async fn cancel(&self, deadline: Duration) -> EngineResult<()> {
        self.cancel.cancel("agent", deadline).await
    }

    /// Force-drop the stage after a cancellation-acknowledgment timeout.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Stage outcome, available after the fragment stream ends.
    pub async fn outcome(self) -> EngineResult<()> {
        match self.join.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(_) => Err(EngineError::ChannelClosed("agent task")),
        }
    }
}

pub struct AgentStage;

impl AgentStage {
    /// Spawn generation for one utterance. The orchestrator enforces that at
    /// most one agent turn runs at a time.
    pub fn spawn(
        provider: Arc<dyn AgentProvider>,
        config: AgentConfig,
        prompt: AgentPrompt,
        capacity: usize,
    ) -> AgentHandle {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (cancel_handle, cancel_listener) = cancel_pair();
        let join = tokio::spawn(run(provider, config, prompt, out_tx, cancel_listener));
        AgentHandle {
            fragments: Some(out_rx),
            cancel: cancel_handle,
            join,
        }
    }
}

async fn run(
    provider: Arc<dyn AgentProvider>,
    config: AgentConfig,
    prompt: AgentPrompt,
    out: mpsc::Sender<ResponseFragment>,
    mut cancel: CancelListener,
) -> EngineResult<()> {
    let mut attempt = 0u32;
    let mut backoff = config.retry_backoff;

    loop {
        let opened = tokio::select! {
            biased;
            ack = cancel.requested() => {
                drop(out);
                ack.ack();
                return Ok(());
            }
            result = timeout(config.provider_deadline, provider.complete(prompt.clone())) => {
                match result {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(error)) => Err(error),
                    Err(_) => Err(ProviderError::DeadlineExceeded(config.provider_deadline)),
                }
            }
        };

        let failure = match opened {
            Ok(stream) => match relay(stream, &out, &mut cancel).await {
                RelayOutcome::Done => return Ok(()),
                RelayOutcome::Cancelled(ack) => {
                    drop(out);
                    ack.ack();
                    return Ok(());
                }
                RelayOutcome::Failed { error, emitted } => {
                    if emitted > 0 {
                        // Replaying from scratch would double-speak what the
                        // user already heard.
                        return Err(EngineError::Agent(error));
                    }
                    error
                }
            },
            Err(error) => error,
        };

        if failure.is_fatal() || attempt >= config.max_retries {
            return Err(EngineError::Agent(failure));
        }
        attempt += 1;
        warn!(attempt, error = %failure, "agent generation failed, retrying");

        tokio::select! {
            biased;
            ack = cancel.requested() => {
                drop(out);
                ack.ack();
                return Ok(());
            }
            _ = sleep(backoff) => {}
        }
        backoff = backoff.saturating_mul(2);
    }
}

enum RelayOutcome {
    Done,
    Cancelled(CancelAck),
    Failed { error: ProviderError, emitted: usize },
}

enum SendResult {
    Sent,
    Cancelled(CancelAck),
    Closed,
}

async fn send_fragment(
    fragment: ResponseFragment,
    out: &mpsc::Sender<ResponseFragment>,
    cancel: &mut CancelListener,
) -> SendResult {
    tokio::select! {
        biased;
        ack = cancel.requested() => SendResult::Cancelled(ack),
        result = out.send(fragment) => {
            if result.is_ok() {
                SendResult::Sent
            } else {
                SendResult::Closed
            }
        }
    }
}

/// Relay provider fragments with one fragment of lookahead so the terminal
/// fragment always carries `is_last`, even when the provider just closes its
/// stream.
async fn relay(
    mut stream: FragmentStream,
    out: &mpsc::Sender<ResponseFragment>,
    cancel: &mut CancelListener,
) -> RelayOutcome {
    let mut next_seq = 0u64;
    let mut held: Option<ResponseFragment> = None;
    let mut emitted = 0usize;

    loop {
        let item = tokio::select! {
            biased;
            ack = cancel.requested() => return RelayOutcome::Cancelled(ack),
            item = stream.fragments.recv() => item,
        };

        match item {
            Some(Ok(fragment)) => {
                if fragment.seq != next_seq {
                    warn!(
                        expected = next_seq,
                        got = fragment.seq,
                        "out-of-order fragment discarded"
                    );
                    continue;
                }
                next_seq += 1;
                let terminal = fragment.is_last;

                if let Some(previous) = held.replace(fragment) {
                    match send_fragment(previous, out, cancel).await {
                        SendResult::Sent => emitted += 1,
                        SendResult::Cancelled(ack) => return RelayOutcome::Cancelled(ack),
                        SendResult::Closed => return RelayOutcome::Done,
                    }
                }
                if terminal {
                    if let Some(last) = held.take() {
                        match send_fragment(last, out, cancel).await {
                            SendResult::Sent => emitted += 1,
                            SendResult::Cancelled(ack) => return RelayOutcome::Cancelled(ack),
                            SendResult::Closed => {}
                        }
                    }
                    debug!(fragments = emitted, "agent generation complete");
                    return RelayOutcome::Done;
                }
            }
            Some(Err(error)) => return RelayOutcome::Failed { error, emitted },
            None => {
                if let Some(mut last) = held.take() {
                    last.is_last = true;
                    match send_fragment(last, out, cancel).await {
                        SendResult::Sent => emitted += 1,
                        SendResult::Cancelled(ack) => return RelayOutcome::Cancelled(ack),
                        SendResult::Closed => {}
                    }
                }
                debug!(fragments = emitted, "agent generation complete");
                return RelayOutcome::Done;
            }
        }
    }
}
