//! Cooperative cancellation with synchronous acknowledgment.
//!
//! `CancelHandle::cancel` returns only once the stage guarantees no further
//! output will be produced — or errors when the acknowledgment deadline
//! passes. Fire-and-forget cancellation would leave a window where a dying
//! stage emits one more chunk after the orchestrator has already flushed the
//! sink; the acknowledgment closes that window.

use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use voxflow_core::{EngineError, EngineResult};

/// Create a connected cancel handle/listener pair.
pub fn cancel_pair() -> (CancelHandle, CancelListener) {
    // Capacity 2 so a second cancel never blocks behind an unserviced first.
    let (tx, rx) = mpsc::channel(2);
    (CancelHandle { tx }, CancelListener { rx })
}

/// Orchestrator side of the pair.
#[derive(Clone)]
pub struct CancelHandle {
    tx: mpsc::Sender<oneshot::Sender<()>>,
}

impl CancelHandle {
    /// Request cancellation and wait for the acknowledgment.
    ///
    /// Returns `Ok` once the stage has stopped producing output — including
    /// when the stage already finished on its own. Idempotent: cancelling
    /// twice has the same observable effect as once.
    pub async fn cancel(&self, stage: &'static str, deadline: Duration) -> EngineResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).await.is_err() {
            // Listener dropped: the stage task already exited.
            return Ok(());
        }
        match tokio::time::timeout(deadline, ack_rx).await {
            Ok(Ok(())) => Ok(()),
            // Listener dropped without acking: the task exited in between,
            // which also means no further output.
            Ok(Err(_)) => Ok(()),
            Err(_) => Err(EngineError::CancelTimeout(stage)),
        }
    }
}

/// Stage side of the pair. Await `requested` in the stage's select loop;
/// drop all output senders, then `ack`.
pub struct CancelListener {
    rx: mpsc::Receiver<oneshot::Sender<()>>,
}

impl CancelListener {
    /// Resolves when cancellation is requested. Never resolves if the handle
    /// is dropped without cancelling. Cancel-safe for use in `select!`.
    pub async fn requested(&mut self) -> CancelAck {
        match self.rx.recv().await {
            Some(tx) => CancelAck { tx: Some(tx) },
            None => std::future::pending().await,
        }
    }
}

/// Acknowledgment slot. Call `ack` only after every output path is dropped.
pub struct CancelAck {
    tx: Option<oneshot::Sender<()>>,
}

impl CancelAck {
    pub fn ack(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}
