//! Stop requests for the worker loop.
//!
//! The supervisor normally ends a worker by closing the relay. A `Shutdown`
//! covers the other exits: an OS signal, or an embedding program that wants
//! the loop back. Either way the reason travels with the request so the
//! worker can report why it stopped.

use tokio::sync::broadcast;

use crate::lifecycle::signals::shutdown_signal;

/// Why the worker was asked to stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// An OS signal, by name (`SIGINT`, `SIGTERM`).
    Signal(&'static str),
    /// Requested by the embedding program, or its `Shutdown` was dropped.
    Requested,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Signal(name) => write!(f, "signal {}", name),
            StopReason::Requested => write!(f, "stop requested"),
        }
    }
}

/// Sends a [`StopReason`] to every worker loop subscribed to it.
pub struct Shutdown {
    tx: broadcast::Sender<StopReason>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver to hand to `Worker::run_until`.
    pub fn subscribe(&self) -> broadcast::Receiver<StopReason> {
        self.tx.subscribe()
    }

    /// Ask subscribers to stop. Returns how many were listening.
    pub fn trigger(&self, reason: StopReason) -> usize {
        tracing::debug!(reason = %reason, "Stop requested");
        self.tx.send(reason).unwrap_or(0)
    }

    /// Wait for SIGINT or SIGTERM and forward it as the stop reason.
    pub async fn on_signal(self) {
        let name = shutdown_signal().await;
        self.trigger(StopReason::Signal(name));
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
