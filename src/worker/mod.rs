//! The resident worker loop.
//!
//! # Data Flow
//! ```text
//! Transport::accept
//!     → decode_request            (Decoding)
//!     → Kernel::handle            (Dispatching, panics caught)
//!     → encode_response           (Encoding)
//!     → Transport::send           (Responding)
//!     → Kernel::terminate         (Terminating)
//!     → StateResetRegistry::reset (Resetting, always once a message was accepted)
//!     → next accept
//! ```
//!
//! # Design Decisions
//! - Strictly sequential: one message is fully reset before the next accept
//! - Iteration failures are counted, optionally logged, and never returned
//! - Only a fatal transport error ends the loop with an error
//! - Shutdown is observed between iterations, never inside one

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::container::Application;
use crate::http::{decode_request, encode_response, KernelRequest, KernelResponse, TranslateError};
use crate::kernel::{Kernel, KernelError};
use crate::lifecycle::StopReason;
use crate::observability::metrics;
use crate::transport::{Message, Transport, TransportError};

pub mod reset;
pub mod session_adapter;

pub use reset::{ResetError, StateResetRegistry};
pub use session_adapter::{GuardConstructor, SessionGuardAdapter};

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    AwaitingRequest,
    Decoding,
    Dispatching,
    Encoding,
    Responding,
    Terminating,
    Resetting,
    Terminated,
}

/// Counters over the life of the worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Messages taken off the transport, including ones that failed to read.
    pub accepted: u64,
    /// Iterations that completed without error.
    pub served: u64,
    pub failed: u64,
}

/// Failure of one iteration. Contained by the loop.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    #[error("failed to decode request: {0}")]
    Decode(#[source] TranslateError),

    #[error("kernel failed to handle request: {0}")]
    Dispatch(#[source] KernelError),

    #[error("kernel panicked: {0}")]
    Panicked(String),

    #[error("failed to encode response: {0}")]
    Encode(#[source] TranslateError),

    #[error("failed to send response: {0}")]
    Send(#[source] TransportError),

    #[error("kernel terminate failed: {0}")]
    Terminate(#[source] KernelError),

    #[error(transparent)]
    Reset(#[from] ResetError),

    #[error("unreadable message: {0}")]
    Transport(#[source] TransportError),
}

impl IterationError {
    /// Label used for the `outcome` metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            IterationError::Decode(_) => "decode_error",
            IterationError::Dispatch(_) => "dispatch_error",
            IterationError::Panicked(_) => "panic",
            IterationError::Encode(_) => "encode_error",
            IterationError::Send(_) => "send_error",
            IterationError::Terminate(_) => "terminate_error",
            IterationError::Reset(_) => "reset_error",
            IterationError::Transport(_) => "transport_error",
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Serves requests from a transport through a kernel until the stream ends.
pub struct Worker<T, K> {
    transport: T,
    kernel: K,
    app: Arc<Application>,
    resets: StateResetRegistry,
    report_failures: bool,
    state: WorkerState,
    stats: WorkerStats,
    stop_reason: Option<StopReason>,
}

impl<T: Transport, K: Kernel> Worker<T, K> {
    pub fn new(transport: T, kernel: K, app: Arc<Application>, resets: StateResetRegistry) -> Self {
        Self {
            transport,
            kernel,
            app,
            resets,
            report_failures: true,
            state: WorkerState::Idle,
            stats: WorkerStats::default(),
            stop_reason: None,
        }
    }

    /// Log contained failures at `warn`. On by default.
    pub fn report_failures(mut self, enabled: bool) -> Self {
        self.report_failures = enabled;
        self
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats
    }

    /// Why `run_until` stopped early; `None` after end-of-stream.
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Serve until the transport reports end-of-stream.
    pub async fn run(&mut self) -> Result<WorkerStats, TransportError> {
        loop {
            self.state = WorkerState::AwaitingRequest;
            let accepted = self.transport.accept().await;
            if !self.process(accepted).await? {
                break;
            }
        }
        Ok(self.stats)
    }

    /// Serve until end-of-stream or until `shutdown` fires.
    pub async fn run_until(
        &mut self,
        mut shutdown: broadcast::Receiver<StopReason>,
    ) -> Result<WorkerStats, TransportError> {
        loop {
            self.state = WorkerState::AwaitingRequest;
            let accepted = tokio::select! {
                biased;
                reason = shutdown.recv() => Err(reason.unwrap_or(StopReason::Requested)),
                accepted = self.transport.accept() => Ok(accepted),
            };
            let accepted = match accepted {
                Ok(accepted) => accepted,
                Err(reason) => {
                    tracing::info!(reason = %reason, "Worker stopping");
                    self.stop_reason = Some(reason);
                    self.state = WorkerState::Terminated;
                    break;
                }
            };
            if !self.process(accepted).await? {
                break;
            }
        }
        Ok(self.stats)
    }

    /// Handle one accept result. `Ok(false)` means the stream is over.
    async fn process(
        &mut self,
        accepted: Result<Option<Message>, TransportError>,
    ) -> Result<bool, TransportError> {
        match accepted {
            Ok(Some(message)) => {
                self.stats.accepted += 1;
                let span = tracing::info_span!("iteration", id = %Uuid::new_v4());
                self.iteration(message).instrument(span).await;
                Ok(true)
            }
            Ok(None) => {
                tracing::info!(
                    served = self.stats.served,
                    failed = self.stats.failed,
                    "Relay closed, worker stopping"
                );
                self.state = WorkerState::Terminated;
                Ok(false)
            }
            Err(err) if err.is_recoverable() => {
                self.stats.accepted += 1;
                let start = Instant::now();
                self.record_failure(&IterationError::Transport(err), start);
                self.state = WorkerState::Idle;
                Ok(true)
            }
            Err(err) => {
                tracing::error!(error = %err, "Transport failed, worker stopping");
                self.state = WorkerState::Terminated;
                Err(err)
            }
        }
    }

    async fn iteration(&mut self, message: Message) {
        let start = Instant::now();
        let served = self.serve(message).await;

        self.state = WorkerState::Resetting;
        let reset = self.resets.reset(&self.app);
        self.state = WorkerState::Idle;

        match served.and(reset.map_err(IterationError::from)) {
            Ok(_) => {
                self.stats.served += 1;
                metrics::record_request("ok", start);
                tracing::debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Request served");
            }
            Err(err) => self.record_failure(&err, start),
        }
    }

    fn record_failure(&mut self, err: &IterationError, start: Instant) {
        self.stats.failed += 1;
        metrics::record_request(err.outcome(), start);
        if self.report_failures {
            tracing::warn!(error = %err, outcome = err.outcome(), "Request failed");
        }
    }

    async fn serve(&mut self, message: Message) -> Result<(), IterationError> {
        self.state = WorkerState::Decoding;
        let request = Arc::new(decode_request(message).map_err(IterationError::Decode)?);
        tracing::debug!(method = %request.method(), uri = %request.uri(), "Dispatching request");

        self.state = WorkerState::Dispatching;
        let response = self.dispatch(Arc::clone(&request))?;

        self.state = WorkerState::Encoding;
        let message = encode_response(&response).map_err(IterationError::Encode)?;

        self.state = WorkerState::Responding;
        self.transport
            .send(message)
            .await
            .map_err(IterationError::Send)?;

        self.state = WorkerState::Terminating;
        self.kernel
            .terminate(&request, &response)
            .map_err(IterationError::Terminate)
    }

    fn dispatch(&self, request: Arc<KernelRequest>) -> Result<KernelResponse, IterationError> {
        match catch_unwind(AssertUnwindSafe(|| self.kernel.handle(request))) {
            Ok(result) => result.map_err(IterationError::Dispatch),
            Err(payload) => Err(IterationError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}
