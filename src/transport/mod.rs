//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! supervisor ──bytes──▶ relay.rs (frame reader) ──▶ Message { context, body }
//!                                                        │
//!                                                        ▼
//!                                                  http translator
//!                                                        │
//! supervisor ◀──bytes── relay.rs (frame writer) ◀── Message { context, body }
//! ```
//!
//! # Design Decisions
//! - One `accept` yields exactly one complete message or end-of-stream
//! - No HTTP semantics here; context documents are opaque bytes
//! - Errors that leave the stream aligned are recoverable, everything else
//!   ends the worker

pub mod frame;
pub mod relay;

use hyper::body::Bytes;

pub use frame::{Frame, FrameError};
pub use relay::{Relay, StreamRelay};

/// One request or response as carried by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Context document (JSON) describing the request or response head.
    pub context: Bytes,
    /// Body bytes.
    pub body: Bytes,
}

impl Message {
    pub fn new(context: impl Into<Bytes>, body: impl Into<Bytes>) -> Self {
        Self {
            context: context.into(),
            body: body.into(),
        }
    }
}

/// Transport error.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    Oversized { size: u64, limit: u64 },

    #[error("stream closed in the middle of a message")]
    Truncated,

    #[error("protocol violation: {0}")]
    Protocol(&'static str),

    #[error("unsupported relay `{0}`")]
    UnsupportedRelay(String),
}

impl TransportError {
    /// Whether the stream is still aligned on a frame boundary after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Oversized { .. } | Self::Protocol(_))
    }
}

/// Duplex message channel to the supervisor.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Wait for the next message. `Ok(None)` means the peer closed the stream
    /// or asked the worker to stop.
    async fn accept(&mut self) -> Result<Option<Message>, TransportError>;

    /// Send one message to the peer.
    async fn send(&mut self, message: Message) -> Result<(), TransportError>;
}
