//! Frame prefix codec.
//!
//! # Layout
//! ```text
//! ┌───────┬──────────────────────┬──────────────────────┬─────────────┐
//! │ flags │ payload length (LE)  │ payload length (BE)  │  payload    │
//! │ 1 byte│ 8 bytes              │ 8 bytes              │  N bytes    │
//! └───────┴──────────────────────┴──────────────────────┴─────────────┘
//! ```
//!
//! The length is written twice in opposite byte orders. A reader that sees
//! the two disagree has lost frame alignment and cannot recover it.

use hyper::body::Bytes;

/// Size of the frame prefix in bytes.
pub const PREFIX_SIZE: usize = 17;

/// Frame flag bits.
pub mod flags {
    /// Frame carries no payload.
    pub const EMPTY: u8 = 2;
    /// Payload is raw bytes.
    pub const RAW: u8 = 4;
    /// Payload is an error message.
    pub const ERROR: u8 = 8;
    /// Payload is a control message (request or response context).
    pub const CONTROL: u8 = 16;
}

/// Error decoding a frame prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame length mismatch: little-endian {le}, big-endian {be}")]
    LengthMismatch { le: u64, be: u64 },
}

/// One frame read from or written to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    /// Raw payload frame, or an empty frame if the payload is empty.
    pub fn raw(payload: Bytes) -> Self {
        if payload.is_empty() {
            return Self::empty();
        }
        Self { flags: flags::RAW, payload }
    }

    /// Control frame carrying a context document.
    pub fn control(payload: Bytes) -> Self {
        Self {
            flags: flags::CONTROL | flags::RAW,
            payload,
        }
    }

    pub fn empty() -> Self {
        Self {
            flags: flags::EMPTY,
            payload: Bytes::new(),
        }
    }

    /// Check whether a flag bit is set.
    pub fn has(&self, flag: u8) -> bool {
        self.flags & flag == flag
    }

    pub fn is_control(&self) -> bool {
        self.has(flags::CONTROL)
    }

    /// Encode the prefix for this frame.
    pub fn prefix(&self) -> [u8; PREFIX_SIZE] {
        encode_prefix(self.flags, self.payload.len() as u64)
    }
}

/// Encode a frame prefix.
pub fn encode_prefix(flags: u8, len: u64) -> [u8; PREFIX_SIZE] {
    let mut prefix = [0u8; PREFIX_SIZE];
    prefix[0] = flags;
    prefix[1..9].copy_from_slice(&len.to_le_bytes());
    prefix[9..17].copy_from_slice(&len.to_be_bytes());
    prefix
}

/// Decode a frame prefix into `(flags, payload length)`.
pub fn decode_prefix(prefix: &[u8; PREFIX_SIZE]) -> Result<(u8, u64), FrameError> {
    let mut le = [0u8; 8];
    let mut be = [0u8; 8];
    le.copy_from_slice(&prefix[1..9]);
    be.copy_from_slice(&prefix[9..17]);

    let le = u64::from_le_bytes(le);
    let be = u64::from_be_bytes(be);
    if le != be {
        return Err(FrameError::LengthMismatch { le, be });
    }
    Ok((prefix[0], le))
}
