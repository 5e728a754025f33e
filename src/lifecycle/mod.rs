//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! SIGINT / SIGTERM (signals.rs)
//!     → Shutdown::on_signal → trigger(StopReason::Signal)   (shutdown.rs)
//!     → Worker::run_until stops between iterations and keeps the reason
//! ```
//!
//! # Design Decisions
//! - A request already accepted always runs to the end of its reset
//! - Stream closure by the supervisor is a normal exit, not a signal

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, StopReason};
pub use signals::shutdown_signal;
