//! Observability.
//!
//! # Data Flow
//! ```text
//! Worker loop produces:
//!     → logging.rs (tracing events on stderr, one span per iteration)
//!     → metrics.rs (request outcomes, latency, provider resets)
//!
//! Consumers:
//!     → Supervisor's stderr capture
//!     → Prometheus scrape (optional)
//! ```
//!
//! # Design Decisions
//! - stdout may be the relay, so nothing is ever logged there
//! - Metrics are recorded unconditionally; without an installed recorder
//!   they are no-ops

pub mod logging;
pub mod metrics;
