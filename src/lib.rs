//! Resident HTTP worker library.
//!
//! Keeps an application kernel resident across requests relayed by a
//! supervising process, and scrubs request-scoped state between them.

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod container;
pub mod http;
pub mod kernel;
pub mod lifecycle;
pub mod observability;
pub mod services;
pub mod transport;
pub mod worker;

pub use bootstrap::{bootstrap, build_worker, demo_routes};
pub use config::schema::WorkerConfig;
pub use container::Application;
pub use lifecycle::{Shutdown, StopReason};
pub use worker::{Worker, WorkerStats};
