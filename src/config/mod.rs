//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WorkerConfig (validated, immutable)
//!     → handed to bootstrap, transport and observability
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; the worker never reloads it
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError, Origin};
pub use schema::{
    AuthConfig, CookieConfig, GuardConfig, ObservabilityConfig, RedisConfig, ResetConfig,
    SessionConfig, TransportConfig, UserProviderConfig, UserRecord, WorkerConfig,
};
