//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the worker.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the worker.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct WorkerConfig {
    /// Relay to the supervisor.
    pub transport: TransportConfig,

    /// Providers reset after every request.
    pub reset: ResetConfig,

    /// Session storage.
    pub session: SessionConfig,

    /// Cookie defaults.
    pub cookie: CookieConfig,

    /// Redis connection defaults.
    pub redis: RedisConfig,

    /// Authentication guards and user providers.
    pub auth: AuthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Relay address: `pipes`, `tcp://host:port` or `unix:///path`.
    pub relay: String,

    /// Largest frame accepted from the supervisor.
    pub max_frame_bytes: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            relay: "pipes".to_string(),
            max_frame_bytes: 16 * 1024 * 1024, // 16MB
        }
    }
}

/// Provider reset configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResetConfig {
    /// Provider names re-registered after every request.
    pub providers: Vec<String>,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                "redis".to_string(),
                "cookie".to_string(),
                "session".to_string(),
            ],
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Storage driver: `redis` or `array`.
    pub driver: String,

    /// Name of the session cookie.
    pub cookie: String,

    /// Session lifetime in minutes.
    pub lifetime_minutes: u64,

    /// Key prefix for the redis driver.
    pub prefix: String,

    /// Redis connection used by the redis driver.
    pub connection: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: "redis".to_string(),
            cookie: "worker_session".to_string(),
            lifetime_minutes: 120,
            prefix: "session:".to_string(),
            connection: None,
        }
    }
}

/// Cookie defaults applied to cookies made by the jar.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    pub path: String,
    pub domain: Option<String>,
    pub secure: bool,
    pub same_site: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: None,
            secure: false,
            same_site: Some("lax".to_string()),
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RedisConfig {
    /// Database selected by new connections.
    pub default_database: u8,
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Guard used when none is named.
    pub default_guard: String,

    /// Guard definitions by name.
    pub guards: BTreeMap<String, GuardConfig>,

    /// User provider definitions by name.
    pub providers: BTreeMap<String, UserProviderConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let mut guards = BTreeMap::new();
        guards.insert(
            "web".to_string(),
            GuardConfig {
                driver: "session".to_string(),
                provider: "users".to_string(),
            },
        );
        let mut providers = BTreeMap::new();
        providers.insert("users".to_string(), UserProviderConfig::default());

        Self {
            default_guard: "web".to_string(),
            guards,
            providers,
        }
    }
}

/// One guard definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GuardConfig {
    /// Guard driver (e.g. `session`).
    pub driver: String,

    /// User provider name.
    pub provider: String,
}

/// One user provider definition.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UserProviderConfig {
    /// Provider driver (e.g. `memory`).
    pub driver: String,

    /// Users for the `memory` driver.
    pub users: Vec<UserRecord>,
}

impl Default for UserProviderConfig {
    fn default() -> Self {
        Self {
            driver: "memory".to_string(),
            users: Vec::new(),
        }
    }
}

/// A user known to the in-memory provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub password: String,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log requests that fail inside the worker loop.
    pub log_failures: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_failures: true,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9180".to_string(),
        }
    }
}
