//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (guards reference existing user providers)
//! - Validate value ranges (frame limit > 0, lifetime within five years)
//! - Detect duplicate reset entries
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WorkerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use crate::config::schema::WorkerConfig;
use crate::transport::Relay;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const SESSION_DRIVERS: &[&str] = &["redis", "array"];
const GUARD_DRIVERS: &[&str] = &["session"];
const USER_PROVIDER_DRIVERS: &[&str] = &["memory"];

/// Five years, in minutes.
const MAX_SESSION_LIFETIME_MINUTES: u64 = 2_628_000;

/// Validate a parsed configuration.
pub fn validate_config(config: &WorkerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.transport.relay.parse::<Relay>().is_err() {
        errors.push(ValidationError::new(
            "transport.relay",
            format!("unsupported relay `{}`", config.transport.relay),
        ));
    }
    if config.transport.max_frame_bytes == 0 {
        errors.push(ValidationError::new("transport.max_frame_bytes", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for name in &config.reset.providers {
        if name.trim().is_empty() {
            errors.push(ValidationError::new("reset.providers", "provider names must not be empty"));
        } else if !seen.insert(name.as_str()) {
            errors.push(ValidationError::new(
                "reset.providers",
                format!("provider `{}` is listed twice", name),
            ));
        }
    }

    if !SESSION_DRIVERS.contains(&config.session.driver.as_str()) {
        errors.push(ValidationError::new(
            "session.driver",
            format!("unsupported driver `{}`", config.session.driver),
        ));
    }
    if config.session.cookie.is_empty() {
        errors.push(ValidationError::new("session.cookie", "must not be empty"));
    }
    if config.session.lifetime_minutes == 0 {
        errors.push(ValidationError::new("session.lifetime_minutes", "must be greater than 0"));
    } else if config.session.lifetime_minutes > MAX_SESSION_LIFETIME_MINUTES {
        errors.push(ValidationError::new(
            "session.lifetime_minutes",
            format!("must be at most {}", MAX_SESSION_LIFETIME_MINUTES),
        ));
    }

    let auth = &config.auth;
    if !auth.guards.contains_key(&auth.default_guard) {
        errors.push(ValidationError::new(
            "auth.default_guard",
            format!("guard `{}` is not defined", auth.default_guard),
        ));
    }
    for (name, guard) in &auth.guards {
        if !GUARD_DRIVERS.contains(&guard.driver.as_str()) {
            errors.push(ValidationError::new(
                format!("auth.guards.{}.driver", name),
                format!("unsupported driver `{}`", guard.driver),
            ));
        }
        if !auth.providers.contains_key(&guard.provider) {
            errors.push(ValidationError::new(
                format!("auth.guards.{}.provider", name),
                format!("user provider `{}` is not defined", guard.provider),
            ));
        }
    }
    for (name, provider) in &auth.providers {
        if !USER_PROVIDER_DRIVERS.contains(&provider.driver.as_str()) {
            errors.push(ValidationError::new(
                format!("auth.providers.{}.driver", name),
                format!("unsupported driver `{}`", provider.driver),
            ));
        }
        let mut ids = HashSet::new();
        for user in &provider.users {
            if !ids.insert(user.id) {
                errors.push(ValidationError::new(
                    format!("auth.providers.{}.users", name),
                    format!("user id {} is listed twice", user.id),
                ));
            }
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid address `{}`", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
