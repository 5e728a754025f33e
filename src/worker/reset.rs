//! Post-response provider reset.
//!
//! # Responsibilities
//! - Force-register each stateful provider again after every request
//! - Skip providers the application never registered
//! - Keep going past a failing provider and report the first failure

use crate::container::{Application, ContainerError};
use crate::observability::metrics;

/// Providers reset by default.
pub const DEFAULT_PROVIDERS: [&str; 3] = ["redis", "cookie", "session"];

/// A provider that could not be registered again.
#[derive(Debug, thiserror::Error)]
#[error("failed to reset provider `{provider}`: {source}")]
pub struct ResetError {
    pub provider: String,
    #[source]
    pub source: ContainerError,
}

/// The set of providers whose state must not outlive a request.
#[derive(Debug, Clone)]
pub struct StateResetRegistry {
    providers: Vec<String>,
}

impl StateResetRegistry {
    pub fn new<I, S>(providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            providers: providers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn providers(&self) -> &[String] {
        &self.providers
    }

    /// Re-register every known provider in order. Returns how many were reset.
    pub fn reset(&self, app: &Application) -> Result<usize, ResetError> {
        let mut reset = 0;
        let mut first_error = None;

        for name in &self.providers {
            let Some(provider) = app.get_provider(name) else {
                tracing::trace!(provider = %name, "Provider not registered, skipping reset");
                continue;
            };

            match app.register(provider, true) {
                Ok(_) => {
                    reset += 1;
                    metrics::record_provider_reset(name, true);
                }
                Err(source) => {
                    metrics::record_provider_reset(name, false);
                    if first_error.is_none() {
                        first_error = Some(ResetError {
                            provider: name.clone(),
                            source,
                        });
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(reset),
        }
    }
}

impl Default for StateResetRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_PROVIDERS)
    }
}
