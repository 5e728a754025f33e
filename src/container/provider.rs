//! Service providers.
//!
//! A provider groups the bindings of one subsystem. Registering it binds its
//! services; registering it again with `force` rebinds them, dropping every
//! instance built under the old bindings.

use crate::container::{Application, ContainerError};

/// Registers a group of services with the application.
pub trait ServiceProvider: Send + Sync {
    /// Unique provider name, used for lookups and resets.
    fn name(&self) -> &'static str;

    /// Bind services. Must be safe to call more than once.
    fn register(&self, app: &Application) -> Result<(), ContainerError>;

    /// Run after every provider has registered.
    fn boot(&self, _app: &Application) -> Result<(), ContainerError> {
        Ok(())
    }
}
