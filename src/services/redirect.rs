//! Redirect responses.

use std::sync::{Arc, Mutex};

use hyper::body::Bytes;
use hyper::header::{HeaderValue, LOCATION};
use hyper::StatusCode;
use serde_json::Value;

use crate::container::{lock, Application, ContainerError, ServiceProvider};
use crate::http::KernelResponse;
use crate::kernel::KernelError;
use crate::services::session::Store;

/// Builds redirects and flashes data into the current session.
///
/// The redirector lives for the whole process, so the session it writes to
/// must be swapped every time a new store is resolved.
#[derive(Default)]
pub struct Redirector {
    session: Mutex<Option<Arc<Store>>>,
}

impl Redirector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_session(&self, session: Arc<Store>) {
        *lock(&self.session) = Some(session);
    }

    pub fn session(&self) -> Option<Arc<Store>> {
        lock(&self.session).clone()
    }

    /// `302 Found` to `location`.
    pub fn to(&self, location: &str) -> Result<KernelResponse, KernelError> {
        let mut response = KernelResponse::new(Bytes::new());
        *response.status_mut() = StatusCode::FOUND;
        response
            .headers_mut()
            .insert(LOCATION, HeaderValue::from_str(location)?);
        Ok(response)
    }

    /// Redirect and flash `key` into the session for the next request.
    pub fn with(
        &self,
        location: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<KernelResponse, KernelError> {
        if let Some(session) = self.session() {
            session.flash(key, value);
        }
        self.to(location)
    }
}

/// Binds the `redirect` service.
pub struct RoutingServiceProvider;

impl RoutingServiceProvider {
    pub const NAME: &'static str = "routing";
}

impl ServiceProvider for RoutingServiceProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn register(&self, app: &Application) -> Result<(), ContainerError> {
        app.singleton("redirect", |_| Ok(Arc::new(Redirector::new())));
        Ok(())
    }
}
