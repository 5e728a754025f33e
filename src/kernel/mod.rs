//! HTTP kernel.
//!
//! # Data Flow
//! ```text
//! Arc<KernelRequest>
//!     → bound into the container as `request` (fires rebinding callbacks)
//!     → StartSession middleware (when `session.middleware` is bound)
//!     → router lookup → route handler
//!     → queued cookies appended as Set-Cookie
//!     → KernelResponse
//!
//! terminate(request, response)
//!     → application terminating callbacks
//! ```

use std::sync::Arc;

use hyper::body::Bytes;
use hyper::header::{HeaderValue, ALLOW, CONTENT_TYPE, SET_COOKIE};
use hyper::StatusCode;

use crate::auth::AuthError;
use crate::container::{Application, ContainerError};
use crate::http::{KernelRequest, KernelResponse};
use crate::services::cookie::CookieJar;
use crate::services::session::{SessionError, StartSession};

pub mod router;

pub use router::{Handler, RouteMatch, Router};

/// Kernel error.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid header value: {0}")]
    Header(#[from] hyper::header::InvalidHeaderValue),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handler failed: {0}")]
    Handler(String),
}

/// The application's entry point: one request in, one response out.
pub trait Kernel {
    fn handle(&self, request: Arc<KernelRequest>) -> Result<KernelResponse, KernelError>;

    /// Run after the response has been sent.
    fn terminate(&self, request: &KernelRequest, response: &KernelResponse) -> Result<(), KernelError>;
}

/// Plain-text response.
pub fn text(status: StatusCode, body: impl Into<Bytes>) -> KernelResponse {
    let mut response = KernelResponse::new(body.into());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

/// JSON response.
pub fn json(status: StatusCode, value: &serde_json::Value) -> Result<KernelResponse, KernelError> {
    let mut response = KernelResponse::new(Bytes::from(serde_json::to_vec(value)?));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

/// Kernel dispatching to a route table inside the application context.
pub struct HttpKernel {
    app: Arc<Application>,
    router: Router,
}

impl HttpKernel {
    pub fn new(app: Arc<Application>, router: Router) -> Self {
        Self { app, router }
    }

    pub fn app(&self) -> &Arc<Application> {
        &self.app
    }

    fn dispatch(&self, request: &KernelRequest) -> Result<KernelResponse, KernelError> {
        match self.router.find(request.method(), request.uri().path()) {
            RouteMatch::Found(handler) => handler(&self.app, request),
            RouteMatch::MethodNotAllowed(allowed) => {
                let allowed = allowed.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ");
                let mut response = text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
                response.headers_mut().insert(ALLOW, HeaderValue::from_str(&allowed)?);
                Ok(response)
            }
            RouteMatch::NotFound => Ok(text(StatusCode::NOT_FOUND, "Not Found")),
        }
    }

    fn add_queued_cookies(&self, response: &mut KernelResponse) -> Result<(), KernelError> {
        if !self.app.bound("cookie") {
            return Ok(());
        }
        let jar = self.app.make_as::<CookieJar>("cookie")?;
        for cookie in jar.queued_cookies() {
            response
                .headers_mut()
                .append(SET_COOKIE, HeaderValue::from_str(&cookie.to_header_value())?);
        }
        Ok(())
    }
}

impl Kernel for HttpKernel {
    fn handle(&self, request: Arc<KernelRequest>) -> Result<KernelResponse, KernelError> {
        self.app.instance("request", Arc::clone(&request))?;

        let mut response = if self.app.bound("session.middleware") {
            let middleware = self.app.make_as::<StartSession>("session.middleware")?;
            middleware.handle(&self.app, &request, |request| self.dispatch(request))?
        } else {
            self.dispatch(&request)?
        };

        self.add_queued_cookies(&mut response)?;
        Ok(response)
    }

    fn terminate(&self, _request: &KernelRequest, _response: &KernelResponse) -> Result<(), KernelError> {
        self.app.terminate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CookieConfig, SessionConfig};
    use crate::services::cookie::CookieServiceProvider;
    use crate::services::session::{SessionServiceProvider, Store};
    use hyper::Method;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(method: Method, path: &str) -> Arc<KernelRequest> {
        let mut request = KernelRequest::new(Bytes::new());
        *request.method_mut() = method;
        *request.uri_mut() = path.parse().unwrap();
        Arc::new(request)
    }

    fn app() -> Arc<Application> {
        let app = Application::new();
        app.register(Arc::new(CookieServiceProvider::new(CookieConfig::default())), false)
            .unwrap();
        let session = SessionConfig {
            driver: "array".into(),
            ..SessionConfig::default()
        };
        app.register(Arc::new(SessionServiceProvider::new(session)), false)
            .unwrap();
        app
    }

    #[test]
    fn unknown_routes_and_methods() {
        let kernel = HttpKernel::new(Application::new(), Router::new().post("/login", |_, _| {
            Ok(text(StatusCode::OK, "ok"))
        }));

        let missing = kernel.handle(request(Method::GET, "/nope")).unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let wrong = kernel.handle(request(Method::GET, "/login")).unwrap();
        assert_eq!(wrong.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(wrong.headers()[ALLOW], "POST");
    }

    #[test]
    fn the_request_is_bound_into_the_container() {
        let app = Application::new();
        let kernel = HttpKernel::new(Arc::clone(&app), Router::new().get("/", |app, _| {
            let bound = app.make_as::<KernelRequest>("request")?;
            Ok(text(StatusCode::OK, bound.uri().to_string()))
        }));

        let response = kernel.handle(request(Method::GET, "/?a=1")).unwrap();
        assert_eq!(response.body().as_ref(), b"/?a=1");
    }

    #[test]
    fn session_cookie_is_attached() {
        let app = app();
        let kernel = HttpKernel::new(Arc::clone(&app), Router::new().get("/", |app, _| {
            app.make_as::<Store>("session.store")?.put("seen", true);
            Ok(text(StatusCode::OK, "ok"))
        }));

        let response = kernel.handle(request(Method::GET, "/")).unwrap();
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("worker_session="));
    }

    #[test]
    fn terminate_runs_terminating_callbacks() {
        let app = Application::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        app.terminating(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let kernel = HttpKernel::new(Arc::clone(&app), Router::new());
        let req = request(Method::GET, "/");
        let response = kernel.handle(Arc::clone(&req)).unwrap();
        kernel.terminate(&req, &response).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
