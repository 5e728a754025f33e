//! Application bootstrap.
//!
//! # Responsibilities
//! - Register the framework providers in dependency order
//! - Install the worker's session guard and session store hooks
//! - Boot the application once, before the first request
//! - Provide the demo routes served by the binary

use std::sync::Arc;

use hyper::body::Bytes;
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::auth::{AuthManager, AuthServiceProvider, Credentials, Guard};
use crate::config::WorkerConfig;
use crate::container::{Application, ContainerError};
use crate::http::{KernelRequest, KernelResponse};
use crate::kernel::{self, HttpKernel, KernelError, Router};
use crate::services::{
    CookieServiceProvider, EventServiceProvider, RedisServer, RedisServiceProvider, Redirector,
    RoutingServiceProvider, SessionServiceProvider, Store,
};
use crate::transport::Transport;
use crate::worker::{SessionGuardAdapter, StateResetRegistry, Worker};

/// Build and boot the application context.
///
/// `redis` is the backing keyspace. It outlives every reset of the redis
/// provider, the way an external server would.
pub fn bootstrap(config: &WorkerConfig, redis: Arc<RedisServer>) -> Result<Arc<Application>, ContainerError> {
    let app = Application::new();

    app.register(Arc::new(EventServiceProvider), false)?;
    app.register(
        Arc::new(RedisServiceProvider::new(redis, config.redis.clone())),
        false,
    )?;
    app.register(Arc::new(CookieServiceProvider::new(config.cookie.clone())), false)?;
    app.register(Arc::new(SessionServiceProvider::new(config.session.clone())), false)?;
    app.register(Arc::new(RoutingServiceProvider), false)?;
    app.register(Arc::new(AuthServiceProvider::new(config.auth.clone())), false)?;

    SessionGuardAdapter::new().install(&app)?;
    app.boot()?;

    tracing::debug!(providers = ?app.provider_names(), "Application booted");
    Ok(app)
}

/// Bootstrap an application and wrap it in a worker serving `router`.
pub fn build_worker<T: Transport>(
    config: &WorkerConfig,
    transport: T,
    redis: Arc<RedisServer>,
    router: Router,
) -> Result<Worker<T, HttpKernel>, ContainerError> {
    let app = bootstrap(config, redis)?;
    let kernel = HttpKernel::new(Arc::clone(&app), router);
    let resets = StateResetRegistry::new(config.reset.providers.iter().cloned());
    Ok(Worker::new(transport, kernel, app, resets).report_failures(config.observability.log_failures))
}

/// The default guard for the current request.
pub fn guard(app: &Application) -> Result<Arc<dyn Guard>, KernelError> {
    Ok(app.make_as::<AuthManager>("auth")?.guard(app, None)?)
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    password: String,
    #[serde(default)]
    remember: bool,
}

fn index(_: &Application, _: &KernelRequest) -> Result<KernelResponse, KernelError> {
    Ok(kernel::text(StatusCode::OK, Bytes::from_static(b"resident-worker")))
}

fn login(app: &Application, request: &KernelRequest) -> Result<KernelResponse, KernelError> {
    let Ok(form) = serde_json::from_slice::<LoginForm>(request.body()) else {
        return kernel::json(
            StatusCode::UNPROCESSABLE_ENTITY,
            &json!({ "error": "expected username and password" }),
        );
    };

    let credentials = Credentials::new(form.username, form.password);
    if guard(app)?.attempt(&credentials, form.remember)? {
        app.make_as::<Redirector>("redirect")?
            .with("/me", "status", "logged-in")
    } else {
        kernel::json(StatusCode::UNAUTHORIZED, &json!({ "error": "invalid credentials" }))
    }
}

fn me(app: &Application, _: &KernelRequest) -> Result<KernelResponse, KernelError> {
    match guard(app)?.user() {
        Some(user) => kernel::json(StatusCode::OK, &json!({ "id": user.id, "username": user.username })),
        None => kernel::json(StatusCode::UNAUTHORIZED, &json!({ "error": "unauthenticated" })),
    }
}

fn logout(app: &Application, _: &KernelRequest) -> Result<KernelResponse, KernelError> {
    guard(app)?.logout()?;
    app.make_as::<Store>("session.store")?.invalidate();
    app.make_as::<Redirector>("redirect")?.to("/")
}

fn visits(app: &Application, _: &KernelRequest) -> Result<KernelResponse, KernelError> {
    let session = app.make_as::<Store>("session.store")?;
    let count = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
    session.put("visits", count);
    kernel::json(StatusCode::OK, &json!({ "visits": count }))
}

/// Routes served by the binary.
pub fn demo_routes() -> Router {
    Router::new()
        .get("/", index)
        .post("/login", login)
        .get("/me", me)
        .post("/logout", logout)
        .get("/visits", visits)
}
