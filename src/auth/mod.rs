//! Authentication.
//!
//! # Data Flow
//! ```text
//! auth.guard(app, name)
//!     → cached guard? return it
//!     → guard config (driver, provider)
//!     → driver creator (custom creators win over the built-in `session`)
//!     → cache until the next request is bound
//! ```
//!
//! # Design Decisions
//! - The manager lives for the whole process; guards do not. Binding a new
//!   `request` instance forgets every cached guard.
//! - Optional guard capabilities are separate traits reached through
//!   `Guard::as_*`, so a creator can attach what a guard supports.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{AuthConfig, GuardConfig};
use crate::container::{lock, Accessor, Application, ContainerError, ServiceProvider};
use crate::http::KernelRequest;
use crate::services::cookie::CookieJar;
use crate::services::events::Dispatcher;
use crate::services::session::{SessionError, Store};

pub mod session_guard;
pub mod user;

pub use session_guard::SessionGuard;
pub use user::{Credentials, InMemoryUserProvider, User, UserProvider};

/// Authentication error.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("auth guard `{0}` is not defined")]
    UndefinedGuard(String),

    #[error("auth driver `{0}` is not supported")]
    UnsupportedDriver(String),

    #[error("user provider `{0}` is not defined")]
    UndefinedProvider(String),

    #[error("user provider driver `{0}` is not supported")]
    UnsupportedProviderDriver(String),

    #[error("cookie jar has not been set")]
    CookieJarNotSet,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// An authentication strategy bound to one request.
pub trait Guard: Send + Sync {
    fn name(&self) -> &str;

    /// The authenticated user, resolved lazily.
    fn user(&self) -> Option<User>;

    fn check(&self) -> bool {
        self.user().is_some()
    }

    fn guest(&self) -> bool {
        !self.check()
    }

    fn id(&self) -> Option<u64> {
        self.user().map(|user| user.id)
    }

    /// Check credentials without logging in.
    fn validate(&self, credentials: &Credentials) -> bool;

    /// Log in if the credentials are valid.
    fn attempt(&self, credentials: &Credentials, remember: bool) -> Result<bool, AuthError>;

    fn login(&self, user: User, remember: bool) -> Result<(), AuthError>;

    fn logout(&self) -> Result<(), AuthError>;

    fn as_cookie_aware(&self) -> Option<&dyn CookieAware> {
        None
    }

    fn as_dispatcher_aware(&self) -> Option<&dyn DispatcherAware> {
        None
    }

    fn as_request_aware(&self) -> Option<&dyn RequestAware> {
        None
    }
}

/// Guard that can queue cookies.
pub trait CookieAware {
    fn set_cookie_jar(&self, jar: Arc<CookieJar>);
}

/// Guard that fires events.
pub trait DispatcherAware {
    fn set_dispatcher(&self, events: Arc<Dispatcher>);
}

/// Guard that reads the current request.
pub trait RequestAware {
    fn set_request(&self, request: Accessor<KernelRequest>);
}

/// Builds a guard for a driver: `(app, guard name, guard config)`.
pub type GuardCreator =
    Arc<dyn Fn(&Application, &str, &GuardConfig) -> Result<Arc<dyn Guard>, AuthError> + Send + Sync>;

/// Resolves guards and user providers by name.
pub struct AuthManager {
    config: AuthConfig,
    creators: Mutex<HashMap<String, GuardCreator>>,
    guards: Mutex<HashMap<String, Arc<dyn Guard>>>,
    providers: Mutex<HashMap<String, Arc<dyn UserProvider>>>,
}

impl AuthManager {
    pub fn new(config: AuthConfig) -> Self {
        Self {
            config,
            creators: Mutex::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn default_guard(&self) -> &str {
        &self.config.default_guard
    }

    /// Install a creator for `driver`, replacing any earlier one.
    pub fn extend<F>(&self, driver: &str, creator: F)
    where
        F: Fn(&Application, &str, &GuardConfig) -> Result<Arc<dyn Guard>, AuthError>
            + Send
            + Sync
            + 'static,
    {
        lock(&self.creators).insert(driver.to_string(), Arc::new(creator));
    }

    pub fn has_creator(&self, driver: &str) -> bool {
        lock(&self.creators).contains_key(driver)
    }

    /// The guard named `name`, or the default guard.
    pub fn guard(&self, app: &Application, name: Option<&str>) -> Result<Arc<dyn Guard>, AuthError> {
        let name = name.unwrap_or(&self.config.default_guard);
        if let Some(guard) = lock(&self.guards).get(name) {
            return Ok(Arc::clone(guard));
        }

        let guard = self.resolve(app, name)?;
        lock(&self.guards).insert(name.to_string(), Arc::clone(&guard));
        Ok(guard)
    }

    fn resolve(&self, app: &Application, name: &str) -> Result<Arc<dyn Guard>, AuthError> {
        let config = self
            .config
            .guards
            .get(name)
            .ok_or_else(|| AuthError::UndefinedGuard(name.to_string()))?;

        let creator = lock(&self.creators).get(&config.driver).cloned();
        if let Some(creator) = creator {
            return creator(app, name, config);
        }

        match config.driver.as_str() {
            "session" => {
                let provider = self.create_user_provider(&config.provider)?;
                let session = app.make_as::<Store>("session.store")?;
                Ok(Arc::new(SessionGuard::new(name, provider, session)))
            }
            other => Err(AuthError::UnsupportedDriver(other.to_string())),
        }
    }

    /// The user provider named `name`, built once and then shared.
    pub fn create_user_provider(&self, name: &str) -> Result<Arc<dyn UserProvider>, AuthError> {
        let mut providers = lock(&self.providers);
        if let Some(provider) = providers.get(name) {
            return Ok(Arc::clone(provider));
        }

        let config = self
            .config
            .providers
            .get(name)
            .ok_or_else(|| AuthError::UndefinedProvider(name.to_string()))?;
        let provider: Arc<dyn UserProvider> = match config.driver.as_str() {
            "memory" => Arc::new(InMemoryUserProvider::new(config.users.clone())),
            other => return Err(AuthError::UnsupportedProviderDriver(other.to_string())),
        };
        providers.insert(name.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Drop every cached guard.
    pub fn forget_guards(&self) {
        lock(&self.guards).clear();
    }

    pub fn has_resolved_guards(&self) -> bool {
        !lock(&self.guards).is_empty()
    }
}

/// Binds `auth` and forgets its guards whenever a new request is bound.
pub struct AuthServiceProvider {
    config: AuthConfig,
}

impl AuthServiceProvider {
    pub const NAME: &'static str = "auth";

    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }
}

impl ServiceProvider for AuthServiceProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn register(&self, app: &Application) -> Result<(), ContainerError> {
        let config = self.config.clone();
        app.singleton("auth", move |_| Ok(Arc::new(AuthManager::new(config.clone()))));
        app.rebinding("request", |_, app| {
            if app.resolved("auth") {
                app.make_as::<AuthManager>("auth")?.forget_guards();
            }
            Ok(())
        });
        Ok(())
    }
}
