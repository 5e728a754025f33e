//! Request-scoped session guards.
//!
//! The auth manager outlives every request, but a session guard must not:
//! it holds one request's session store, cookie jar and event dispatcher.
//! The adapter installs a `session` driver creator on every auth manager the
//! container builds, and wires the session store hooks that keep long-lived
//! services pointed at the current store.
//!
//! ```text
//! resolve `auth`          → auth.extend("session", creator)
//! auth.guard("web")       → creator(app, "web", config)
//!                              → user provider, current session.store
//!                              → cookie jar / dispatcher / request accessor
//! resolve `session.store` → session manager's driver
//!                         → redirector.set_session(store)
//! ```

use std::any::type_name;
use std::sync::Arc;

use crate::auth::{AuthError, AuthManager, Guard, SessionGuard, UserProvider};
use crate::config::GuardConfig;
use crate::container::{Application, ContainerError, Instance};
use crate::http::KernelRequest;
use crate::services::cookie::CookieJar;
use crate::services::events::Dispatcher;
use crate::services::redirect::Redirector;
use crate::services::session::{SessionManager, Store};

/// Builds the bare guard: `(guard name, user provider, session store)`.
pub type GuardConstructor =
    Arc<dyn Fn(&str, Arc<dyn UserProvider>, Arc<Store>) -> Arc<dyn Guard> + Send + Sync>;

fn downcast<T: std::any::Any + Send + Sync>(instance: &Instance, name: &str) -> Result<Arc<T>, ContainerError> {
    Arc::clone(instance)
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
        })
}

pub struct SessionGuardAdapter {
    constructor: GuardConstructor,
}

impl SessionGuardAdapter {
    /// Adapter building [`SessionGuard`]s.
    pub fn new() -> Self {
        Self::with_constructor(|name, provider, session| {
            Arc::new(SessionGuard::new(name, provider, session))
        })
    }

    pub fn with_constructor<F>(constructor: F) -> Self
    where
        F: Fn(&str, Arc<dyn UserProvider>, Arc<Store>) -> Arc<dyn Guard> + Send + Sync + 'static,
    {
        Self {
            constructor: Arc::new(constructor),
        }
    }

    /// Build a guard for one request and attach what it supports.
    pub fn create_guard(
        &self,
        app: &Application,
        name: &str,
        config: &GuardConfig,
    ) -> Result<Arc<dyn Guard>, AuthError> {
        let provider = app
            .make_as::<AuthManager>("auth")?
            .create_user_provider(&config.provider)?;
        let session = app.make_as::<Store>("session.store")?;
        let guard = (self.constructor)(name, provider, session);

        if let Some(aware) = guard.as_cookie_aware() {
            aware.set_cookie_jar(app.make_as::<CookieJar>("cookie")?);
        }
        if let Some(aware) = guard.as_dispatcher_aware() {
            aware.set_dispatcher(app.make_as::<Dispatcher>("events")?);
        }
        if let Some(aware) = guard.as_request_aware() {
            aware.set_request(app.accessor::<KernelRequest>("request"));
        }

        tracing::trace!(guard = name, "Session guard created");
        Ok(guard)
    }

    /// Install the auth and session store hooks.
    pub fn install(self, app: &Application) -> Result<(), ContainerError> {
        let adapter = Arc::new(self);

        let hook = Arc::clone(&adapter);
        app.after_resolving("auth", move |instance, _| {
            let auth = downcast::<AuthManager>(instance, "auth")?;
            hook.extend(&auth);
            Ok(())
        });
        if app.resolved("auth") {
            let auth = app.make_as::<AuthManager>("auth")?;
            adapter.extend(&auth);
        }

        app.extend("session.store", |_, app| {
            let store: Instance = app.make_as::<SessionManager>("session")?.driver();
            Ok(store)
        })?;
        app.after_resolving("session.store", |instance, app| {
            if app.bound("redirect") {
                let store = downcast::<Store>(instance, "session.store")?;
                app.make_as::<Redirector>("redirect")?.set_session(store);
            }
            Ok(())
        });

        Ok(())
    }

    fn extend(self: &Arc<Self>, auth: &AuthManager) {
        let adapter = Arc::clone(self);
        auth.extend("session", move |app, name, config| {
            adapter.create_guard(app, name, config)
        });
    }
}

impl Default for SessionGuardAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthServiceProvider, Credentials};
    use crate::config::{AuthConfig, CookieConfig, SessionConfig, UserRecord};
    use crate::services::cookie::CookieServiceProvider;
    use crate::services::events::EventServiceProvider;
    use crate::services::redirect::RoutingServiceProvider;
    use crate::services::session::SessionServiceProvider;
    use hyper::body::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn app() -> Arc<Application> {
        let app = Application::new();
        app.register(Arc::new(EventServiceProvider), false).unwrap();
        app.register(Arc::new(CookieServiceProvider::new(CookieConfig::default())), false)
            .unwrap();
        let session = SessionConfig {
            driver: "array".into(),
            ..SessionConfig::default()
        };
        app.register(Arc::new(SessionServiceProvider::new(session)), false)
            .unwrap();
        app.register(Arc::new(RoutingServiceProvider), false).unwrap();

        let mut auth = AuthConfig::default();
        auth.providers.get_mut("users").unwrap().users.push(UserRecord {
            id: 1,
            username: "ada".into(),
            password: "secret".into(),
        });
        app.register(Arc::new(AuthServiceProvider::new(auth)), false)
            .unwrap();
        app
    }

    #[test]
    fn every_auth_manager_gets_the_creator() {
        let app = app();
        SessionGuardAdapter::new().install(&app).unwrap();

        let auth = app.make_as::<AuthManager>("auth").unwrap();
        assert!(auth.has_creator("session"));

        // A fresh manager after rebinding is extended as well.
        app.register(Arc::new(AuthServiceProvider::new(AuthConfig::default())), true)
            .unwrap();
        let rebuilt = app.make_as::<AuthManager>("auth").unwrap();
        assert!(!Arc::ptr_eq(&auth, &rebuilt));
        assert!(rebuilt.has_creator("session"));
    }

    #[test]
    fn an_already_resolved_manager_is_extended_on_install() {
        let app = app();
        let auth = app.make_as::<AuthManager>("auth").unwrap();
        SessionGuardAdapter::new().install(&app).unwrap();
        assert!(auth.has_creator("session"));
    }

    #[test]
    fn guards_get_jar_dispatcher_and_request() {
        let app = app();
        SessionGuardAdapter::new().install(&app).unwrap();
        app.instance("request", Arc::new(KernelRequest::new(Bytes::new())))
            .unwrap();

        let logins = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&logins);
        app.make_as::<Dispatcher>("events")
            .unwrap()
            .listen("auth.login", move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let auth = app.make_as::<AuthManager>("auth").unwrap();
        let guard = auth.guard(&app, None).unwrap();
        assert!(guard.attempt(&Credentials::new("ada", "secret"), true).unwrap());
        assert_eq!(logins.load(Ordering::SeqCst), 1);

        let jar = app.make_as::<CookieJar>("cookie").unwrap();
        assert!(jar.has_queued("remember_web"));
    }

    #[test]
    fn the_constructor_is_pluggable() {
        let app = app();
        let built = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&built);
        SessionGuardAdapter::with_constructor(move |name, provider, session| {
            counter.fetch_add(1, Ordering::SeqCst);
            Arc::new(SessionGuard::new(name, provider, session))
        })
        .install(&app)
        .unwrap();

        let auth = app.make_as::<AuthManager>("auth").unwrap();
        auth.guard(&app, None).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolving_the_store_updates_the_redirector() {
        let app = app();
        SessionGuardAdapter::new().install(&app).unwrap();

        let store = app.make_as::<Store>("session.store").unwrap();
        let redirector = app.make_as::<Redirector>("redirect").unwrap();
        assert!(Arc::ptr_eq(&redirector.session().unwrap(), &store));

        app.register(
            Arc::new(SessionServiceProvider::new(SessionConfig {
                driver: "array".into(),
                ..SessionConfig::default()
            })),
            true,
        )
        .unwrap();
        let fresh = app.make_as::<Store>("session.store").unwrap();
        assert!(!Arc::ptr_eq(&fresh, &store));
        assert!(Arc::ptr_eq(&redirector.session().unwrap(), &fresh));
    }
}
