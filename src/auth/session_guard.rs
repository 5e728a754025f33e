//! Session-backed guard.
//!
//! # Responsibilities
//! - Keep the logged-in user id under `login_<guard>` in the session store
//! - Restore a user from the `remember_<guard>` cookie (`<id>|<token>`)
//! - Queue and forget the remember-me cookie on the cookie jar
//! - Fire `auth.*` events on the dispatcher
//!
//! A guard is bound to one request's store, jar and dispatcher and is never
//! reused after that request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};

use crate::auth::user::{Credentials, User, UserProvider};
use crate::auth::{AuthError, CookieAware, DispatcherAware, Guard, RequestAware};
use crate::container::{lock, Accessor};
use crate::http::KernelRequest;
use crate::services::cookie::{request_cookie, CookieJar};
use crate::services::events::Dispatcher;
use crate::services::session::Store;

const TOKEN_LENGTH: usize = 60;

fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

pub struct SessionGuard {
    name: String,
    provider: Arc<dyn UserProvider>,
    session: Arc<Store>,
    user: Mutex<Option<User>>,
    logged_out: AtomicBool,
    via_remember: AtomicBool,
    cookies: Mutex<Option<Arc<CookieJar>>>,
    events: Mutex<Option<Arc<Dispatcher>>>,
    request: Mutex<Option<Accessor<KernelRequest>>>,
}

impl SessionGuard {
    pub fn new(name: &str, provider: Arc<dyn UserProvider>, session: Arc<Store>) -> Self {
        Self {
            name: name.to_string(),
            provider,
            session,
            user: Mutex::new(None),
            logged_out: AtomicBool::new(false),
            via_remember: AtomicBool::new(false),
            cookies: Mutex::new(None),
            events: Mutex::new(None),
            request: Mutex::new(None),
        }
    }

    /// Session key holding the user id.
    pub fn session_key(&self) -> String {
        format!("login_{}", self.name)
    }

    /// Name of the remember-me cookie.
    pub fn recaller_name(&self) -> String {
        format!("remember_{}", self.name)
    }

    pub fn session(&self) -> &Arc<Store> {
        &self.session
    }

    /// Whether the current user came from the remember-me cookie.
    pub fn via_remember(&self) -> bool {
        self.via_remember.load(Ordering::SeqCst)
    }

    pub fn cookie_jar(&self) -> Option<Arc<CookieJar>> {
        lock(&self.cookies).clone()
    }

    pub fn dispatcher(&self) -> Option<Arc<Dispatcher>> {
        lock(&self.events).clone()
    }

    pub fn request(&self) -> Option<Arc<KernelRequest>> {
        lock(&self.request).as_ref()?.get()
    }

    fn fire(&self, event: &str, payload: Value) {
        if let Some(events) = self.dispatcher() {
            events.dispatch(event, &payload);
        }
    }

    /// Parsed remember-me cookie from the current request.
    fn recaller(&self) -> Option<(u64, String)> {
        let request = self.request()?;
        let value = request_cookie(&request, &self.recaller_name())?;
        let (id, token) = value.split_once('|')?;
        let id = id.parse().ok()?;
        (!token.is_empty()).then(|| (id, token.to_string()))
    }

    fn update_session(&self, id: u64) {
        self.session.put(&self.session_key(), id);
        self.session.migrate(true);
    }

    fn ensure_remember_token(&self, mut user: User) -> User {
        if user.remember_token.is_none() {
            let token = generate_token();
            self.provider.update_remember_token(&user, &token);
            user.remember_token = Some(token);
        }
        user
    }

    fn queue_recaller_cookie(&self, user: &User) -> Result<(), AuthError> {
        let jar = self.cookie_jar().ok_or(AuthError::CookieJarNotSet)?;
        let token = user.remember_token.as_deref().unwrap_or_default();
        jar.queue(jar.forever(&self.recaller_name(), &format!("{}|{}", user.id, token)));
        Ok(())
    }

    fn set_user(&self, user: Option<User>) {
        *lock(&self.user) = user;
        self.logged_out.store(false, Ordering::SeqCst);
    }
}

impl Guard for SessionGuard {
    fn name(&self) -> &str {
        &self.name
    }

    fn user(&self) -> Option<User> {
        if self.logged_out.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(user) = lock(&self.user).clone() {
            return Some(user);
        }

        let mut user = self
            .session
            .get(&self.session_key())
            .and_then(|id| id.as_u64())
            .and_then(|id| self.provider.retrieve_by_id(id));
        if let Some(found) = &user {
            self.fire("auth.authenticated", json!({ "guard": self.name, "user": found }));
        }

        if user.is_none() {
            if let Some((id, token)) = self.recaller() {
                user = self.provider.retrieve_by_token(id, &token);
                if let Some(found) = &user {
                    self.update_session(found.id);
                    self.via_remember.store(true, Ordering::SeqCst);
                    self.fire(
                        "auth.login",
                        json!({ "guard": self.name, "user": found, "remember": true }),
                    );
                }
            }
        }

        *lock(&self.user) = user.clone();
        user
    }

    fn validate(&self, credentials: &Credentials) -> bool {
        self.provider
            .retrieve_by_credentials(credentials)
            .is_some_and(|user| self.provider.validate_credentials(&user, credentials))
    }

    fn attempt(&self, credentials: &Credentials, remember: bool) -> Result<bool, AuthError> {
        self.fire(
            "auth.attempting",
            json!({ "guard": self.name, "username": credentials.username, "remember": remember }),
        );

        let user = self.provider.retrieve_by_credentials(credentials);
        match user {
            Some(user) if self.provider.validate_credentials(&user, credentials) => {
                self.login(user, remember)?;
                Ok(true)
            }
            _ => {
                self.fire(
                    "auth.failed",
                    json!({ "guard": self.name, "username": credentials.username }),
                );
                Ok(false)
            }
        }
    }

    fn login(&self, user: User, remember: bool) -> Result<(), AuthError> {
        self.update_session(user.id);

        let user = if remember {
            let user = self.ensure_remember_token(user);
            self.queue_recaller_cookie(&user)?;
            user
        } else {
            user
        };

        self.fire(
            "auth.login",
            json!({ "guard": self.name, "user": user, "remember": remember }),
        );
        self.set_user(Some(user));
        Ok(())
    }

    fn logout(&self) -> Result<(), AuthError> {
        let user = self.user();

        self.session.remove(&self.session_key());
        if self.recaller().is_some() {
            let jar = self.cookie_jar().ok_or(AuthError::CookieJarNotSet)?;
            jar.queue(jar.forget(&self.recaller_name()));
        }
        if let Some(user) = &user {
            if user.remember_token.is_some() {
                self.provider.update_remember_token(user, &generate_token());
            }
        }

        self.fire("auth.logout", json!({ "guard": self.name, "user": user }));
        *lock(&self.user) = None;
        self.logged_out.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn as_cookie_aware(&self) -> Option<&dyn CookieAware> {
        Some(self)
    }

    fn as_dispatcher_aware(&self) -> Option<&dyn DispatcherAware> {
        Some(self)
    }

    fn as_request_aware(&self) -> Option<&dyn RequestAware> {
        Some(self)
    }
}

impl CookieAware for SessionGuard {
    fn set_cookie_jar(&self, jar: Arc<CookieJar>) {
        *lock(&self.cookies) = Some(jar);
    }
}

impl DispatcherAware for SessionGuard {
    fn set_dispatcher(&self, events: Arc<Dispatcher>) {
        *lock(&self.events) = Some(events);
    }
}

impl RequestAware for SessionGuard {
    fn set_request(&self, request: Accessor<KernelRequest>) {
        *lock(&self.request) = Some(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user::InMemoryUserProvider;
    use crate::config::{CookieConfig, UserRecord};
    use crate::container::Application;
    use crate::http::RequestCookies;
    use crate::services::session::ArrayHandler;
    use hyper::body::Bytes;
    use std::collections::BTreeMap;

    fn provider() -> Arc<dyn UserProvider> {
        Arc::new(InMemoryUserProvider::new(vec![UserRecord {
            id: 1,
            username: "ada".into(),
            password: "secret".into(),
        }]))
    }

    fn guard(provider: Arc<dyn UserProvider>) -> SessionGuard {
        let store = Arc::new(Store::new("s", Arc::new(ArrayHandler::default())));
        SessionGuard::new("web", provider, store)
    }

    #[test]
    fn attempt_logs_in_with_valid_credentials() {
        let guard = guard(provider());
        assert!(guard.guest());
        assert!(!guard.attempt(&Credentials::new("ada", "nope"), false).unwrap());
        assert!(guard.attempt(&Credentials::new("ada", "secret"), false).unwrap());
        assert_eq!(guard.id(), Some(1));
        assert_eq!(guard.session().get("login_web"), Some(Value::from(1)));
    }

    #[test]
    fn login_migrates_the_session_id() {
        let guard = guard(provider());
        let before = guard.session().id();
        guard.attempt(&Credentials::new("ada", "secret"), false).unwrap();
        assert_ne!(guard.session().id(), before);
    }

    #[test]
    fn remember_requires_a_cookie_jar() {
        let guard = guard(provider());
        let err = guard.attempt(&Credentials::new("ada", "secret"), true).unwrap_err();
        assert!(matches!(err, AuthError::CookieJarNotSet));
    }

    #[test]
    fn remember_queues_the_recaller_cookie() {
        let guard = guard(provider());
        let jar = Arc::new(CookieJar::new(CookieConfig::default()));
        guard.set_cookie_jar(Arc::clone(&jar));

        guard.attempt(&Credentials::new("ada", "secret"), true).unwrap();
        let cookie = jar.queued("remember_web").unwrap();
        assert!(cookie.value.starts_with("1|"));
    }

    #[test]
    fn recaller_cookie_restores_the_user() {
        let provider = provider();
        let user = provider.retrieve_by_id(1).unwrap();
        provider.update_remember_token(&user, "token");

        let app = Application::new();
        let mut request = KernelRequest::new(Bytes::new());
        let mut cookies = BTreeMap::new();
        cookies.insert("remember_web".to_string(), "1|token".to_string());
        request.extensions_mut().insert(RequestCookies(cookies));
        app.instance("request", Arc::new(request)).unwrap();

        let guard = guard(provider);
        guard.set_request(app.accessor("request"));
        assert_eq!(guard.id(), Some(1));
        assert!(guard.via_remember());
    }

    #[test]
    fn logout_clears_the_user_and_fires_an_event() {
        let guard = guard(provider());
        let events = Arc::new(Dispatcher::new());
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        events.listen("auth.logout", move |_: &str, payload: &Value| {
            lock(&sink).push(payload["user"]["id"].clone());
        });
        guard.set_dispatcher(events);

        guard.attempt(&Credentials::new("ada", "secret"), false).unwrap();
        guard.logout().unwrap();
        assert!(guard.guest());
        assert!(!guard.session().has("login_web"));
        assert_eq!(*lock(&fired), vec![Value::from(1)]);
    }
}
