//! Sessions.
//!
//! # Data Flow
//! ```text
//! request cookie (session id)
//!     → StartSession (middleware)
//!     → session.store (Store, built by SessionManager::driver)
//!     → SessionHandler::read → attributes
//!     → [route handler reads/writes attributes]
//!     → SessionHandler::write
//!     → session cookie queued on the cookie jar
//! ```
//!
//! The manager, its store and the middleware are rebuilt after every
//! request. Only the handler's backing data (the redis keyspace) persists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{Map, Value};

use crate::config::SessionConfig;
use crate::container::{lock, Application, ContainerError, ServiceProvider};
use crate::http::{KernelRequest, KernelResponse};
use crate::kernel::KernelError;
use crate::services::cookie::{request_cookie, CookieJar};
use crate::services::redis::{RedisConnection, RedisManager};

const ID_LENGTH: usize = 40;

/// Session error.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session driver `{0}` is not supported")]
    UnsupportedDriver(String),

    #[error("session payload could not be serialized: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error(transparent)]
    Container(#[from] ContainerError),
}

/// Generate a random session identifier.
pub fn generate_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LENGTH)
        .map(char::from)
        .collect()
}

fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Storage backend for serialized sessions.
pub trait SessionHandler: Send + Sync {
    fn read(&self, id: &str) -> Option<String>;
    fn write(&self, id: &str, payload: String);
    fn destroy(&self, id: &str);
}

/// Sessions kept in memory for the lifetime of the handler.
#[derive(Default)]
pub struct ArrayHandler {
    sessions: Mutex<HashMap<String, String>>,
}

impl SessionHandler for ArrayHandler {
    fn read(&self, id: &str) -> Option<String> {
        lock(&self.sessions).get(id).cloned()
    }

    fn write(&self, id: &str, payload: String) {
        lock(&self.sessions).insert(id.to_string(), payload);
    }

    fn destroy(&self, id: &str) {
        lock(&self.sessions).remove(id);
    }
}

/// Sessions stored under `<prefix><id>` on a redis connection.
pub struct RedisHandler {
    connection: Arc<RedisConnection>,
    prefix: String,
}

impl RedisHandler {
    pub fn new(connection: Arc<RedisConnection>, prefix: &str) -> Self {
        Self {
            connection,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, id: &str) -> String {
        format!("{}{}", self.prefix, id)
    }
}

impl SessionHandler for RedisHandler {
    fn read(&self, id: &str) -> Option<String> {
        self.connection.get(&self.key(id))
    }

    fn write(&self, id: &str, payload: String) {
        self.connection.set(&self.key(id), payload);
    }

    fn destroy(&self, id: &str) {
        self.connection.del(&self.key(id));
    }
}

const FLASH_NEW: &str = "_flash.new";
const FLASH_OLD: &str = "_flash.old";

fn flash_keys(attributes: &Map<String, Value>, list: &str) -> Vec<String> {
    match attributes.get(list) {
        Some(Value::Array(keys)) => keys
            .iter()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// One client's session.
pub struct Store {
    name: String,
    handler: Arc<dyn SessionHandler>,
    id: Mutex<String>,
    attributes: Mutex<Map<String, Value>>,
    started: AtomicBool,
}

impl Store {
    pub fn new(name: &str, handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            name: name.to_string(),
            handler,
            id: Mutex::new(generate_id()),
            attributes: Mutex::new(Map::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Cookie name carrying the session id.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> String {
        lock(&self.id).clone()
    }

    /// Adopt `id` if it is well formed, otherwise keep a fresh random id.
    pub fn set_id(&self, id: &str) {
        *lock(&self.id) = if is_valid_id(id) {
            id.to_string()
        } else {
            generate_id()
        };
    }

    /// Load attributes from the handler.
    pub fn start(&self) {
        let id = self.id();
        if let Some(payload) = self.handler.read(&id) {
            match serde_json::from_str::<Map<String, Value>>(&payload) {
                Ok(data) => lock(&self.attributes).extend(data),
                Err(err) => tracing::warn!(error = %err, "Discarding unreadable session payload"),
            }
        }
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        lock(&self.attributes).get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        lock(&self.attributes).contains_key(key)
    }

    pub fn put(&self, key: &str, value: impl Into<Value>) {
        lock(&self.attributes).insert(key.to_string(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        lock(&self.attributes).remove(key)
    }

    pub fn all(&self) -> Map<String, Value> {
        lock(&self.attributes).clone()
    }

    pub fn flush(&self) {
        lock(&self.attributes).clear();
    }

    /// Put `key` for this request and the next one only.
    pub fn flash(&self, key: &str, value: impl Into<Value>) {
        let mut attributes = lock(&self.attributes);
        attributes.insert(key.to_string(), value.into());

        let mut new = flash_keys(&attributes, FLASH_NEW);
        if !new.iter().any(|k| k == key) {
            new.push(key.to_string());
        }
        let old: Vec<String> = flash_keys(&attributes, FLASH_OLD)
            .into_iter()
            .filter(|k| k != key)
            .collect();
        attributes.insert(FLASH_NEW.to_string(), Value::from(new));
        attributes.insert(FLASH_OLD.to_string(), Value::from(old));
    }

    /// Forget values flashed before this request and age the fresh ones.
    pub fn age_flash_data(&self) {
        let mut attributes = lock(&self.attributes);
        for key in flash_keys(&attributes, FLASH_OLD) {
            attributes.remove(&key);
        }
        let new = flash_keys(&attributes, FLASH_NEW);
        if new.is_empty() {
            attributes.remove(FLASH_OLD);
            attributes.remove(FLASH_NEW);
        } else {
            attributes.insert(FLASH_OLD.to_string(), Value::from(new));
            attributes.insert(FLASH_NEW.to_string(), Value::Array(Vec::new()));
        }
    }

    /// Move the session to a new id, optionally destroying the old record.
    pub fn migrate(&self, destroy: bool) {
        let mut id = lock(&self.id);
        if destroy {
            self.handler.destroy(&id);
        }
        *id = generate_id();
    }

    /// Drop all attributes and move to a new id.
    pub fn invalidate(&self) {
        self.flush();
        self.migrate(true);
    }

    /// Persist attributes through the handler, aging flash data first.
    pub fn save(&self) -> Result<(), SessionError> {
        self.age_flash_data();
        let payload = serde_json::to_string(&*lock(&self.attributes))?;
        self.handler.write(&self.id(), payload);
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Builds the session store for the configured driver.
pub struct SessionManager {
    config: SessionConfig,
    handler: Arc<dyn SessionHandler>,
    store: Mutex<Option<Arc<Store>>>,
}

impl SessionManager {
    pub fn new(app: &Application, config: SessionConfig) -> Result<Self, SessionError> {
        let handler: Arc<dyn SessionHandler> = match config.driver.as_str() {
            "array" => Arc::new(ArrayHandler::default()),
            "redis" => {
                let redis = app.make_as::<RedisManager>("redis")?;
                Arc::new(RedisHandler::new(
                    redis.connection(config.connection.as_deref()),
                    &config.prefix,
                ))
            }
            other => return Err(SessionError::UnsupportedDriver(other.to_string())),
        };

        Ok(Self {
            config,
            handler,
            store: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The store of this manager, created on first use.
    pub fn driver(&self) -> Arc<Store> {
        let mut store = lock(&self.store);
        let store = store
            .get_or_insert_with(|| Arc::new(Store::new(&self.config.cookie, Arc::clone(&self.handler))));
        Arc::clone(store)
    }
}

/// Middleware that loads the session before the route and saves it after.
pub struct StartSession {
    manager: Arc<SessionManager>,
}

impl StartSession {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    pub fn handle<F>(
        &self,
        app: &Application,
        request: &KernelRequest,
        next: F,
    ) -> Result<KernelResponse, KernelError>
    where
        F: FnOnce(&KernelRequest) -> Result<KernelResponse, KernelError>,
    {
        let session = app.make_as::<Store>("session.store")?;
        if let Some(id) = request_cookie(request, session.name()) {
            session.set_id(&id);
        }
        session.start();

        let response = next(request)?;

        // The handler may have swapped the store (login migrates the id).
        let session = app.make_as::<Store>("session.store")?;
        session.save()?;

        let jar = app.make_as::<CookieJar>("cookie")?;
        let lifetime = i64::try_from(self.manager.config().lifetime_minutes).unwrap_or(i64::MAX);
        jar.queue(jar.make(session.name(), &session.id(), lifetime));
        Ok(response)
    }
}

/// Binds `session`, `session.store` and `session.middleware`.
pub struct SessionServiceProvider {
    config: SessionConfig,
}

impl SessionServiceProvider {
    pub const NAME: &'static str = "session";

    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }
}

impl ServiceProvider for SessionServiceProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn register(&self, app: &Application) -> Result<(), ContainerError> {
        let config = self.config.clone();
        app.singleton("session", move |app| {
            SessionManager::new(app, config.clone())
                .map(Arc::new)
                .map_err(|e| ContainerError::build("session", e))
        });
        app.singleton("session.store", |app| {
            Ok(app.make_as::<SessionManager>("session")?.driver())
        });
        app.singleton("session.middleware", |app| {
            Ok(Arc::new(StartSession::new(app.make_as::<SessionManager>("session")?)))
        });
        Ok(())
    }
}
