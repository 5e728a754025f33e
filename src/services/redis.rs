//! In-process redis stand-in.
//!
//! `RedisServer` is the keyspace and outlives every provider reset, the way
//! an external server would. `RedisManager` and its connections are what the
//! provider binds, and they carry per-connection state (the selected
//! database, a command counter) that must not leak between requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::RedisConfig;
use crate::container::{lock, Application, ContainerError, ServiceProvider};

/// Shared keyspace, one map per database.
#[derive(Default)]
pub struct RedisServer {
    databases: Mutex<HashMap<u8, HashMap<String, String>>>,
}

impl RedisServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn get(&self, db: u8, key: &str) -> Option<String> {
        lock(&self.databases).get(&db).and_then(|d| d.get(key).cloned())
    }

    fn set(&self, db: u8, key: &str, value: String) {
        lock(&self.databases)
            .entry(db)
            .or_default()
            .insert(key.to_string(), value);
    }

    fn del(&self, db: u8, key: &str) -> bool {
        lock(&self.databases)
            .get_mut(&db)
            .map(|d| d.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Number of keys in `db`.
    pub fn dbsize(&self, db: u8) -> usize {
        lock(&self.databases).get(&db).map(HashMap::len).unwrap_or(0)
    }
}

/// A named connection to the server.
pub struct RedisConnection {
    name: String,
    server: Arc<RedisServer>,
    database: AtomicU8,
    commands: AtomicU64,
}

impl RedisConnection {
    fn new(name: &str, server: Arc<RedisServer>, database: u8) -> Self {
        Self {
            name: name.to_string(),
            server,
            database: AtomicU8::new(database),
            commands: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn db(&self) -> u8 {
        self.commands.fetch_add(1, Ordering::Relaxed);
        self.database.load(Ordering::SeqCst)
    }

    /// Switch the database used by subsequent commands on this connection.
    pub fn select(&self, database: u8) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        self.database.store(database, Ordering::SeqCst);
    }

    pub fn database(&self) -> u8 {
        self.database.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let db = self.db();
        self.server.get(db, key)
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        let db = self.db();
        self.server.set(db, key, value.into());
    }

    pub fn del(&self, key: &str) -> bool {
        let db = self.db();
        self.server.del(db, key)
    }

    /// Commands issued over this connection.
    pub fn commands_issued(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }
}

/// Hands out cached named connections.
pub struct RedisManager {
    server: Arc<RedisServer>,
    config: RedisConfig,
    connections: Mutex<HashMap<String, Arc<RedisConnection>>>,
}

impl RedisManager {
    pub fn new(server: Arc<RedisServer>, config: RedisConfig) -> Self {
        Self {
            server,
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Get (or open) a connection; `None` means the default connection.
    pub fn connection(&self, name: Option<&str>) -> Arc<RedisConnection> {
        let name = name.unwrap_or("default");
        let mut connections = lock(&self.connections);
        let connection = connections.entry(name.to_string()).or_insert_with(|| {
            tracing::trace!(connection = name, "Opening redis connection");
            Arc::new(RedisConnection::new(
                name,
                Arc::clone(&self.server),
                self.config.default_database,
            ))
        });
        Arc::clone(connection)
    }

    /// Drop a cached connection.
    pub fn purge(&self, name: Option<&str>) {
        lock(&self.connections).remove(name.unwrap_or("default"));
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.connections).len()
    }
}

/// Binds `redis` (the manager) and `redis.connection` (the default connection).
pub struct RedisServiceProvider {
    server: Arc<RedisServer>,
    config: RedisConfig,
}

impl RedisServiceProvider {
    pub const NAME: &'static str = "redis";

    pub fn new(server: Arc<RedisServer>, config: RedisConfig) -> Self {
        Self { server, config }
    }
}

impl ServiceProvider for RedisServiceProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn register(&self, app: &Application) -> Result<(), ContainerError> {
        let server = Arc::clone(&self.server);
        let config = self.config.clone();
        app.singleton("redis", move |_| {
            Ok(Arc::new(RedisManager::new(Arc::clone(&server), config.clone())))
        });
        app.bind("redis.connection", |app| {
            Ok(app.make_as::<RedisManager>("redis")?.connection(None))
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connections_are_cached_and_share_the_keyspace() {
        let server = RedisServer::new();
        let manager = RedisManager::new(Arc::clone(&server), RedisConfig::default());

        let a = manager.connection(None);
        let b = manager.connection(Some("default"));
        assert!(Arc::ptr_eq(&a, &b));

        let other = manager.connection(Some("cache"));
        a.set("k", "v");
        assert_eq!(other.get("k").as_deref(), Some("v"));
        assert_eq!(manager.connection_count(), 2);
        assert_eq!(server.dbsize(0), 1);
    }

    #[test]
    fn select_is_per_connection() {
        let manager = RedisManager::new(RedisServer::new(), RedisConfig::default());
        let conn = manager.connection(None);
        conn.set("k", "zero");
        conn.select(3);
        assert_eq!(conn.get("k"), None);
        conn.set("k", "three");

        let fresh = RedisManager::new(Arc::clone(&manager.server), RedisConfig::default());
        assert_eq!(fresh.connection(None).get("k").as_deref(), Some("zero"));
    }

    #[test]
    fn purge_drops_connection_state() {
        let manager = RedisManager::new(RedisServer::new(), RedisConfig { default_database: 1 });
        manager.connection(None).select(5);
        manager.purge(None);
        assert_eq!(manager.connection(None).database(), 1);
        assert!(!manager.connection(None).del("missing"));
    }
}
