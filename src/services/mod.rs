//! Framework services held by the application context.
//!
//! # Lifetimes
//! ```text
//! events     Dispatcher        process lifetime
//! redirect   Redirector        process lifetime, session swapped per request
//! redis      RedisManager      reset after every request (connections)
//! cookie     CookieJar         reset after every request (queued cookies)
//! session    SessionManager    reset after every request (store, middleware)
//! ```
//!
//! Backing data that must outlive a reset (the redis keyspace) sits outside
//! the providers and is handed to them at construction.

pub mod cookie;
pub mod events;
pub mod redirect;
pub mod redis;
pub mod session;

pub use cookie::{Cookie, CookieJar, CookieServiceProvider};
pub use events::{Dispatcher, EventServiceProvider};
pub use redirect::{Redirector, RoutingServiceProvider};
pub use redis::{RedisConnection, RedisManager, RedisServer, RedisServiceProvider};
pub use session::{
    ArrayHandler, RedisHandler, SessionError, SessionHandler, SessionManager, SessionServiceProvider,
    StartSession, Store,
};
