//! Route table.
//!
//! # Design Decisions
//! - Exact `(method, path)` lookup; the query string is ignored
//! - Built before the worker starts, immutable afterwards
//! - Explicit `NotFound` / `MethodNotAllowed` rather than a silent default

use std::collections::HashMap;
use std::sync::Arc;

use hyper::Method;

use crate::container::Application;
use crate::http::{KernelRequest, KernelResponse};
use crate::kernel::KernelError;

/// Route handler.
pub type Handler =
    Arc<dyn Fn(&Application, &KernelRequest) -> Result<KernelResponse, KernelError> + Send + Sync>;

/// Result of a route lookup.
pub enum RouteMatch {
    Found(Handler),
    /// The path exists under other methods.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<String, Vec<(Method, Handler)>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<F>(mut self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(&Application, &KernelRequest) -> Result<KernelResponse, KernelError>
            + Send
            + Sync
            + 'static,
    {
        let routes = self.routes.entry(path.to_string()).or_default();
        routes.retain(|(m, _)| *m != method);
        routes.push((method, Arc::new(handler)));
        self
    }

    pub fn get<F>(self, path: &str, handler: F) -> Self
    where
        F: Fn(&Application, &KernelRequest) -> Result<KernelResponse, KernelError>
            + Send
            + Sync
            + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    pub fn post<F>(self, path: &str, handler: F) -> Self
    where
        F: Fn(&Application, &KernelRequest) -> Result<KernelResponse, KernelError>
            + Send
            + Sync
            + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    pub fn find(&self, method: &Method, path: &str) -> RouteMatch {
        let Some(routes) = self.routes.get(path) else {
            return RouteMatch::NotFound;
        };
        match routes.iter().find(|(m, _)| m == method) {
            Some((_, handler)) => RouteMatch::Found(Arc::clone(handler)),
            None => RouteMatch::MethodNotAllowed(routes.iter().map(|(m, _)| m.clone()).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
