//! Event dispatcher.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::container::{lock, Application, ContainerError, ServiceProvider};

/// Event listener.
pub type Listener = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Synchronous named-event dispatcher.
#[derive(Default)]
pub struct Dispatcher {
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `event`.
    pub fn listen<F>(&self, event: &str, listener: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        lock(&self.listeners)
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(listener));
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        lock(&self.listeners)
            .get(event)
            .map(|l| !l.is_empty())
            .unwrap_or(false)
    }

    /// Call every listener of `event` in registration order.
    pub fn dispatch(&self, event: &str, payload: &Value) {
        let listeners = lock(&self.listeners).get(event).cloned().unwrap_or_default();
        tracing::trace!(event, listeners = listeners.len(), "Dispatching event");
        for listener in listeners {
            listener(event, payload);
        }
    }
}

/// Binds the `events` dispatcher.
pub struct EventServiceProvider;

impl EventServiceProvider {
    pub const NAME: &'static str = "events";
}

impl ServiceProvider for EventServiceProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn register(&self, app: &Application) -> Result<(), ContainerError> {
        app.singleton("events", |_| Ok(Arc::new(Dispatcher::new())));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn listeners_receive_payloads_in_order() {
        let dispatcher = Dispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            dispatcher.listen("auth.login", move |_, payload| {
                seen.lock().unwrap().push(format!("{}:{}", tag, payload["id"]));
            });
        }

        dispatcher.dispatch("auth.login", &json!({"id": 7}));
        dispatcher.dispatch("auth.logout", &json!({"id": 7}));

        assert!(dispatcher.has_listeners("auth.login"));
        assert!(!dispatcher.has_listeners("auth.logout"));
        assert_eq!(*seen.lock().unwrap(), vec!["first:7", "second:7"]);
    }
}
