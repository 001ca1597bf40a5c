//! Event handler registry.
//!
//! Handlers are keyed by event name. Lifecycle events use the reserved names
//! below; every other name matches the method of an inbound event packet.
//! A handler may return a reply, which is sent back when the server asked
//! for an acknowledgement.

use crate::session::Session;
use dashmap::DashMap;
use serde_json::Value;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Fired when the session reaches Connected
pub const CONNECTION: &str = "connection";
/// Fired after a successful reconnection
pub const RECONNECTION: &str = "reconnection";
/// Fired once when the session closes, with the close reason
pub const DISCONNECTION: &str = "disconnection";
/// Fallback for events without a dedicated handler; receives `[method, ...args]`
pub const MESSAGE: &str = "message";
/// Fired when the server refuses the namespace connection
pub const ERROR: &str = "error";

/// Event callback
pub type Handler = Arc<dyn Fn(&Session, Vec<Value>) -> Option<Vec<Value>> + Send + Sync>;

/// Concurrent map of event name to handler
#[derive(Default)]
pub struct Handlers {
    map: DashMap<String, Handler>,
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self.map.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("Handlers").field("events", &names).finish()
    }
}

impl Handlers {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event`, replacing any previous one
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Session, Vec<Value>) -> Option<Vec<Value>> + Send + Sync + 'static,
    {
        self.map.insert(event.to_string(), Arc::new(handler));
    }

    /// Whether a handler exists for `event`
    pub fn contains(&self, event: &str) -> bool {
        self.map.contains_key(event)
    }

    fn get(&self, event: &str) -> Option<Handler> {
        self.map.get(event).map(|h| Arc::clone(h.value()))
    }

    /// Invoke the handler for `event`. Panics are caught and logged.
    pub fn call(&self, session: &Session, event: &str, args: Vec<Value>) -> Option<Vec<Value>> {
        let Some(handler) = self.get(event) else {
            debug!("No handler for event '{}'", event);
            return None;
        };

        match catch_unwind(AssertUnwindSafe(|| handler(session, args))) {
            Ok(reply) => reply,
            Err(panic) => {
                error!("Handler for '{}' panicked: {}", event, panic_message(&*panic));
                None
            }
        }
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
