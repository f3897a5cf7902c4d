//! Synchronous, priority-ordered observer registry for named events.
//!
//! Built once at startup and shared through `AppState`. Observers run inline on
//! the triggering task and may trigger further events.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

pub type ObserverFn = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

pub const DEFAULT_PRIORITY: i32 = 10;

static EVENT_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9_]+$").expect("event name regex is valid"));

/// Pre-registered event names
pub mod events {
    pub const BEFORE_MESSAGE_SEND: &str = "before_message_send";
    pub const MESSAGE_SENT: &str = "message_sent";
    pub const MESSAGE_SEND_ERROR: &str = "message_send_error";
    pub const BEFORE_QR_GENERATION: &str = "before_qr_generation";
    pub const QR_GENERATED: &str = "qr_generated";
    pub const QR_GENERATION_ERROR: &str = "qr_generation_error";
    pub const BEFORE_STATUS_CHECK: &str = "before_status_check";
    pub const STATUS_CHECK_COMPLETE: &str = "status_check_complete";
    pub const STATUS_CHECK_ERROR: &str = "status_check_error";
    pub const SESSION_CONNECTED: &str = "session_connected";
    pub const SESSION_DISCONNECTED: &str = "session_disconnected";
    pub const WEBHOOK_RECEIVED: &str = "webhook_received";
    pub const WEBHOOK_PROCESSED: &str = "webhook_processed";
    pub const WEBHOOK_ERROR: &str = "webhook_error";
    pub const CACHE_HIT: &str = "cache_hit";
    pub const CACHE_MISS: &str = "cache_miss";
    pub const CACHE_SET: &str = "cache_set";
    pub const CACHE_CLEARED: &str = "cache_cleared";
    // dispatcher lifecycle
    pub const BEFORE_SEND: &str = "before_send";
    pub const REQUEST_ERROR: &str = "request_error";
    pub const HTTP_ERROR: &str = "http_error";
    pub const INVALID_RESPONSE: &str = "invalid_response";
    pub const REQUEST_SUCCESS: &str = "request_success";

    pub const STANDARD: &[&str] = &[
        BEFORE_MESSAGE_SEND,
        MESSAGE_SENT,
        MESSAGE_SEND_ERROR,
        BEFORE_QR_GENERATION,
        QR_GENERATED,
        QR_GENERATION_ERROR,
        BEFORE_STATUS_CHECK,
        STATUS_CHECK_COMPLETE,
        STATUS_CHECK_ERROR,
        SESSION_CONNECTED,
        SESSION_DISCONNECTED,
        WEBHOOK_RECEIVED,
        WEBHOOK_PROCESSED,
        WEBHOOK_ERROR,
        CACHE_HIT,
        CACHE_MISS,
        CACHE_SET,
        CACHE_CLEARED,
        BEFORE_SEND,
        REQUEST_ERROR,
        HTTP_ERROR,
        INVALID_RESPONSE,
        REQUEST_SUCCESS,
    ];
}

/// Wrap a closure as an observer handle. Keep the returned `Arc` to remove it later.
pub fn observer<F>(f: F) -> ObserverFn
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone)]
struct Observer {
    callback: ObserverFn,
    priority: i32,
}

#[derive(Default)]
struct Registry {
    custom_events: BTreeSet<String>,
    observers: HashMap<String, Vec<Observer>>,
}

pub struct EventBus {
    registry: RwLock<Registry>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
        }
    }

    // A panicking observer never holds the lock, so poisoning only means
    // another writer panicked mid-update; the data is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_valid_event(&self, event: &str) -> bool {
        events::STANDARD.contains(&event) || self.read().custom_events.contains(event)
    }

    /// Register a custom event name. Names must match `^[a-z0-9_]+$`.
    pub fn register_custom_event(&self, event: &str) -> bool {
        if !EVENT_NAME_REGEX.is_match(event) {
            warn!(event = %event, "Invalid custom event name");
            return false;
        }
        if events::STANDARD.contains(&event) {
            return false;
        }
        let inserted = self.write().custom_events.insert(event.to_string());
        if inserted {
            info!(event = %event, "Custom event registered");
        }
        inserted
    }

    /// Standard events followed by custom ones in name order
    pub fn available_events(&self) -> Vec<String> {
        let registry = self.read();
        events::STANDARD
            .iter()
            .map(|e| e.to_string())
            .chain(registry.custom_events.iter().cloned())
            .collect()
    }

    pub fn add_observer(&self, event: &str, callback: ObserverFn, priority: i32) -> bool {
        if !self.is_valid_event(event) {
            warn!(event = %event, "Attempted to add observer to unknown event");
            return false;
        }

        let mut registry = self.write();
        let list = registry.observers.entry(event.to_string()).or_default();
        list.push(Observer { callback, priority });
        // sort_by_key is stable: equal priorities keep insertion order
        list.sort_by_key(|o| o.priority);

        debug!(event = %event, priority, "Observer added");
        true
    }

    /// Register several `(event, callback, priority)` triples; returns how many succeeded
    pub fn add_multiple_observers(&self, observers: Vec<(String, ObserverFn, i32)>) -> usize {
        observers
            .into_iter()
            .filter(|(event, callback, priority)| {
                self.add_observer(event, callback.clone(), *priority)
            })
            .count()
    }

    /// Remove the first observer that is the same `Arc` as `callback`
    pub fn remove_observer(&self, event: &str, callback: &ObserverFn) -> bool {
        let mut registry = self.write();
        let Some(list) = registry.observers.get_mut(event) else {
            return false;
        };
        match list.iter().position(|o| Arc::ptr_eq(&o.callback, callback)) {
            Some(index) => {
                list.remove(index);
                debug!(event = %event, "Observer removed");
                true
            }
            None => false,
        }
    }

    pub fn observer_count(&self, event: &str) -> usize {
        self.read().observers.get(event).map_or(0, Vec::len)
    }

    pub fn has_observers(&self, event: &str) -> bool {
        self.observer_count(event) > 0
    }

    /// Drop all observers of `event`; returns how many were removed
    pub fn clear_observers(&self, event: &str) -> usize {
        let removed = self
            .write()
            .observers
            .remove(event)
            .map_or(0, |list| list.len());
        if removed > 0 {
            info!(event = %event, removed, "Observers cleared");
        }
        removed
    }

    /// Notify observers in priority order. Returns the number that completed
    /// without error; failing or panicking observers are logged and skipped.
    pub fn trigger_event(&self, event: &str, data: &Value) -> usize {
        if !self.is_valid_event(event) {
            warn!(event = %event, "Attempted to trigger unknown event");
            return 0;
        }

        // Snapshot so observers can register or trigger without holding the lock
        let snapshot: Vec<Observer> = self
            .read()
            .observers
            .get(event)
            .cloned()
            .unwrap_or_default();

        let mut notified = 0;
        for observer in snapshot {
            match catch_unwind(AssertUnwindSafe(|| (observer.callback)(data))) {
                Ok(Ok(())) => notified += 1,
                Ok(Err(e)) => {
                    error!(event = %event, priority = observer.priority, error = %e, "Observer failed");
                }
                Err(_) => {
                    error!(event = %event, priority = observer.priority, "Observer panicked");
                }
            }
        }

        debug!(event = %event, notified, "Event triggered");
        notified
    }
}
