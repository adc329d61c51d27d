//! Named-event publish/subscribe used between the realtime transport and job
//! trackers.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{trace, warn};

pub type EventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Source of named events and of the transport's connected state.
pub trait EventBus: Send + Sync {
    /// Register `handler` for `event`. The listener lives until the returned
    /// [`Subscription`] is unsubscribed or dropped.
    fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription;

    /// Connected flag of the underlying transport.
    fn connection_state(&self) -> watch::Receiver<bool>;
}

/// Handle to one listener. Unsubscribing is idempotent and also happens on drop.
#[must_use = "dropping a subscription removes its listener"]
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(remove: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            remove: Some(Box::new(remove)),
        }
    }

    pub fn unsubscribe(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    pub fn is_active(&self) -> bool {
        self.remove.is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

#[derive(Default)]
struct Listeners {
    by_event: HashMap<String, Vec<(u64, EventHandler)>>,
}

/// In-process [`EventBus`]. Transports feed it through [`EventHub::dispatch`]
/// and [`EventHub::set_connected`].
#[derive(Clone)]
pub struct EventHub {
    listeners: Arc<RwLock<Listeners>>,
    next_id: Arc<AtomicU64>,
    connected: Arc<watch::Sender<bool>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            listeners: Arc::new(RwLock::new(Listeners::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            connected: Arc::new(connected),
        }
    }

    /// Deliver `payload` to every listener of `event`. Returns the number of listeners.
    ///
    /// A panicking handler is logged and skipped; the remaining listeners and
    /// the caller keep running.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        // Handlers run outside the lock so they may subscribe or unsubscribe.
        let handlers: Vec<EventHandler> = self
            .listeners
            .read()
            .by_event
            .get(event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();
        trace!(event, listeners = handlers.len(), "Dispatching event");
        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(payload))).is_err() {
                warn!(event, "Event handler panicked, payload skipped");
            }
        }
        handlers.len()
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .by_event
            .get(event)
            .map_or(0, Vec::len)
    }
}

impl EventBus for EventHub {
    fn subscribe(&self, event: &str, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, handler));

        let listeners = Arc::downgrade(&self.listeners);
        let event = event.to_string();
        Subscription::new(move || {
            let Some(listeners) = listeners.upgrade() else {
                return;
            };
            let mut guard = listeners.write();
            if let Some(list) = guard.by_event.get_mut(&event) {
                list.retain(|(listener_id, _)| *listener_id != id);
                if list.is_empty() {
                    guard.by_event.remove(&event);
                }
            }
        })
    }

    fn connection_state(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }
}
