//! Type-keyed publish/subscribe bus shared by the host and all modules.
//!
//! Delivery is synchronous on the publisher's thread, in subscription order.
//! The handler list is cloned under the read lock and the lock is dropped
//! before any handler runs, so handlers may subscribe or unsubscribe
//! (themselves included) while being invoked.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

/// A subscribed handler. Identity is the allocation, so keep the `Arc`
/// returned by [`EventBus::on`] to unsubscribe later.
pub type EventHandler<T> = Arc<dyn Fn(&T) + Send + Sync>;

type ErasedHandler = Box<dyn Any + Send + Sync>;

/// Process-wide typed event bus.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Vec<ErasedHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a handler for events of type `T`.
    ///
    /// Subscribing the same handler twice is a no-op.
    pub fn subscribe<T: Any>(&self, handler: EventHandler<T>) {
        let mut handlers = self.handlers.write();
        let list = handlers.entry(TypeId::of::<T>()).or_default();
        let present = list
            .iter()
            .filter_map(|h| h.downcast_ref::<EventHandler<T>>())
            .any(|h| same_handler(h, &handler));
        if !present {
            list.push(Box::new(handler));
        }
    }

    /// Wrap a closure, subscribe it, and return the handle used to
    /// unsubscribe it.
    pub fn on<T, F>(&self, f: F) -> EventHandler<T>
    where
        T: Any,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let handler: EventHandler<T> = Arc::new(f);
        self.subscribe(handler.clone());
        handler
    }

    /// Remove a handler. Returns `false` if it was not subscribed.
    pub fn unsubscribe<T: Any>(&self, handler: &EventHandler<T>) -> bool {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(&TypeId::of::<T>()) else {
            return false;
        };

        let before = list.len();
        list.retain(|h| {
            h.downcast_ref::<EventHandler<T>>()
                .map_or(true, |h| !same_handler(h, handler))
        });
        let removed = list.len() != before;

        if list.is_empty() {
            handlers.remove(&TypeId::of::<T>());
        }
        removed
    }

    /// Deliver `event` to every handler subscribed for `T`.
    ///
    /// Returns the number of handlers that ran to completion. A panicking
    /// handler is logged and skipped; the remaining handlers still run.
    pub fn publish<T: Any>(&self, event: T) -> usize {
        let snapshot: Vec<EventHandler<T>> = {
            let handlers = self.handlers.read();
            match handlers.get(&TypeId::of::<T>()) {
                Some(list) => list
                    .iter()
                    .filter_map(|h| h.downcast_ref::<EventHandler<T>>())
                    .cloned()
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    tracing::warn!(
                        event_type = std::any::type_name::<T>(),
                        "Event handler panicked"
                    );
                }
            }
        }
        delivered
    }

    pub fn handler_count<T: Any>(&self) -> usize {
        self.handlers
            .read()
            .get(&TypeId::of::<T>())
            .map_or(0, Vec::len)
    }

    /// Number of event types with at least one handler.
    pub fn event_type_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Drop every handler of every type.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_types", &self.event_type_count())
            .finish()
    }
}

fn same_handler<T>(a: &EventHandler<T>, b: &EventHandler<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
