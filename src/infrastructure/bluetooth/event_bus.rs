//! Radio Event Bus
//!
//! Fan-out of radio-stack notifications to registered handlers. The radio
//! stack publishes, the coordinator subscribes. Handlers for one
//! [`EventKind`] run in registration order; nothing is promised across kinds.

use crate::domain::models::{AdapterState, PeripheralDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Asynchronous notification from the radio stack.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    AdapterStateChanged(AdapterState),
    PeripheralDiscovered(PeripheralDescriptor),
    ScanStopped,
    PeripheralConnected { id: String },
    PeripheralDisconnected { id: String },
    PeripheralBonded { id: String },
}

impl RadioEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AdapterStateChanged(_) => EventKind::AdapterStateChanged,
            Self::PeripheralDiscovered(_) => EventKind::PeripheralDiscovered,
            Self::ScanStopped => EventKind::ScanStopped,
            Self::PeripheralConnected { .. } => EventKind::PeripheralConnected,
            Self::PeripheralDisconnected { .. } => EventKind::PeripheralDisconnected,
            Self::PeripheralBonded { .. } => EventKind::PeripheralBonded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    AdapterStateChanged,
    PeripheralDiscovered,
    ScanStopped,
    PeripheralConnected,
    PeripheralDisconnected,
    PeripheralBonded,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::AdapterStateChanged,
        EventKind::PeripheralDiscovered,
        EventKind::ScanStopped,
        EventKind::PeripheralConnected,
        EventKind::PeripheralDisconnected,
        EventKind::PeripheralBonded,
    ];
}

pub type Handler = Arc<dyn Fn(&RadioEvent) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<EventKind, Vec<(u64, Handler)>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&RadioEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        debug!("Subscribed handler {} to {:?}", id, kind);
        Subscription { kind, id }
    }

    /// Returns `false` if the subscription was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut registry = self.lock();
        let Some(handlers) = registry.handlers.get_mut(&subscription.kind) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(id, _)| *id != subscription.id);
        before != handlers.len()
    }

    pub fn unsubscribe_all(&self, subscriptions: impl IntoIterator<Item = Subscription>) {
        let mut registry = self.lock();
        for subscription in subscriptions {
            if let Some(handlers) = registry.handlers.get_mut(&subscription.kind) {
                handlers.retain(|(id, _)| *id != subscription.id);
            }
        }
    }

    /// Deliver `event` to every handler registered for its kind.
    ///
    /// Handlers are invoked outside the registry lock, so a handler may
    /// subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, event: &RadioEvent) {
        let handlers: Vec<Handler> = self
            .lock()
            .handlers
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        trace!("Publishing {:?} to {} handler(s)", event.kind(), handlers.len());
        for handler in handlers {
            handler(event);
        }
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().handlers.get(&kind).map_or(0, Vec::len)
    }

    pub fn total_handlers(&self) -> usize {
        self.lock().handlers.values().map(Vec::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Subscriptions acquired together and released together.
///
/// [`SubscriptionGroup::teardown`] removes every handle in one call; dropping
/// the group does the same, so an early return cannot leave stale handlers
/// registered on the bus.
pub struct SubscriptionGroup {
    bus: EventBus,
    subscriptions: Vec<Subscription>,
}

impl SubscriptionGroup {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            subscriptions: Vec::new(),
        }
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&RadioEvent) + Send + Sync + 'static,
    {
        let subscription = self.bus.subscribe(kind, handler);
        self.subscriptions.push(subscription);
        subscription
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn teardown(&mut self) {
        if self.subscriptions.is_empty() {
            return;
        }
        debug!("Tearing down {} subscription(s)", self.subscriptions.len());
        self.bus.unsubscribe_all(self.subscriptions.drain(..));
    }
}

impl Drop for SubscriptionGroup {
    fn drop(&mut self) {
        self.teardown();
    }
}
