//! Subscription registry: event kind → ordered listeners.
//!
//! Delivery is synchronous on the caller's task, in registration order. Each
//! listener is isolated: a returned error or a panic is logged and delivery
//! continues with the next listener.

use crate::events::{EventKind, PushEvent};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{trace, warn};

type Listener = Arc<dyn Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of one [`SubscriptionRegistry::trigger`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Listeners that returned `Ok`.
    pub delivered: usize,
    /// Listeners that returned an error or panicked.
    pub failed: usize,
}

/// Maps event kinds to listener lists.
#[derive(Default)]
pub struct SubscriptionRegistry {
    listeners: RwLock<HashMap<EventKind, Vec<Listener>>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: Vec<(EventKind, usize)> = EventKind::ALL
            .iter()
            .map(|kind| (*kind, self.listener_count(*kind)))
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the list for `kind`.
    ///
    /// Registering the same closure twice makes it fire twice.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&PushEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.listeners.write() {
            guard.entry(kind).or_default().push(Arc::new(listener));
        }
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .read()
            .map(|guard| guard.get(&kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Drop every listener.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.listeners.write() {
            guard.clear();
        }
    }

    /// Deliver `event` to every listener of its kind.
    ///
    /// The listener list is snapshotted first, so listeners may register
    /// further listeners without deadlocking; those see the next event.
    pub fn trigger(&self, event: &PushEvent) -> Delivery {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .map(|guard| guard.get(&kind).cloned().unwrap_or_default())
            .unwrap_or_default();

        let mut delivery = Delivery::default();
        for (index, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => delivery.delivered += 1,
                Ok(Err(e)) => {
                    delivery.failed += 1;
                    warn!(event = %kind, listener = index, error = %e, "Listener failed");
                }
                Err(_) => {
                    delivery.failed += 1;
                    warn!(event = %kind, listener = index, "Listener panicked");
                }
            }
        }

        trace!(event = %kind, delivered = delivery.delivered, failed = delivery.failed, "Event dispatched");
        delivery
    }
}
