//! Event fan-out to external subscribers
//!
//! Dashboards and other consumers observe the pipeline through this bus.
//! Handlers run synchronously on the emitting task and are panic-isolated so
//! one bad subscriber cannot stop processing. Subscriptions are explicit
//! handles with explicit unsubscribe.

use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{error, trace};

use crate::accuracy::AccuracyStats;
use crate::market_data::TokenSnapshot;
use crate::monitor::finalizer::Decision;
use crate::scoring::CompositeScore;

/// State changes surfaced to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    EntitiesAdmitted {
        entities: Vec<TokenSnapshot>,
    },
    EntityScored {
        id: String,
        score: CompositeScore,
    },
    EntityFinalized {
        id: String,
        decision: Decision,
        score: Option<CompositeScore>,
    },
    AccuracyUpdated {
        stats: AccuracyStats,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::EntitiesAdmitted { .. } => "entities_admitted",
            PipelineEvent::EntityScored { .. } => "entity_scored",
            PipelineEvent::EntityFinalized { .. } => "entity_finalized",
            PipelineEvent::AccuracyUpdated { .. } => "accuracy_updated",
        }
    }
}

type Handler = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    handlers: RwLock<HashMap<u64, Handler>>,
    next_id: AtomicU64,
}

/// Fan-out bus with explicit subscription handles
#[derive(Default, Clone)]
pub struct EventBus {
    inner: Arc<Subscribers>,
}

/// Handle for one subscription; unsubscribe is explicit
pub struct SubscriptionHandle {
    id: u64,
    inner: Arc<Subscribers>,
}

impl SubscriptionHandle {
    pub fn unsubscribe(self) {
        self.inner.handlers.write().unwrap().remove(&self.id);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .handlers
            .write()
            .unwrap()
            .insert(id, Arc::new(handler));
        SubscriptionHandle {
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Deliver an event to every subscriber. A panicking handler is logged
    /// and skipped; the rest still run. The registration lock is released
    /// before any handler runs, so handlers may subscribe, unsubscribe, or
    /// clear the bus without deadlocking the emitting task.
    pub fn emit(&self, event: PipelineEvent) {
        let handlers: Vec<(u64, Handler)> = {
            let guard = self.inner.handlers.read().unwrap();
            trace!(event = event.name(), subscribers = guard.len(), "emit");
            guard
                .iter()
                .map(|(id, handler)| (*id, Arc::clone(handler)))
                .collect()
        };

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                error!(
                    subscriber = id,
                    event = event.name(),
                    "Subscriber panicked while handling event"
                );
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.read().unwrap().len()
    }

    /// Drop all registrations (shutdown)
    pub fn clear(&self) {
        self.inner.handlers.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn admitted_event() -> PipelineEvent {
        PipelineEvent::EntitiesAdmitted { entities: vec![] }
    }

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(Vec::new()));

        let received_clone = Arc::clone(&received);
        let handle = bus.subscribe(move |event| {
            received_clone.lock().unwrap().push(event.name());
        });

        bus.emit(admitted_event());
        assert_eq!(received.lock().unwrap().len(), 1);

        handle.unsubscribe();
        assert_eq!(bus.subscriber_count(), 0);

        bus.emit(admitted_event());
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let bus = EventBus::new();
        let received = Arc::new(Mutex::new(0));

        let _bad = bus.subscribe(|_| panic!("bad subscriber"));
        let received_clone = Arc::clone(&received);
        let _good = bus.subscribe(move |_| {
            *received_clone.lock().unwrap() += 1;
        });

        bus.emit(admitted_event());
        bus.emit(admitted_event());

        // The good subscriber keeps receiving despite the panicking one
        assert_eq!(*received.lock().unwrap(), 2);
    }

    #[test]
    fn test_subscriber_may_clear_bus_from_handler() {
        let bus = EventBus::new();
        let fired = Arc::new(Mutex::new(false));

        // Tearing down registrations from inside a handler must not deadlock
        // the emitting task.
        let bus_clone = bus.clone();
        let fired_clone = Arc::clone(&fired);
        let _sub = bus.subscribe(move |_| {
            bus_clone.clear();
            *fired_clone.lock().unwrap() = true;
        });

        bus.emit(admitted_event());
        assert!(*fired.lock().unwrap());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_may_subscribe_from_handler() {
        let bus = EventBus::new();

        let bus_clone = bus.clone();
        let _sub = bus.subscribe(move |_| {
            let handle = bus_clone.subscribe(|_| {});
            handle.unsubscribe();
        });

        bus.emit(admitted_event());
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_clear_drops_all_subscriptions() {
        let bus = EventBus::new();
        let _a = bus.subscribe(|_| {});
        let _b = bus.subscribe(|_| {});
        assert_eq!(bus.subscriber_count(), 2);

        bus.clear();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
