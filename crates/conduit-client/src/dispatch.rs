//! Client-side handler table.
//!
//! Handlers are keyed by event key. Topic pushes arrive under the
//! `conduit` method and are demultiplexed by the event key inside the
//! payload; filtered pushes arrive under the payload's type name, which
//! doubles as the event key. Both land here.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use conduit_core::{ConduitPayload, PushEnvelope, CONDUIT_METHOD};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

/// Opaque handle to a registered handler, used to remove it.
pub type HandlerId = u64;

type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

struct EventHandler {
    id: HandlerId,
    event_key: String,
    callback: Callback,
}

/// Registered push handlers.
#[derive(Default)]
pub struct DispatchTable {
    handlers: Mutex<Vec<EventHandler>>,
    next_id: AtomicU64,
}

impl DispatchTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event_key`. Multiple handlers per key are
    /// allowed; each gets every matching push.
    pub fn on(
        &self,
        event_key: &str,
        callback: impl Fn(&Value) + Send + Sync + 'static,
    ) -> HandlerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push(EventHandler {
            id,
            event_key: event_key.to_owned(),
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove one handler. Returns its event key if it existed.
    ///
    /// Shift-removal keeps the survivors in registration order, which
    /// is the order [`dispatch`](DispatchTable::dispatch) invokes them in.
    pub fn off(&self, id: HandlerId) -> Option<String> {
        let mut handlers = self.handlers.lock();
        let position = handlers.iter().position(|h| h.id == id)?;
        Some(handlers.remove(position).event_key)
    }

    /// Remove every handler for `event_key`. Returns how many were
    /// removed.
    pub fn off_event(&self, event_key: &str) -> usize {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|h| h.event_key != event_key);
        before - handlers.len()
    }

    /// Whether any handler is registered for `event_key`.
    #[must_use]
    pub fn has_handlers(&self, event_key: &str) -> bool {
        self.handlers.lock().iter().any(|h| h.event_key == event_key)
    }

    /// Total registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    /// Invoke every handler registered for `event_key`.
    ///
    /// Callbacks run outside the table lock, so a handler may register
    /// or remove handlers. A panicking handler is logged and does not
    /// take down the dispatch loop or its siblings.
    pub fn dispatch(&self, event_key: &str, payload: &Value) {
        let callbacks: Vec<Callback> = {
            let handlers = self.handlers.lock();
            handlers
                .iter()
                .filter(|h| h.event_key == event_key)
                .map(|h| Arc::clone(&h.callback))
                .collect()
        };
        if callbacks.is_empty() {
            debug!(event_key, "push with no registered handler");
            return;
        }
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
                warn!(event_key, "push handler panicked");
            }
        }
    }

    /// Route one inbound frame to its handlers.
    pub fn route(&self, envelope: &PushEnvelope) {
        if envelope.method == CONDUIT_METHOD {
            match serde_json::from_value::<ConduitPayload>(envelope.payload.clone()) {
                Ok(wrapped) => self.dispatch(&wrapped.event_key, &wrapped.message),
                Err(err) => warn!(error = %err, "malformed topic push"),
            }
        } else {
            self.dispatch(&envelope.method, &envelope.payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter_handler(counter: &Arc<AtomicUsize>) -> impl Fn(&Value) + Send + Sync + 'static {
        let counter = Arc::clone(counter);
        move |_| {
            let _ = counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn dispatch_hits_matching_handlers_only() {
        let table = DispatchTable::new();
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));
        let _ = table.on("A", counter_handler(&hits_a));
        let _ = table.on("B", counter_handler(&hits_b));

        table.dispatch("A", &json!(1));

        assert_eq!(hits_a.load(Ordering::Relaxed), 1);
        assert_eq!(hits_b.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn multiple_handlers_per_key_all_fire() {
        let table = DispatchTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _ = table.on("A", counter_handler(&hits));
        let _ = table.on("A", counter_handler(&hits));

        table.dispatch("A", &json!(1));

        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn off_removes_one_handler() {
        let table = DispatchTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = table.on("A", counter_handler(&hits));
        let _ = table.on("A", counter_handler(&hits));

        assert_eq!(table.off(id), Some("A".to_owned()));
        table.dispatch("A", &json!(1));

        assert_eq!(hits.load(Ordering::Relaxed), 1);
        assert!(table.has_handlers("A"));
    }

    #[test]
    fn off_preserves_sibling_invocation_order() {
        let table = DispatchTable::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let on_a = |n: u32| {
            let sink = Arc::clone(&order);
            move |_: &Value| sink.lock().push(n)
        };
        let _ = table.on("A", on_a(1));
        let unrelated = table.on("B", |_| {});
        let _ = table.on("A", on_a(2));
        let _ = table.on("A", on_a(3));

        assert_eq!(table.off(unrelated), Some("B".to_owned()));
        table.dispatch("A", &json!(1));

        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn off_unknown_id_is_none() {
        let table = DispatchTable::new();
        assert_eq!(table.off(42), None);
    }

    #[test]
    fn off_event_removes_all_for_key() {
        let table = DispatchTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _ = table.on("A", counter_handler(&hits));
        let _ = table.on("A", counter_handler(&hits));
        let _ = table.on("B", counter_handler(&hits));

        assert_eq!(table.off_event("A"), 2);
        assert!(!table.has_handlers("A"));
        assert!(table.has_handlers("B"));
    }

    #[test]
    fn panicking_handler_does_not_stop_siblings() {
        let table = DispatchTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _ = table.on("A", |_| panic!("boom"));
        let _ = table.on("A", counter_handler(&hits));

        table.dispatch("A", &json!(1));

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn route_demuxes_topic_push_by_event_key() {
        let table = DispatchTable::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let _ = table.on("orders", move |payload| {
            *sink.lock() = Some(payload.clone());
        });

        table.route(&PushEnvelope {
            method: CONDUIT_METHOD.into(),
            payload: json!({"eventKey": "orders", "message": {"total": 3}}),
        });

        assert_eq!(seen.lock().clone(), Some(json!({"total": 3})));
    }

    #[test]
    fn route_delivers_filtered_push_by_method() {
        let table = DispatchTable::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let _ = table.on("Alert", move |payload| {
            *sink.lock() = Some(payload.clone());
        });

        table.route(&PushEnvelope {
            method: "Alert".into(),
            payload: json!({"text": "hi"}),
        });

        assert_eq!(seen.lock().clone(), Some(json!({"text": "hi"})));
    }

    #[test]
    fn route_tolerates_malformed_topic_payload() {
        let table = DispatchTable::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let _ = table.on("orders", counter_handler(&hits));

        table.route(&PushEnvelope {
            method: CONDUIT_METHOD.into(),
            payload: json!("not an object"),
        });

        assert_eq!(hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn handler_may_mutate_table_during_dispatch() {
        let table = Arc::new(DispatchTable::new());
        let inner = Arc::clone(&table);
        let _ = table.on("A", move |_| {
            let _ = inner.on("B", |_| {});
        });

        table.dispatch("A", &json!(1));

        assert!(table.has_handlers("B"));
    }
}
