//! Pending intent queue.
//!
//! Everything the client has asked the server for — subscriptions and
//! filter applications — is remembered here with a sent mark. The queue
//! is the source of truth across reconnects: a disconnect resets every
//! mark so the next flush replays the whole intent set, and a send
//! failure rolls the affected items back so nothing is lost.

use conduit_core::ClientInvocation;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::error::SessionError;
use crate::session::Session;

struct Subscription {
    item_id: u64,
    event_key: String,
    sent: bool,
}

struct FilterApplication {
    item_id: u64,
    filter_name: String,
    filter: Value,
    sent: bool,
}

#[derive(Default)]
struct Inner {
    subscriptions: Vec<Subscription>,
    filters: Vec<FilterApplication>,
    next_item_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_item_id += 1;
        self.next_item_id
    }
}

/// One step of a planned flush: the invocation to send and the queue
/// items it covers.
struct PlannedSend {
    item_ids: Vec<u64>,
    invocation: ClientInvocation,
}

/// The client's pending subscriptions and filter applications.
#[derive(Default)]
pub struct PendingQueue {
    inner: Mutex<Inner>,
}

impl PendingQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a subscription intent. Duplicate keys are kept; the
    /// flush sends each key at most once per session.
    pub fn push_subscription(&self, event_key: &str) {
        let mut inner = self.inner.lock();
        let item_id = inner.next_id();
        inner.subscriptions.push(Subscription {
            item_id,
            event_key: event_key.to_owned(),
            sent: false,
        });
    }

    /// Forget every subscription intent for `event_key`.
    pub fn remove_subscription(&self, event_key: &str) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.event_key != event_key);
        before - inner.subscriptions.len()
    }

    /// Remember a filter intent. A second intent for the same filter
    /// name replaces the first and is re-sent even if the first already
    /// went out.
    pub fn push_filter(&self, filter_name: &str, filter: Value) {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .filters
            .iter_mut()
            .find(|f| f.filter_name == filter_name)
        {
            existing.filter = filter;
            existing.sent = false;
        } else {
            let item_id = inner.next_id();
            inner.filters.push(FilterApplication {
                item_id,
                filter_name: filter_name.to_owned(),
                filter,
                sent: false,
            });
        }
    }

    /// Send every unsent intent over `session`: filters first, then
    /// subscriptions deduplicated by event key.
    ///
    /// Planned items are marked sent before the lock is released, so a
    /// concurrent flush cannot double-send them. On a send failure the
    /// failed and not-yet-attempted items are rolled back to unsent and
    /// the error is returned; a later flush picks them up again.
    pub async fn flush(&self, session: &dyn Session) -> Result<(), SessionError> {
        let plan = self.plan();
        if plan.is_empty() {
            return Ok(());
        }
        debug!(sends = plan.len(), "flushing pending intents");

        for (position, step) in plan.iter().enumerate() {
            if let Err(err) = session.invoke(&step.invocation).await {
                self.roll_back(&plan[position..]);
                return Err(err);
            }
        }
        Ok(())
    }

    fn plan(&self) -> Vec<PlannedSend> {
        let mut inner = self.inner.lock();
        let mut plan = Vec::new();

        for filter in inner.filters.iter_mut().filter(|f| !f.sent) {
            filter.sent = true;
            plan.push(PlannedSend {
                item_ids: vec![filter.item_id],
                invocation: ClientInvocation::ApplyFilter {
                    filter_name: filter.filter_name.clone(),
                    filter: filter.filter.clone(),
                },
            });
        }

        // One subscribe per key per session: keys already on the wire
        // absorb further unsent duplicates without a new send.
        let mut sent_keys: Vec<String> = inner
            .subscriptions
            .iter()
            .filter(|s| s.sent)
            .map(|s| s.event_key.clone())
            .collect();
        for sub in inner.subscriptions.iter_mut().filter(|s| !s.sent) {
            sub.sent = true;
            if sent_keys.iter().any(|key| *key == sub.event_key) {
                if let Some(step) = plan
                    .iter_mut()
                    .find(|p| matches!(&p.invocation, ClientInvocation::Subscribe { event_key } if *event_key == sub.event_key))
                {
                    step.item_ids.push(sub.item_id);
                }
                continue;
            }
            sent_keys.push(sub.event_key.clone());
            plan.push(PlannedSend {
                item_ids: vec![sub.item_id],
                invocation: ClientInvocation::Subscribe {
                    event_key: sub.event_key.clone(),
                },
            });
        }

        plan
    }

    fn roll_back(&self, failed: &[PlannedSend]) {
        let mut inner = self.inner.lock();
        for step in failed {
            for item_id in &step.item_ids {
                if let Some(sub) = inner
                    .subscriptions
                    .iter_mut()
                    .find(|s| s.item_id == *item_id)
                {
                    sub.sent = false;
                }
                if let Some(filter) =
                    inner.filters.iter_mut().find(|f| f.item_id == *item_id)
                {
                    filter.sent = false;
                }
            }
        }
    }

    /// A session died: mark everything unsent so the next flush replays
    /// the full intent set.
    pub fn reset_all(&self) {
        let mut inner = self.inner.lock();
        for sub in &mut inner.subscriptions {
            sub.sent = false;
        }
        for filter in &mut inner.filters {
            filter.sent = false;
        }
    }

    /// The user closed the client: nothing should be replayed.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.subscriptions.clear();
        inner.filters.clear();
    }

    /// Count of intents not yet on the wire.
    #[must_use]
    pub fn unsent_len(&self) -> usize {
        let inner = self.inner.lock();
        inner.subscriptions.iter().filter(|s| !s.sent).count()
            + inner.filters.iter().filter(|f| !f.sent).count()
    }

    /// Total remembered intents.
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.subscriptions.len() + inner.filters.len()
    }

    /// Whether the queue holds no intents.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
