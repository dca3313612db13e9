//! Per filter type connection index.
//!
//! One [`FilterIndex`] exists per registered filter type. It maps live
//! connection ids to that type's current filter value and tolerates
//! concurrent upsert/remove/scan without caller-side locking (dashmap
//! shards, so a scan never blocks connect/disconnect globally).

use std::time::{Duration, Instant};

use conduit_core::ConnectionId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// A connection's current filter state.
#[derive(Clone, Debug)]
pub struct FilterEntry<F> {
    /// The typed filter value.
    pub filter: F,
    /// When the connection entry was created. Connection-lifetime, not
    /// filter-lifetime: filter replacement does not refresh it.
    pub created_at: Instant,
}

impl<F> FilterEntry<F> {
    fn new(filter: F) -> Self {
        Self {
            filter,
            created_at: Instant::now(),
        }
    }
}

/// Concurrent map of connection id → filter entry for one filter type.
pub struct FilterIndex<F> {
    entries: DashMap<ConnectionId, FilterEntry<F>>,
}

impl<F: Send + Sync + 'static> FilterIndex<F> {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Insert an entry for a newly connected client. Idempotent: an
    /// existing entry (and its `created_at`) is left untouched.
    pub fn on_connect(&self, id: ConnectionId, filter: F) {
        let _ = self.entries.entry(id).or_insert_with(|| FilterEntry::new(filter));
    }

    /// Remove the entry for a disconnected client. No-op if absent.
    pub fn on_disconnect(&self, id: &ConnectionId) {
        let _ = self.entries.remove(id);
    }

    /// Replace the filter value for a connection, preserving `created_at`.
    ///
    /// A connection the index has never seen gets a fresh entry; later
    /// applications overwrite, never append. The upsert is atomic, so a
    /// concurrent [`on_connect`](FilterIndex::on_connect) seed is never
    /// replaced wholesale.
    pub fn apply(&self, id: &ConnectionId, filter: F) {
        match self.entries.entry(id.clone()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().filter = filter,
            Entry::Vacant(vacant) => {
                let _ = vacant.insert(FilterEntry::new(filter));
            }
        }
    }

    /// Collect the ids of all connections whose filter satisfies the
    /// predicate.
    ///
    /// Snapshot semantics: mutations racing with the scan may or may not
    /// be visible, but every returned entry was whole at read time.
    pub fn matching(&self, predicate: impl Fn(&F) -> bool) -> Vec<ConnectionId> {
        self.entries
            .iter()
            .filter(|entry| predicate(&entry.filter))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Remove entries older than `max_lifetime`. Returns how many were
    /// purged.
    pub fn cleanup(&self, max_lifetime: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.created_at.elapsed() <= max_lifetime);
        before.saturating_sub(self.entries.len())
    }

    /// Whether an entry exists for this connection.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of tracked connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F: Send + Sync + 'static> Default for FilterIndex<F> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Sample {
        value: String,
    }

    fn sample(value: &str) -> Sample {
        Sample {
            value: value.into(),
        }
    }

    #[test]
    fn connect_inserts_entry() {
        let index = FilterIndex::new();
        let id = ConnectionId::from("c1");
        index.on_connect(id.clone(), sample("a"));
        assert!(index.contains(&id));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn connect_is_idempotent() {
        let index = FilterIndex::new();
        let id = ConnectionId::from("c1");
        index.on_connect(id.clone(), sample("first"));
        index.on_connect(id.clone(), sample("second"));
        // First value wins; duplicate connect never overwrites.
        let matched = index.matching(|f: &Sample| f.value == "first");
        assert_eq!(matched, vec![id]);
    }

    #[test]
    fn disconnect_removes_entry() {
        let index = FilterIndex::new();
        let id = ConnectionId::from("c1");
        index.on_connect(id.clone(), sample("a"));
        index.on_disconnect(&id);
        assert!(!index.contains(&id));
        assert!(index.is_empty());
    }

    #[test]
    fn disconnect_absent_is_noop() {
        let index: FilterIndex<Sample> = FilterIndex::new();
        index.on_disconnect(&ConnectionId::from("ghost"));
        assert!(index.is_empty());
    }

    #[test]
    fn apply_overwrites_never_appends() {
        let index = FilterIndex::new();
        let id = ConnectionId::from("c1");
        index.on_connect(id.clone(), sample("a"));
        index.apply(&id, sample("b"));
        index.apply(&id, sample("c"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.matching(|f| f.value == "c"), vec![id]);
    }

    #[test]
    fn apply_preserves_created_at() {
        let index = FilterIndex::new();
        let id = ConnectionId::from("c1");
        index.on_connect(id.clone(), sample("a"));
        let created = index.entries.get(&id).unwrap().created_at;
        std::thread::sleep(Duration::from_millis(5));
        index.apply(&id, sample("b"));
        assert_eq!(index.entries.get(&id).unwrap().created_at, created);
    }

    #[test]
    fn apply_to_unseen_connection_creates_entry() {
        let index = FilterIndex::new();
        let id = ConnectionId::from("late");
        index.apply(&id, sample("x"));
        assert!(index.contains(&id));
    }

    #[test]
    fn matching_selects_exact_subset() {
        let index = FilterIndex::new();
        for (id, v) in [("a", "x"), ("b", "y"), ("c", "x")] {
            index.on_connect(ConnectionId::from(id), sample(v));
        }
        let mut matched = index.matching(|f| f.value == "x");
        matched.sort();
        assert_eq!(
            matched,
            vec![ConnectionId::from("a"), ConnectionId::from("c")]
        );
    }

    #[test]
    fn matching_empty_set() {
        let index = FilterIndex::new();
        index.on_connect(ConnectionId::from("a"), sample("x"));
        assert!(index.matching(|f| f.value == "nope").is_empty());
    }

    #[test]
    fn cleanup_purges_only_stale_entries() {
        let index = FilterIndex::new();
        index.on_connect(ConnectionId::from("old"), sample("a"));
        std::thread::sleep(Duration::from_millis(20));
        index.on_connect(ConnectionId::from("new"), sample("b"));
        let purged = index.cleanup(Duration::from_millis(10));
        assert_eq!(purged, 1);
        assert!(!index.contains(&ConnectionId::from("old")));
        assert!(index.contains(&ConnectionId::from("new")));
    }

    #[test]
    fn cleanup_with_generous_lifetime_purges_nothing() {
        let index = FilterIndex::new();
        index.on_connect(ConnectionId::from("a"), sample("x"));
        assert_eq!(index.cleanup(Duration::from_secs(3600)), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn concurrent_connect_and_apply_keep_one_entry() {
        use std::sync::Arc;

        let index = Arc::new(FilterIndex::new());
        let id = ConnectionId::from("c1");

        let connector = {
            let index = Arc::clone(&index);
            let id = id.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    index.on_connect(id.clone(), sample("seed"));
                }
            })
        };
        let applier = {
            let index = Arc::clone(&index);
            let id = id.clone();
            std::thread::spawn(move || {
                for _ in 0..500 {
                    index.apply(&id, sample("applied"));
                }
            })
        };

        connector.join().unwrap();
        applier.join().unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains(&id));
    }

    #[test]
    fn concurrent_scan_and_mutation() {
        use std::sync::Arc;

        let index = Arc::new(FilterIndex::new());
        for i in 0..100 {
            index.on_connect(ConnectionId::from(format!("c{i}")), sample("x"));
        }

        let scanner = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let _ = index.matching(|f: &Sample| f.value == "x");
                }
            })
        };
        let mutator = {
            let index = Arc::clone(&index);
            std::thread::spawn(move || {
                for i in 0..100 {
                    index.on_disconnect(&ConnectionId::from(format!("c{i}")));
                }
            })
        };

        scanner.join().unwrap();
        mutator.join().unwrap();
        assert!(index.is_empty());
    }
}
