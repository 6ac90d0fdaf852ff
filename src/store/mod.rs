//! In-memory authoritative event store
//!
//! Holds the bounded live view of the feed: one latest entry per
//! channel, plus short batch and aggregate histories. Writes go through
//! the durable repository before the in-memory commit, and every
//! mutation notifies registered subscribers with an attached snapshot.
//!
//! All ordering and trimming invariants are enforced inside the mutation
//! methods; callers never observe a partially-applied state.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::config::RetentionPolicy;
use crate::repository::EventRepository;
use crate::types::{EventKind, EventRecord, Notification, StoreSnapshot};

/// Subscriber callback; invoked synchronously on every notification
pub type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle for removing a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Inner {
    /// Latest single update per channel (latest write wins)
    channels: HashMap<String, EventRecord>,
    /// Batch history entries, newest-first
    batches: Vec<EventRecord>,
    /// Aggregate (balance) history entries, newest-first
    balances: Vec<EventRecord>,
}

/// The authoritative live view, optionally write-through persisted
pub struct EventStore {
    retention: RetentionPolicy,
    repository: Option<Arc<EventRepository>>,
    inner: RwLock<Inner>,
    subscribers: RwLock<Vec<(u64, Listener)>>,
    next_subscriber: AtomicU64,
}

impl EventStore {
    /// Memory-only store (no durability)
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            retention,
            repository: None,
            inner: RwLock::new(Inner::default()),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber: AtomicU64::new(0),
        }
    }

    /// Store backed by a repository; hydrates the live view from the
    /// most recent persisted rows before accepting writes.
    pub fn with_repository(retention: RetentionPolicy, repository: Arc<EventRepository>) -> Self {
        let store = Self {
            repository: Some(repository),
            ..Self::new(retention)
        };
        store.hydrate();
        store
    }

    fn hydrate(&self) {
        let Some(repo) = &self.repository else {
            return;
        };
        let mut inner = self.inner.write();

        // Rows come newest-first, so the first row seen per channel is
        // the one that wins.
        match repo.load_recent(EventKind::Single, self.retention.max_rows) {
            Ok(rows) => {
                for record in rows {
                    let Some(key) = record.partition_key.clone() else {
                        continue;
                    };
                    inner.channels.entry(key).or_insert(record);
                }
            }
            Err(err) => warn!(%err, "hydration of channel state failed"),
        }
        match repo.load_recent(EventKind::Batch, self.retention.max_batches) {
            Ok(rows) => inner.batches = rows,
            Err(err) => warn!(%err, "hydration of batch history failed"),
        }
        match repo.load_recent(EventKind::Aggregate, self.retention.max_balances) {
            Ok(rows) => inner.balances = rows,
            Err(err) => warn!(%err, "hydration of balance history failed"),
        }

        Self::trim(&mut inner, &self.retention);
        debug!(
            channels = inner.channels.len(),
            batches = inner.batches.len(),
            balances = inner.balances.len(),
            "store hydrated"
        );
    }

    /// Ingest one single-entity update. Returns the normalized record.
    pub fn record_single_update(&self, payload: Value) -> EventRecord {
        let record = EventRecord::single(payload, Utc::now());
        self.persist(&record);

        let (key, snapshot) = {
            let mut inner = self.inner.write();
            let key = record
                .partition_key
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            inner.channels.insert(key.clone(), record.clone());
            Self::trim(&mut inner, &self.retention);
            (key, Self::build_snapshot(&inner))
        };

        self.notify(&Notification::Single {
            partition_key: key,
            occurred_at: record.occurred_at,
            snapshot,
        });
        record
    }

    /// Ingest a batch of related updates: stored once as history, then
    /// fanned out so per-channel live state stays current. Subscribers
    /// see one batch notification plus one per derived single update.
    pub fn record_batch_update(&self, updates: Vec<Value>) -> EventRecord {
        let record = EventRecord::batch(Value::Array(updates.clone()), Utc::now());
        self.persist(&record);

        let snapshot = {
            let mut inner = self.inner.write();
            inner.batches.insert(0, record.clone());
            Self::trim(&mut inner, &self.retention);
            Self::build_snapshot(&inner)
        };

        self.notify(&Notification::Batch {
            count: updates.len(),
            occurred_at: record.occurred_at,
            snapshot,
        });

        for update in updates {
            self.record_single_update(update);
        }
        record
    }

    /// Ingest an aggregate (balance-style) update. These records are not
    /// attributable to a single channel, so the live map is untouched.
    pub fn record_aggregate_update(&self, records: Vec<Value>) -> EventRecord {
        let record = EventRecord::aggregate(Value::Array(records.clone()), Utc::now());
        self.persist(&record);

        let snapshot = {
            let mut inner = self.inner.write();
            inner.balances.insert(0, record.clone());
            Self::trim(&mut inner, &self.retention);
            Self::build_snapshot(&inner)
        };

        self.notify(&Notification::Aggregate {
            count: records.len(),
            occurred_at: record.occurred_at,
            snapshot,
        });
        record
    }

    /// Consistent point-in-time copy of the live view
    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read();
        Self::build_snapshot(&inner)
    }

    /// Register a listener invoked on every notification. A panicking
    /// listener is isolated and logged; it never breaks delivery to the
    /// others or the mutation itself.
    pub fn subscribe(&self, listener: Listener) -> SubscriptionId {
        let id = self.next_subscriber.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().push((id, listener));
        SubscriptionId(id)
    }

    /// Remove a listener; unknown ids are ignored (idempotent)
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.write().retain(|(sid, _)| *sid != id.0);
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    fn persist(&self, record: &EventRecord) {
        // Attempted before the in-memory commit. On failure the store
        // stays authoritative and keeps serving reads.
        if let Some(repo) = &self.repository {
            if let Err(err) = repo.append(record) {
                warn!(id = %record.id, %err, "durable write failed, continuing in memory");
            }
        }
    }

    fn notify(&self, notification: &Notification) {
        let listeners: Vec<Listener> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(notification)));
            if outcome.is_err() {
                error!("store listener panicked; other subscribers unaffected");
            }
        }
    }

    fn build_snapshot(inner: &Inner) -> StoreSnapshot {
        let mut channels: Vec<EventRecord> = inner.channels.values().cloned().collect();
        channels.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        StoreSnapshot {
            channels,
            batches: inner.batches.clone(),
            balances: inner.balances.clone(),
        }
    }

    fn trim(inner: &mut Inner, retention: &RetentionPolicy) {
        let cutoff = Utc::now() - retention.max_age;

        // Age first, then count: keep the most recently updated channels.
        inner.channels.retain(|_, record| record.occurred_at >= cutoff);
        if inner.channels.len() > retention.max_channels {
            let mut keys: Vec<(String, chrono::DateTime<Utc>)> = inner
                .channels
                .iter()
                .map(|(key, record)| (key.clone(), record.occurred_at))
                .collect();
            keys.sort_by(|a, b| b.1.cmp(&a.1));
            let keep: std::collections::HashSet<String> = keys
                .into_iter()
                .take(retention.max_channels)
                .map(|(key, _)| key)
                .collect();
            inner.channels.retain(|key, _| keep.contains(key));
        }

        inner.batches.retain(|record| record.occurred_at >= cutoff);
        inner.batches.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        inner.batches.truncate(retention.max_batches);

        inner.balances.retain(|record| record.occurred_at >= cutoff);
        inner.balances.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        inner.balances.truncate(retention.max_balances);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn test_store() -> EventStore {
        EventStore::new(RetentionPolicy::default())
    }

    #[test]
    fn test_latest_write_wins_per_channel() {
        let store = test_store();
        store.record_single_update(json!({"channelId": "chan-1", "state": "open"}));
        store.record_single_update(json!({"channelId": "chan-1", "state": "closed"}));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.channels.len(), 1);
        assert_eq!(snapshot.channels[0].payload["state"], "closed");
    }

    #[test]
    fn test_snapshot_sorted_newest_first() {
        let store = test_store();
        for i in 0..5 {
            store.record_single_update(json!({"channelId": format!("chan-{}", i)}));
        }
        let snapshot = store.snapshot();
        for pair in snapshot.channels.windows(2) {
            assert!(pair[0].occurred_at >= pair[1].occurred_at);
        }
    }

    #[test]
    fn test_live_map_bounded() {
        let retention = RetentionPolicy {
            max_channels: 3,
            ..Default::default()
        };
        let store = EventStore::new(retention);
        for i in 0..10 {
            store.record_single_update(json!({"channelId": format!("chan-{}", i)}));
        }
        assert_eq!(store.snapshot().channels.len(), 3);
    }

    #[test]
    fn test_batch_fans_out_to_live_state() {
        let store = test_store();
        store.record_batch_update(vec![
            json!({"channelId": "chan-a", "state": "open"}),
            json!({"channelId": "chan-b", "state": "open"}),
        ]);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.channels.len(), 2);
        assert_eq!(snapshot.batches.len(), 1);
    }

    #[test]
    fn test_aggregate_does_not_touch_live_state() {
        let store = test_store();
        store.record_aggregate_update(vec![json!({"asset": "usdc", "amount": "10"})]);

        let snapshot = store.snapshot();
        assert!(snapshot.channels.is_empty());
        assert_eq!(snapshot.balances.len(), 1);
    }

    #[test]
    fn test_history_lists_bounded() {
        let retention = RetentionPolicy {
            max_batches: 2,
            ..Default::default()
        };
        let store = EventStore::new(retention);
        for _ in 0..5 {
            store.record_aggregate_update(vec![json!({"asset": "usdc"})]);
        }
        // max_balances still default; only batches were restricted here
        for _ in 0..5 {
            store.record_batch_update(vec![]);
        }
        assert_eq!(store.snapshot().batches.len(), 2);
    }

    #[test]
    fn test_batch_notification_counts() {
        let store = test_store();
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&notifications);
        store.subscribe(Arc::new(move |n: &Notification| {
            seen.lock().push(match n {
                Notification::Single { .. } => "single",
                Notification::Batch { .. } => "batch",
                Notification::Aggregate { .. } => "aggregate",
            });
        }));

        store.record_batch_update(vec![
            json!({"channelId": "chan-a"}),
            json!({"channelId": "chan-b"}),
        ]);

        // One batch notification, then one per derived single update
        assert_eq!(&*notifications.lock(), &["batch", "single", "single"]);
    }

    #[test]
    fn test_panicking_listener_isolated() {
        let store = test_store();
        let delivered = Arc::new(AtomicUsize::new(0));

        store.subscribe(Arc::new(|_: &Notification| {
            panic!("listener failure");
        }));
        let counter = Arc::clone(&delivered);
        store.subscribe(Arc::new(move |_: &Notification| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        store.record_single_update(json!({"channelId": "chan-1"}));
        store.record_single_update(json!({"channelId": "chan-2"}));

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert_eq!(store.snapshot().channels.len(), 2);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let store = test_store();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let id = store.subscribe(Arc::new(move |_: &Notification| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        store.record_single_update(json!({"channelId": "chan-1"}));
        store.unsubscribe(id);
        store.record_single_update(json!({"channelId": "chan-2"}));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(), 0);
    }
}
