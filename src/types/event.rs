//! Core event types flowing through the feed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three message shapes observed on the gateway feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// One entity (channel) changed
    Single,
    /// A list of entities changed together
    Batch,
    /// A list of unrelated balance-style records changed
    Aggregate,
}

impl EventKind {
    /// Stable string form used in persisted rows and API responses
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Single => "single",
            EventKind::Batch => "batch",
            EventKind::Aggregate => "aggregate",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The atomic unit stored and republished by the feed.
///
/// `occurred_at` is always assigned by the store at ingestion time;
/// sender-supplied timestamps are never trusted for ordering or trimming.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Partition key for single updates (repeated updates to the same
    /// channel overwrite in the live view); a fresh UUID for batch and
    /// aggregate records.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Opaque producer-defined payload
    pub payload: Value,
    #[serde(rename = "occurredAt")]
    pub occurred_at: DateTime<Utc>,
    #[serde(rename = "channelId", skip_serializing_if = "Option::is_none")]
    pub partition_key: Option<String>,
}

impl EventRecord {
    /// Build a single-update record. The partition key doubles as the id
    /// so the live map deduplicates repeated updates to one channel.
    pub fn single(payload: Value, occurred_at: DateTime<Utc>) -> Self {
        let key = extract_partition_key(&payload);
        Self {
            id: key.clone(),
            kind: EventKind::Single,
            payload,
            occurred_at,
            partition_key: Some(key),
        }
    }

    /// Build a batch history record covering a list of updates.
    pub fn batch(payload: Value, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: EventKind::Batch,
            payload,
            occurred_at,
            partition_key: None,
        }
    }

    /// Build an aggregate (balance-style) history record.
    pub fn aggregate(payload: Value, occurred_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: EventKind::Aggregate,
            payload,
            occurred_at,
            partition_key: None,
        }
    }
}

/// Derive the partition key for a single-entity update.
///
/// The gateway has used several spellings over time; tolerance lives
/// here, at the ingestion boundary, and nowhere else. Preference order:
/// `channelId`, `channel_id`, `id`, then the `"unknown"` fallback.
pub fn extract_partition_key(payload: &Value) -> String {
    for field in ["channelId", "channel_id", "id"] {
        if let Some(key) = payload.get(field).and_then(Value::as_str) {
            if !key.is_empty() {
                return key.to_string();
            }
        }
    }
    "unknown".to_string()
}
