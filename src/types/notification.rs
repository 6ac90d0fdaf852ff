//! Store notifications and stream message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;
use crate::types::event::EventRecord;

/// Point-in-time copy of the live store: channels newest-first plus the
/// most recent batch and aggregate history entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub channels: Vec<EventRecord>,
    pub batches: Vec<EventRecord>,
    pub balances: Vec<EventRecord>,
}

/// Notification delivered to store subscribers on every mutation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Single {
        #[serde(rename = "channelId")]
        partition_key: String,
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
        snapshot: StoreSnapshot,
    },
    Batch {
        count: usize,
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
        snapshot: StoreSnapshot,
    },
    Aggregate {
        count: usize,
        #[serde(rename = "occurredAt")]
        occurred_at: DateTime<Utc>,
        snapshot: StoreSnapshot,
    },
}

impl Notification {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Notification::Single { occurred_at, .. }
            | Notification::Batch { occurred_at, .. }
            | Notification::Aggregate { occurred_at, .. } => *occurred_at,
        }
    }

    pub fn snapshot(&self) -> &StoreSnapshot {
        match self {
            Notification::Single { snapshot, .. }
            | Notification::Batch { snapshot, .. }
            | Notification::Aggregate { snapshot, .. } => snapshot,
        }
    }
}

/// Messages pushed to stream subscribers over the long-lived connection.
///
/// Untagged: snapshot and heartbeat messages carry their own `type`
/// field, while event messages inherit the notification's tag
/// (`single` / `batch` / `aggregate`).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StreamMessage {
    Snapshot(SnapshotMessage),
    Event(EventMessage),
    Heartbeat(HeartbeatMessage),
}

/// Initial state sent once when a stream opens
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub snapshot: StoreSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

impl SnapshotMessage {
    pub fn new(snapshot: StoreSnapshot, metrics: Option<MetricsSnapshot>) -> Self {
        Self {
            msg_type: "snapshot",
            snapshot,
            metrics,
        }
    }
}

/// One forwarded store notification, stamped at forwarding time
#[derive(Debug, Clone, Serialize)]
pub struct EventMessage {
    #[serde(flatten)]
    pub notification: Notification,
    #[serde(rename = "receivedAt")]
    pub received_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

/// Periodic keep-alive on otherwise-idle connections
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatMessage {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

impl HeartbeatMessage {
    pub fn new(at: DateTime<Utc>, metrics: Option<MetricsSnapshot>) -> Self {
        Self {
            msg_type: "heartbeat",
            at,
            metrics,
        }
    }
}
