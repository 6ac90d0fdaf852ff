//! Core data structures shared across the crate

pub mod auth;
pub mod event;
pub mod notification;

pub use auth::{Allowance, AuthContext};
pub use event::{extract_partition_key, EventKind, EventRecord};
pub use notification::{
    EventMessage, HeartbeatMessage, Notification, SnapshotMessage, StoreSnapshot, StreamMessage,
};
