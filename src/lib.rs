//! statefeed
//!
//! Ingests a continuous feed of state-update messages from a remote
//! party-authenticated gateway, keeps a bounded durable record of the
//! feed, derives rolling metrics from it, and republishes snapshots and
//! live updates to local consumers over HTTP and a push stream.
//!
//! # Modules
//!
//! - `types`: Core data structures (EventRecord, notifications, auth context)
//! - `repository`: Durable append-only event log with retention
//! - `store`: In-memory authoritative view with pub/sub notifications
//! - `metrics`: Rolling feed and workflow counters
//! - `gateway`: Authenticated, auto-reconnecting streaming client
//! - `api`: HTTP snapshot/history endpoints and the push stream
//! - `config`: Environment-driven configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use statefeed::config::{Config, RetentionPolicy};
//! use statefeed::repository::EventRepository;
//! use statefeed::store::EventStore;
//!
//! fn main() -> statefeed::Result<()> {
//!     let config = Config::from_env();
//!     let repository = Arc::new(EventRepository::open(
//!         &config.data_dir,
//!         config.retention.clone(),
//!     )?);
//!     let store = EventStore::with_repository(config.retention.clone(), repository);
//!     let snapshot = store.snapshot();
//!     println!("{} live channels", snapshot.channels.len());
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod repository;
pub mod store;
pub mod types;

// Re-export commonly used items at crate root
pub use config::{Config, RetentionPolicy};
pub use error::{Error, Result};
pub use gateway::{ClientEvent, ConnectionState, GatewayClient, GatewayHandle};
pub use metrics::{MetricsAggregator, MetricsSnapshot, WorkflowKind};
pub use repository::EventRepository;
pub use store::{EventStore, SubscriptionId};
pub use types::{EventKind, EventRecord, Notification, StoreSnapshot};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
