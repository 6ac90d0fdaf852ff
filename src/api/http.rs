//! HTTP server setup with Axum

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use chrono::Utc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use super::rest;
use super::stream::stream_handler;
use crate::metrics::MetricsAggregator;
use crate::repository::EventRepository;
use crate::store::EventStore;
use crate::types::{EventMessage, StreamMessage};

/// Shared state for all endpoints
pub struct AppState {
    pub store: Arc<EventStore>,
    /// Absent when the service runs memory-only; history reads then
    /// answer 503.
    pub repository: Option<Arc<EventRepository>>,
    pub metrics: Option<Arc<MetricsAggregator>>,
    /// Fan-out channel bridging store notifications to stream clients
    pub stream_tx: broadcast::Sender<StreamMessage>,
    pub stream_heartbeat: Duration,
}

impl AppState {
    /// Build the state and register the store→stream bridge. Slow or
    /// gone stream clients only affect their own broadcast receiver.
    pub fn new(
        store: Arc<EventStore>,
        repository: Option<Arc<EventRepository>>,
        metrics: Option<Arc<MetricsAggregator>>,
        stream_heartbeat: Duration,
    ) -> Arc<Self> {
        // Buffer 1024 events; a lagging client misses events and gets
        // told to refresh rather than back-pressuring the writer.
        let (stream_tx, _) = broadcast::channel(1024);

        let state = Arc::new(Self {
            store,
            repository,
            metrics,
            stream_tx,
            stream_heartbeat,
        });

        let tx = state.stream_tx.clone();
        let metrics = state.metrics.clone();
        state.store.subscribe(Arc::new(move |notification| {
            let message = StreamMessage::Event(EventMessage {
                notification: notification.clone(),
                received_at: Utc::now(),
                metrics: metrics.as_ref().map(|m| m.snapshot()),
            });
            // Ignore errors - just means no stream clients are connected
            let _ = tx.send(message);
        }));

        state
    }
}

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration - allow all origins for local dashboards
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Push stream endpoint
        .route("/api/stream", get(stream_handler))
        // Health check
        .route("/health", get(health_check))
        // REST endpoints
        .route("/api/snapshot", get(rest::get_snapshot))
        .route("/api/channels/:id/history", get(rest::get_history))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
