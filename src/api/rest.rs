//! Snapshot and history endpoints

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::http::AppState;

const DEFAULT_HISTORY_LIMIT: usize = 200;
const MAX_HISTORY_LIMIT: usize = 1000;
const MAX_ID_LEN: usize = 128;

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::BAD_REQUEST,
            Json(Self {
                error: message.into(),
                code: "BAD_REQUEST".to_string(),
            }),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Self {
                error: message.into(),
                code: "UNAVAILABLE".to_string(),
            }),
        )
    }

    pub fn internal(message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(Self {
                error: message.into(),
                code: "INTERNAL_ERROR".to_string(),
            }),
        )
    }
}

/// GET /api/snapshot - current live view
pub async fn get_snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.snapshot())
}

/// Query parameters for history reads
#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

/// GET /api/channels/:id/history - persisted rows for one channel,
/// newest-first, superseded updates included
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> impl IntoResponse {
    // URL decode the id (handles special chars in channel names)
    let decoded = urlencoding::decode(&id)
        .unwrap_or_else(|_| id.clone().into())
        .into_owned();

    if !valid_channel_id(&decoded) {
        return ApiError::bad_request("invalid channel id").into_response();
    }

    let Some(repository) = &state.repository else {
        return ApiError::unavailable("no repository configured").into_response();
    };

    let limit = params.limit.min(MAX_HISTORY_LIMIT);
    match repository.history(&decoded, limit) {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => {
            warn!(channel = %decoded, %err, "history read failed");
            ApiError::internal("history read failed").into_response()
        }
    }
}

fn valid_channel_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= MAX_ID_LEN && !id.chars().any(char::is_control)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::config::RetentionPolicy;
    use crate::repository::EventRepository;
    use crate::store::EventStore;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    fn state_with_repository() -> (Arc<AppState>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let repository = Arc::new(
            EventRepository::open(temp_dir.path(), RetentionPolicy::default()).unwrap(),
        );
        let store = Arc::new(EventStore::with_repository(
            RetentionPolicy::default(),
            Arc::clone(&repository),
        ));
        let state = AppState::new(store, Some(repository), None, Duration::from_secs(15));
        (state, temp_dir)
    }

    #[test]
    fn test_channel_id_validation() {
        assert!(valid_channel_id("chan-1"));
        assert!(!valid_channel_id(""));
        assert!(!valid_channel_id("bad\nid"));
        assert!(!valid_channel_id(&"x".repeat(200)));
    }

    #[tokio::test]
    async fn test_history_returns_superseded_rows_newest_first() {
        let (state, _dir) = state_with_repository();
        state
            .store
            .record_single_update(json!({"channelId": "chan-1", "state": "open"}));
        state
            .store
            .record_single_update(json!({"channelId": "chan-1", "state": "closed"}));

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/channels/chan-1/history")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["payload"]["state"], "closed");
        assert_eq!(rows[1]["payload"]["state"], "open");
        assert_eq!(rows[0]["channelId"], "chan-1");
    }

    #[tokio::test]
    async fn test_malformed_id_is_400() {
        let (state, _dir) = state_with_repository();
        let app = create_router(state);
        let long_id = "x".repeat(200);
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/api/channels/{long_id}/history"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_history_limit_clamped() {
        let (state, _dir) = state_with_repository();
        for i in 0..5 {
            state
                .store
                .record_single_update(json!({"channelId": "chan-1", "seq": i}));
        }

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/channels/chan-1/history?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let rows: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(rows.as_array().unwrap().len(), 2);
    }
}
