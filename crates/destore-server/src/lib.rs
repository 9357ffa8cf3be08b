//! HTTP retrieval surface.
//!
//! A thin axum adapter over the retrieval engine and the extended-retention
//! manager. Three routes:
//!
//! | Method | Path                           |                                    |
//! |--------|--------------------------------|------------------------------------|
//! | GET    | `/files/{uid}`                 | file bytes by `?created_at=RFC3339`|
//! | PUT    | `/files/{uid}/retention-policy`| extend retention (copy-on-first)   |
//! | GET    | `/health`                      | liveness                           |
//!
//! Error kinds map onto status codes in one place: invalid input is 400,
//! missing files are 404, back-end trouble is 502, and a corrupt shard is a
//! 500 — the shard needs repair, not a retry.

pub mod config;

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use destore_storage::{Error, ExtendedRetentionManager, FileStore, LockMode, RetentionAction};
use serde::{Deserialize, Serialize};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn FileStore>,
    /// `None` disables the retention-policy route (503).
    pub retention: Option<Arc<ExtendedRetentionManager>>,
}

/// Per-request deadline; in-flight back-end reads are dropped on expiry.
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/files/:uid", get(get_file))
        .route("/files/:uid/retention-policy", put(set_retention_policy))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(err: Error) -> Response {
    let status = match &err {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Backend(_) => StatusCode::BAD_GATEWAY,
        Error::Shard(_) | Error::ShardTooLarge { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(status = %status, error = %err, "request failed");
    }
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(msg: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody { error: msg.into() }),
    )
        .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct GetFileQuery {
    created_at: String,
}

fn parse_created_at(raw: &str) -> Result<DateTime<Utc>, ()> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| ())
}

/// `GET /files/{uid}?created_at=<RFC3339>` — the raw file bytes.
async fn get_file(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Query(query): Query<GetFileQuery>,
) -> Response {
    let Ok(created_at) = parse_created_at(&query.created_at) else {
        return bad_request(format!("invalid created_at: {:?}", query.created_at));
    };

    match state.store.get_file(&uid, created_at).await {
        Ok(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct RetentionPolicyRequest {
    created_at: DateTime<Utc>,
    due_date: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct RetentionPolicyResponse {
    uid: String,
    created_at: DateTime<Utc>,
    location: &'static str,
    retention_until: DateTime<Utc>,
    action: RetentionAction,
    lock_mode: LockMode,
}

/// `PUT /files/{uid}/retention-policy` — copy-on-first-extend.
async fn set_retention_policy(
    State(state): State<AppState>,
    Path(uid): Path<String>,
    Json(request): Json<RetentionPolicyRequest>,
) -> Response {
    let Some(manager) = &state.retention else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorBody {
                error: "extended retention is not configured".to_string(),
            }),
        )
            .into_response();
    };

    match manager
        .set_retention(&uid, request.created_at, request.due_date, state.store.as_ref())
        .await
    {
        Ok(outcome) => Json(RetentionPolicyResponse {
            uid: outcome.uid,
            created_at: outcome.created_at,
            location: "extended_retention",
            retention_until: outcome.retention_until,
            action: outcome.action,
            lock_mode: outcome.lock_mode,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}
