use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::approval::{ApprovalStatus, RequestKey};

/// Failures of the request store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request {0} already exists")]
    AlreadyExists(RequestKey),

    #[error("request {0} not found")]
    NotFound(RequestKey),

    #[error("invalid request key: {0}")]
    InvalidKey(RequestKey),

    #[error("corrupt record {location}: {reason}")]
    Corrupt { location: String, reason: String },

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Durable read/write failures; retried by the caller's next poll tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Database(_))
    }
}

/// Domain failures of the lifecycle engine.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("stale action on {key}: request is already {current}")]
    StaleAction {
        key: RequestKey,
        current: ApprovalStatus,
    },

    #[error("media fallback failed for {key}: {reason}")]
    MediaFallbackFailed { key: RequestKey, reason: String },

    #[error("publish failed for {key}: {reason}")]
    PublishFailed { key: RequestKey, reason: String },

    #[error("media rejected for {key}: {reason}")]
    MediaRejected { key: RequestKey, reason: String },

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("no open session {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of the persisted schedule settings.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid schedule setting: {0}")]
    Invalid(String),

    #[error("schedule io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("schedule encoding error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Errors surfaced by the HTTP ingestion port.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match &self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m.clone()),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.clone()),
            AppError::Conflict(m) => (StatusCode::CONFLICT, "conflict", m.clone()),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                "signature missing or invalid".to_string(),
            ),
            AppError::Store(StoreError::NotFound(key)) => {
                (StatusCode::NOT_FOUND, "not_found", format!("request {} not found", key))
            }
            AppError::Store(StoreError::AlreadyExists(key)) => (
                StatusCode::CONFLICT,
                "already_exists",
                format!("request {} already exists", key),
            ),
            AppError::Store(StoreError::InvalidKey(key)) => (
                StatusCode::BAD_REQUEST,
                "invalid_key",
                format!("invalid request key {}", key),
            ),
            AppError::Workflow(WorkflowError::MediaRejected { key, reason }) => (
                StatusCode::CONFLICT,
                "media_rejected",
                format!("media rejected for {}: {}", key, reason),
            ),
            AppError::Schedule(ScheduleError::Invalid(m)) => {
                (StatusCode::BAD_REQUEST, "invalid_schedule", m.clone())
            }
            AppError::Workflow(WorkflowError::SessionNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "session_not_found",
                format!("no open session {}", id),
            ),
            AppError::Workflow(WorkflowError::InvalidEvent(m)) => {
                (StatusCode::BAD_REQUEST, "invalid_event", m.clone())
            }
            AppError::Workflow(WorkflowError::Store(StoreError::InvalidKey(key))) => (
                StatusCode::BAD_REQUEST,
                "invalid_key",
                format!("invalid request key {}", key),
            ),
            AppError::Workflow(WorkflowError::Store(StoreError::NotFound(key))) => {
                (StatusCode::NOT_FOUND, "not_found", format!("request {} not found", key))
            }
            other => {
                tracing::error!("internal error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
