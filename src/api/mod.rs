use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use subtle::ConstantTimeEq;

use crate::AppState;

pub mod handlers;

/// Build the admin API router.
/// All routes are relative; the caller mounts this under `/api/v1`.
pub fn api_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/stories", post(handlers::submit_story))
        .route("/requests", get(handlers::list_requests))
        .route("/requests/:story_id/:platform", get(handlers::get_request))
        .route("/decisions", post(handlers::decide))
        // Interactive upload sessions
        .route("/uploads", post(handlers::start_upload))
        .route(
            "/uploads/:owner",
            get(handlers::get_upload).delete(handlers::cancel_upload),
        )
        .route("/uploads/:owner/items", post(handlers::add_upload_item))
        .route("/uploads/:owner/commit", post(handlers::commit_upload))
        .route("/workflows/:id/summary", get(handlers::workflow_summary))
        .route(
            "/schedule",
            get(handlers::get_schedule).put(handlers::put_schedule),
        )
        // Batch-run candidate selection
        .route("/runs", post(handlers::open_run))
        .route("/runs/:id", get(handlers::get_run))
        .route("/runs/:id/select", post(handlers::select_run_candidate))
        .route("/runs/:id/close", post(handlers::close_run))
        .route("/scheduler/tick", post(handlers::scheduler_tick))
        .layer(middleware::from_fn_with_state(state, admin_auth))
        .fallback(fallback_404)
}

async fn fallback_404() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Middleware: validates `X-Admin-Key` (or a bearer token) against the
/// configured admin key. 401 if missing/invalid, 500 if no key is configured.
async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let provided_key = req
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(|t| t.trim())
        });

    let expected = state.config.admin_key.as_deref().ok_or_else(|| {
        tracing::error!("PRESSGATE_ADMIN_KEY is not set");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    match provided_key {
        Some(k) if bool::from(k.as_bytes().ct_eq(expected.as_bytes())) => Ok(next.run(req).await),
        Some(k) => {
            // Never log the expected key or the full provided key
            let masked = if k.len() > 8 {
                format!("{}…{}", &k[..4], &k[k.len() - 4..])
            } else {
                "****".to_string()
            };
            tracing::warn!("admin API: invalid key (provided: '{}')", masked);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!("admin API: missing X-Admin-Key header");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Middleware: injects a unique X-Request-Id into every response so
/// callers can correlate errors with service logs.
pub async fn request_id_middleware(req: Request, next: Next) -> Response {
    let req_id = uuid::Uuid::new_v4().to_string();
    let mut resp = next.run(req).await;
    if let Ok(val) = axum::http::HeaderValue::from_str(&req_id) {
        resp.headers_mut().insert("x-request-id", val);
    }
    resp
}
