//! pressgate: approval-gated, paced publishing of generated stories.
//!
//! The library exposes every component so the binary and the integration
//! tests in `tests/` wire them the same way.

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod notification;
pub mod publish;
pub mod render;
pub mod schedule;
pub mod store;
pub mod workflow;

use config::Config;
use jobs::PostingScheduler;
use schedule::ScheduleStore;
use workflow::runs::BatchRuns;
use workflow::upload::UploadSessions;
use workflow::{Intake, LifecycleEngine};

/// Everything a request handler can reach.
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    pub intake: Intake,
    pub scheduler: PostingScheduler,
    pub uploads: Arc<UploadSessions>,
    pub runs: Arc<BatchRuns>,
    pub schedule: Arc<ScheduleStore>,
    pub config: Config,
}

/// The full HTTP surface: probes, metrics and the media webhook at the root,
/// the admin API under `/api/v1`.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(api::handlers::readiness))
        .route("/metrics", get(api::handlers::metrics))
        .route("/hooks/media", axum::routing::post(api::handlers::media_webhook))
        .nest("/api/v1", api::api_router(state.clone()))
        .with_state(state)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(api::request_id_middleware))
}
