use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::errors::{AppError, WorkflowError};
use crate::models::approval::{ApprovalRequest, ApprovalStatus, MediaKind, Platform, RequestKey};
use crate::models::event::{ApprovalEvent, MediaEvent, MediaUpload};
use crate::notification::webhook::verify_signature;
use crate::schedule::ScheduleSettings;
use crate::workflow::runs::RunSelection;
use crate::workflow::upload::{UploadBatch, UploadSessions};
use crate::workflow::{DecisionOutcome, IntakeReceipt, MediaOutcome, StorySubmission, WorkflowSummary};
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-pressgate-signature";

// ── Request / Response DTOs ──────────────────────────────────

#[derive(Deserialize)]
pub struct ListParams {
    pub status: Option<ApprovalStatus>,
    pub story_id: Option<String>,
}

#[derive(Deserialize)]
pub struct StartUploadRequest {
    pub owner: String,
    pub story_id: String,
    pub platform: Platform,
}

#[derive(Deserialize)]
pub struct UploadItemRequest {
    pub file_name: String,
    /// Where the file is hosted.
    pub reference: String,
}

#[derive(Serialize)]
pub struct UploadItemResponse {
    pub owner: String,
    pub items: usize,
}

#[derive(Deserialize)]
pub struct OpenRunRequest {
    pub workflow_id: String,
    pub candidates: Vec<String>,
}

#[derive(Deserialize)]
pub struct SelectRequest {
    pub pick: String,
}

#[derive(Serialize)]
pub struct ScheduleView {
    #[serde(flatten)]
    pub settings: ScheduleSettings,
    pub utc_offset: String,
    pub within_exclusion_window: bool,
}

/// Hosted-media notification, as sent by the media host.
#[derive(Debug, Deserialize)]
pub struct MediaNotification {
    pub public_id: String,
    #[serde(default)]
    pub resource_type: String,
    pub secure_url: String,
    #[serde(default)]
    pub context: Option<MediaContext>,
}

#[derive(Debug, Deserialize)]
pub struct MediaContext {
    #[serde(default)]
    pub custom: Option<MediaCustom>,
}

#[derive(Debug, Deserialize)]
pub struct MediaCustom {
    pub story_id: Option<String>,
    pub platform: Option<String>,
}

impl MediaNotification {
    /// Translate into a media event; the record key rides in the custom context.
    pub fn into_event(self) -> Result<MediaEvent, AppError> {
        let custom = self
            .context
            .and_then(|c| c.custom)
            .ok_or_else(|| AppError::BadRequest("missing custom context in notification".into()))?;
        let (Some(story_id), Some(platform)) = (custom.story_id, custom.platform) else {
            return Err(AppError::BadRequest(
                "custom context must carry story_id and platform".into(),
            ));
        };
        let platform: Platform = platform.parse().map_err(AppError::BadRequest)?;
        Ok(MediaEvent::Hosted {
            key: RequestKey::new(story_id, platform),
            upload: MediaUpload {
                kind: MediaKind::from_resource_type(&self.resource_type),
                reference: self.secure_url,
            },
        })
    }
}

// ── Probes ───────────────────────────────────────────────────

/// Ready once the store answers a scan.
pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.engine.store().list(&|_| false).await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable")
        }
    }
}

pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.engine.metrics().encode(),
    )
}

// ── Media webhook ────────────────────────────────────────────

pub async fn media_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    if let Some(secret) = state.config.media_webhook_secret.as_deref() {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::InvalidSignature)?;
        if !verify_signature(secret, &body, provided) {
            tracing::warn!("media webhook rejected: bad signature");
            return Err(AppError::InvalidSignature);
        }
    }

    let notification: MediaNotification = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid notification body: {}", e)))?;
    tracing::info!(public_id = %notification.public_id, "media webhook received");

    let event = notification.into_event()?;
    let outcome = state.engine.on_media_event(event).await?;
    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

// ── Stories & requests ───────────────────────────────────────

pub async fn submit_story(
    State(state): State<Arc<AppState>>,
    Json(story): Json<StorySubmission>,
) -> Result<(StatusCode, Json<IntakeReceipt>), AppError> {
    let receipt = state.intake.submit(story).await?;
    let status = if receipt.created.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(receipt)))
}

pub async fn list_requests(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<ApprovalRequest>>, AppError> {
    let mut requests = state
        .engine
        .store()
        .list(&|r| {
            params.status.map_or(true, |s| r.status == s)
                && params.story_id.as_deref().map_or(true, |id| r.story_id == id)
        })
        .await?;
    requests.sort_by(|a, b| {
        (a.created_at, &a.story_id, a.platform).cmp(&(b.created_at, &b.story_id, b.platform))
    });
    Ok(Json(requests))
}

pub async fn get_request(
    State(state): State<Arc<AppState>>,
    Path((story_id, platform)): Path<(String, String)>,
) -> Result<Json<ApprovalRequest>, AppError> {
    let platform: Platform = platform.parse().map_err(AppError::BadRequest)?;
    let record = state
        .engine
        .store()
        .get(&RequestKey::new(story_id, platform))
        .await?;
    Ok(Json(record))
}

pub async fn decide(
    State(state): State<Arc<AppState>>,
    Json(event): Json<ApprovalEvent>,
) -> Result<impl IntoResponse, AppError> {
    let decisions = state.engine.on_approval_event(&event).await?;
    if decisions
        .iter()
        .all(|d| d.outcome == DecisionOutcome::Missing)
    {
        return Err(AppError::NotFound(format!(
            "no requests for story {}",
            event.story_id
        )));
    }
    Ok(Json(json!({ "decisions": decisions })))
}

pub async fn workflow_summary(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<WorkflowSummary>, AppError> {
    let summary = state.intake.workflow_summary(&workflow_id).await?;
    if summary.total == 0 {
        return Err(AppError::NotFound(format!("workflow {}", workflow_id)));
    }
    Ok(Json(summary))
}

// ── Upload sessions ──────────────────────────────────────────

pub async fn start_upload(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartUploadRequest>,
) -> Result<(StatusCode, Json<UploadBatch>), AppError> {
    let key = RequestKey::new(req.story_id, req.platform);
    let record = state.engine.store().get(&key).await?;
    if record.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "request {} is already {}",
            key, record.status
        )));
    }
    state.uploads.start(&req.owner, key);
    let batch = state
        .uploads
        .peek(&req.owner)
        .ok_or_else(|| WorkflowError::SessionNotFound(req.owner.clone()))?;
    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn get_upload(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> Result<Json<UploadBatch>, AppError> {
    state
        .uploads
        .peek(&owner)
        .map(Json)
        .ok_or_else(|| WorkflowError::SessionNotFound(owner).into())
}

pub async fn add_upload_item(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
    Json(req): Json<UploadItemRequest>,
) -> Result<Json<UploadItemResponse>, AppError> {
    let upload = UploadSessions::classify(&req.file_name, req.reference)?;
    let items = state.uploads.add(&owner, upload)?;
    Ok(Json(UploadItemResponse { owner, items }))
}

pub async fn commit_upload(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let Some(event) = state.uploads.finish(&owner)? else {
        return Ok(Json(json!({ "outcome": "empty" })));
    };
    let outcome: MediaOutcome = state.engine.on_media_event(event).await?;
    Ok(Json(json!(outcome)))
}

pub async fn cancel_upload(
    State(state): State<Arc<AppState>>,
    Path(owner): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.uploads.cancel(&owner) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(WorkflowError::SessionNotFound(owner).into())
    }
}

// ── Schedule ─────────────────────────────────────────────────

fn schedule_view(state: &AppState, settings: ScheduleSettings) -> ScheduleView {
    let within = settings.is_within_exclusion_window(Utc::now(), state.schedule.offset());
    ScheduleView {
        settings,
        utc_offset: state.schedule.offset().to_string(),
        within_exclusion_window: within,
    }
}

pub async fn get_schedule(State(state): State<Arc<AppState>>) -> Json<ScheduleView> {
    let settings = state.schedule.get().await;
    Json(schedule_view(&state, settings))
}

pub async fn put_schedule(
    State(state): State<Arc<AppState>>,
    Json(settings): Json<ScheduleSettings>,
) -> Result<Json<ScheduleView>, AppError> {
    let settings = state.schedule.replace(settings).await?;
    Ok(Json(schedule_view(&state, settings)))
}

// ── Batch runs ───────────────────────────────────────────────

pub async fn open_run(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OpenRunRequest>,
) -> Result<StatusCode, AppError> {
    state.runs.open(&req.workflow_id, req.candidates)?;
    Ok(StatusCode::CREATED)
}

pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<RunSelection>, AppError> {
    state
        .runs
        .get(&workflow_id)
        .map(Json)
        .ok_or_else(|| WorkflowError::SessionNotFound(workflow_id).into())
}

pub async fn select_run_candidate(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
    Json(req): Json<SelectRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let selected = state.runs.select(&workflow_id, &req.pick)?;
    Ok(Json(json!({ "workflow_id": workflow_id, "selected": selected })))
}

pub async fn close_run(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let selected = state.runs.close(&workflow_id)?;
    Ok(Json(json!({ "workflow_id": workflow_id, "selected": selected })))
}

// ── Scheduler ────────────────────────────────────────────────

/// Post the next approved request now. Shares the scheduler's single-flight
/// gate, so it never overlaps a scheduled publish.
pub async fn scheduler_tick(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let outcome = state.scheduler.tick().await?;
    Ok(Json(json!({ "published": outcome })))
}
