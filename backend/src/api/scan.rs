//! Scan engine REST endpoints and the NDJSON progress stream

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};
use uuid::Uuid;

use crate::AppState;
use crate::jobs::SchedulerStatus;
use crate::services::ProgressHub;
use crate::services::scan::{
    CheckpointInfo, ControlResponse, ScanSettings, ScanSettingsPatch, ScanStatus, ScheduleSettings,
    StartScanResponse,
};

type ApiError = (StatusCode, String);

fn internal(e: anyhow::Error) -> ApiError {
    error!(error = %format!("{:#}", e), "Scan API request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Unsubscribes from the hub when the response body is dropped
struct SubscriptionGuard {
    hub: Arc<ProgressHub>,
    connection_id: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(&self.connection_id);
    }
}

/// Long-lived NDJSON stream of progress events
async fn events(State(state): State<AppState>) -> Response {
    let hub = state.orchestrator.hub().clone();
    let connection_id = Uuid::new_v4().to_string();
    let rx = hub.subscribe(connection_id.clone());
    debug!(connection_id = %connection_id, "Progress stream opened");

    let guard = SubscriptionGuard { hub, connection_id };
    let stream = ReceiverStream::new(rx).map(move |line| {
        let _keep = &guard;
        Ok::<_, Infallible>(line)
    });

    (
        [
            (header::CONTENT_TYPE, "application/x-ndjson"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

async fn start_scan(State(state): State<AppState>) -> (StatusCode, Json<StartScanResponse>) {
    let response = state.orchestrator.start_scan();
    let status = if response.success {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(response))
}

fn control_reply(response: ControlResponse) -> (StatusCode, Json<ControlResponse>) {
    let status = if response.success {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(response))
}

async fn pause_scan(State(state): State<AppState>, Path(scan_id): Path<String>) -> impl IntoResponse {
    control_reply(state.orchestrator.pause(&scan_id))
}

async fn resume_scan(State(state): State<AppState>, Path(scan_id): Path<String>) -> impl IntoResponse {
    control_reply(state.orchestrator.resume(&scan_id))
}

async fn cancel_scan(State(state): State<AppState>, Path(scan_id): Path<String>) -> impl IntoResponse {
    control_reply(state.orchestrator.cancel(&scan_id))
}

async fn scan_status(State(state): State<AppState>) -> Json<ScanStatus> {
    Json(state.orchestrator.status())
}

async fn checkpoint(State(state): State<AppState>) -> Result<Json<CheckpointInfo>, ApiError> {
    let info = state
        .orchestrator
        .checkpoints()
        .checkpoint_info()
        .await
        .map_err(internal)?;
    Ok(Json(info))
}

async fn get_settings(State(state): State<AppState>) -> Json<ScanSettings> {
    Json(state.orchestrator.settings().get())
}

async fn update_settings(
    State(state): State<AppState>,
    Json(patch): Json<ScanSettingsPatch>,
) -> Result<Json<ScanSettings>, ApiError> {
    let settings = state.orchestrator.settings().update(patch).await.map_err(internal)?;
    Ok(Json(settings))
}

async fn reset_settings(State(state): State<AppState>) -> Result<Json<ScanSettings>, ApiError> {
    let settings = state.orchestrator.settings().reset().await.map_err(internal)?;
    Ok(Json(settings))
}

async fn get_schedule(State(state): State<AppState>) -> Json<ScheduleSettings> {
    Json(state.scheduler.settings())
}

async fn update_schedule(
    State(state): State<AppState>,
    Json(settings): Json<ScheduleSettings>,
) -> Result<Json<SchedulerStatus>, ApiError> {
    let status = state.scheduler.update_settings(settings).await.map_err(internal)?;
    Ok(Json(status))
}

async fn schedule_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status().await)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/scan/events", get(events))
        .route("/scan/start", post(start_scan))
        .route("/scan/status", get(scan_status))
        .route("/scan/checkpoint", get(checkpoint))
        .route("/scan/{scan_id}/pause", post(pause_scan))
        .route("/scan/{scan_id}/resume", post(resume_scan))
        .route("/scan/{scan_id}/cancel", post(cancel_scan))
        .route("/scan/settings", get(get_settings).put(update_settings))
        .route("/scan/settings/reset", post(reset_settings))
        .route("/scan/schedule", get(get_schedule).put(update_schedule))
        .route("/scan/schedule/status", get(schedule_status))
}
