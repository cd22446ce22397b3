//! Liveness and readiness of the scan service

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;
use tracing::warn;

use crate::AppState;
use crate::jobs::ExecutionStatus;
use crate::services::scan::ScanState;

/// Scan engine summary carried by `/healthz`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHealth {
    pub is_scanning: bool,
    pub scan_id: Option<String>,
    /// Current phase while a scan runs, otherwise how the last one ended
    pub state: ScanState,
    pub progress_pct: u8,
    pub resumable: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerHealth {
    pub enabled: bool,
    pub running: bool,
    pub last_execution_status: Option<ExecutionStatus>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub scan: ScanHealth,
    pub scheduler: SchedulerHealth,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyResponse {
    pub ready: bool,
    pub database: bool,
    pub scanning: bool,
    pub video_directories: usize,
    pub progress_streams: usize,
}

/// Healthy while the process serves; a failed last scan shows up as `degraded`
async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let scan = state.orchestrator.status();
    let resumable = match state.orchestrator.checkpoints().can_resume().await {
        Ok(resumable) => resumable,
        Err(e) => {
            warn!(error = %e, "Checkpoint lookup failed during health check");
            false
        }
    };
    let scheduler = state.scheduler.status().await;

    let status = if scan.state == ScanState::Error {
        "degraded"
    } else {
        "healthy"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        scan: ScanHealth {
            is_scanning: scan.is_scanning,
            scan_id: scan.scan_id,
            state: scan.state,
            progress_pct: scan.progress_pct,
            resumable,
        },
        scheduler: SchedulerHealth {
            enabled: scheduler.is_enabled,
            running: scheduler.is_running,
            last_execution_status: scheduler.last_execution_status,
        },
    })
}

/// Ready once the catalog database answers and at least one root is configured
async fn readyz(State(state): State<AppState>) -> Json<ReadyResponse> {
    let db_ok = sqlx::query("SELECT 1")
        .fetch_one(state.db.pool())
        .await
        .is_ok();
    let video_directories = state.config.video_directories.len();

    Json(ReadyResponse {
        ready: db_ok && video_directories > 0,
        database: db_ok,
        scanning: state.orchestrator.is_scanning(),
        video_directories,
        progress_streams: state.hub.connection_count(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
