//! Application state and HTTP router construction.
//!
//! Used by [main] and by the integration tests to build the Axum app.

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api;
use crate::config::Config;
use crate::db::Database;
use crate::jobs::ScanScheduler;
use crate::services::{ProgressHub, ScanOrchestrator};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub hub: Arc<ProgressHub>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub scheduler: Arc<ScanScheduler>,
}

/// Build the full Axum router: health probes, /api and layers.
/// Returns Router<()> (state fully applied) for use with axum::serve.
pub fn build_app(state: AppState) -> Router<()> {
    Router::new()
        .merge(api::health::router())
        .nest("/api", api::scan::router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
