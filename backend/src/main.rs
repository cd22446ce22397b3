//! videoscan server
//!
//! Wires the scan engine, the scan scheduler and the HTTP surface, then serves
//! until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use videoscan::config::Config;
use videoscan::db::Database;
use videoscan::services::{ProgressHub, create_scan_orchestrator};
use videoscan::{AppState, build_app, jobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "videoscan=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting videoscan");
    tracing::info!(
        directories = ?config.video_directories,
        database = %config.database_path,
        "Configuration loaded"
    );

    let db = Database::connect(&config.database_path, config.database_max_connections).await?;

    let hub = Arc::new(ProgressHub::new());
    let shutdown = CancellationToken::new();
    let heartbeat = hub.spawn_heartbeat(
        Duration::from_secs(config.heartbeat_interval_secs.max(1)),
        shutdown.clone(),
    );

    let orchestrator = create_scan_orchestrator(&config, &db, hub.clone()).await;
    tracing::info!("Scan orchestrator initialized");

    let scheduler = jobs::start_scheduler(orchestrator.clone(), &db, hub.clone()).await?;
    tracing::info!("Scan scheduler started");

    let state = AppState {
        config: config.clone(),
        db,
        hub: hub.clone(),
        orchestrator: orchestrator.clone(),
        scheduler: scheduler.clone(),
    };
    let app = build_app(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            let streams = hub.disconnect_all();
            tracing::info!(streams, "Shutdown requested");
        })
        .await?;

    if let Some(scan_id) = orchestrator.cancel_active() {
        tracing::info!(scan_id = %scan_id, "Cancelled running scan on shutdown");
    }
    shutdown.cancel();
    let _ = heartbeat.await;
    scheduler.shutdown().await?;

    Ok(())
}
