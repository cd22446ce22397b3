//! Database connection and repositories

pub mod catalog;
pub mod checkpoints;
pub mod schedule;
pub mod sqlite_helpers;

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::info;

pub use catalog::{Catalog, CatalogRepository, CatalogSyncStats};
pub use checkpoints::{CheckpointRecord, CheckpointRepository};
pub use schedule::ScheduleSettingsRepository;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS video_metadata (
        file_path TEXT PRIMARY KEY NOT NULL,
        file_name TEXT NOT NULL,
        title TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        episode INTEGER,
        year INTEGER,
        duration INTEGER,
        last_modified TEXT NOT NULL,
        video_id TEXT NOT NULL,
        thumbnail_path TEXT,
        metadata_extracted_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_video_metadata_video_id ON video_metadata(video_id)",
    r#"
    CREATE TABLE IF NOT EXISTS scan_checkpoint (
        id TEXT PRIMARY KEY NOT NULL,
        scan_id TEXT NOT NULL,
        mode TEXT NOT NULL,
        phase TEXT NOT NULL,
        processed_count INTEGER NOT NULL,
        total_count INTEGER NOT NULL,
        saved_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scan_schedule_settings (
        id TEXT PRIMARY KEY NOT NULL,
        enabled INTEGER NOT NULL,
        schedule_interval TEXT NOT NULL,
        interval_hours INTEGER NOT NULL,
        execution_hour INTEGER NOT NULL,
        execution_minute INTEGER NOT NULL,
        weekly_days TEXT NOT NULL,
        monthly_day INTEGER NOT NULL,
        skip_if_running INTEGER NOT NULL,
        max_execution_time_minutes INTEGER NOT NULL,
        only_when_idle INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
];

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Wrap an existing pool. The schema is not touched.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the SQLite file at `path` and bootstrap the schema
    pub async fn connect(path: &str, max_connections: u32) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
            .with_context(|| format!("Invalid database path '{}'", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at '{}'", path))?;

        let db = Self { pool };
        db.migrate().await?;
        info!(path = %path, "Database ready");
        Ok(db)
    }

    /// Private in-memory database, one connection so every query sees the same data
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory database")?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Idempotent schema bootstrap
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to apply schema")?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn catalog(&self) -> CatalogRepository {
        CatalogRepository::new(self.pool.clone())
    }

    pub fn checkpoints(&self) -> CheckpointRepository {
        CheckpointRepository::new(self.pool.clone())
    }

    pub fn schedule_settings(&self) -> ScheduleSettingsRepository {
        ScheduleSettingsRepository::new(self.pool.clone())
    }
}
