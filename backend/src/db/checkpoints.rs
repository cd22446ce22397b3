//! Scan checkpoint persistence (single row)

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;

use super::sqlite_helpers::{datetime_to_str, decode_err, str_to_datetime};
use crate::services::scan::types::ScanPhase;

const CHECKPOINT_ID: &str = "scan_checkpoint";

#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub scan_id: String,
    pub mode: String,
    pub phase: ScanPhase,
    pub processed_count: i64,
    pub total_count: i64,
    pub saved_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, SqliteRow> for CheckpointRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let phase: String = row.try_get("phase")?;
        let saved_at: String = row.try_get("saved_at")?;
        Ok(Self {
            scan_id: row.try_get("scan_id")?,
            mode: row.try_get("mode")?,
            phase: ScanPhase::parse(&phase)
                .ok_or_else(|| decode_err(anyhow::anyhow!("Unknown scan phase '{}'", phase)))?,
            processed_count: row.try_get("processed_count")?,
            total_count: row.try_get("total_count")?,
            saved_at: str_to_datetime(&saved_at).map_err(decode_err)?,
        })
    }
}

pub struct CheckpointRepository {
    pool: SqlitePool,
}

impl CheckpointRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or overwrite the one checkpoint row
    pub async fn upsert(&self, record: &CheckpointRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_checkpoint (id, scan_id, mode, phase, processed_count, total_count, saved_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                scan_id = excluded.scan_id,
                mode = excluded.mode,
                phase = excluded.phase,
                processed_count = excluded.processed_count,
                total_count = excluded.total_count,
                saved_at = excluded.saved_at
            "#,
        )
        .bind(CHECKPOINT_ID)
        .bind(&record.scan_id)
        .bind(&record.mode)
        .bind(record.phase.as_str())
        .bind(record.processed_count)
        .bind(record.total_count)
        .bind(datetime_to_str(record.saved_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self) -> Result<Option<CheckpointRecord>> {
        let record = sqlx::query_as::<_, CheckpointRecord>(
            "SELECT * FROM scan_checkpoint WHERE id = ?1",
        )
        .bind(CHECKPOINT_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Returns true when a row was removed
    pub async fn delete(&self) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scan_checkpoint WHERE id = ?1")
            .bind(CHECKPOINT_ID)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
