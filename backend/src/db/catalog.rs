//! Video catalog repository
//!
//! The catalog is only ever written as a whole: a scan hands over the complete
//! record set and `replace_all` swaps the table contents inside one transaction.
//! Readers outside the transaction see either the old or the new catalog.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;
use tracing::{debug, info};

use super::sqlite_helpers::{datetime_to_str, decode_err, str_to_datetime};
use crate::services::scan::types::ExtractedRecord;

/// Row counts from a catalog replace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogSyncStats {
    pub deleted: u64,
    pub inserted: u64,
}

/// Persisted catalog as seen by the scan orchestrator
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn load_all(&self) -> Result<Vec<ExtractedRecord>>;

    async fn count(&self) -> Result<i64>;

    /// Delete every row then insert `records`, all-or-nothing
    async fn replace_all(&self, records: &[ExtractedRecord]) -> Result<CatalogSyncStats>;
}

impl sqlx::FromRow<'_, SqliteRow> for ExtractedRecord {
    fn from_row(row: &SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let last_modified: String = row.try_get("last_modified")?;
        Ok(Self {
            file_path: row.try_get("file_path")?,
            file_name: row.try_get("file_name")?,
            title: row.try_get("title")?,
            file_size: row.try_get("file_size")?,
            episode: row.try_get("episode")?,
            year: row.try_get("year")?,
            duration: row.try_get("duration")?,
            last_modified: str_to_datetime(&last_modified).map_err(decode_err)?,
            video_id: row.try_get("video_id")?,
            thumbnail_path: row.try_get("thumbnail_path")?,
        })
    }
}

pub struct CatalogRepository {
    pool: SqlitePool,
}

impl CatalogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_path(&self, file_path: &str) -> Result<Option<ExtractedRecord>> {
        let record = sqlx::query_as::<_, ExtractedRecord>(
            "SELECT * FROM video_metadata WHERE file_path = ?1",
        )
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl Catalog for CatalogRepository {
    async fn load_all(&self) -> Result<Vec<ExtractedRecord>> {
        let records = sqlx::query_as::<_, ExtractedRecord>(
            "SELECT * FROM video_metadata ORDER BY file_path",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load catalog")?;

        Ok(records)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM video_metadata")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn replace_all(&self, records: &[ExtractedRecord]) -> Result<CatalogSyncStats> {
        let mut tx = self.pool.begin().await.context("Failed to begin catalog transaction")?;

        let deleted = sqlx::query("DELETE FROM video_metadata")
            .execute(&mut *tx)
            .await
            .context("Failed to clear catalog")?
            .rows_affected();

        let extracted_at = datetime_to_str(chrono::Utc::now());
        let mut inserted = 0u64;
        for record in records {
            inserted += sqlx::query(
                r#"
                INSERT INTO video_metadata (
                    file_path, file_name, title, file_size, episode, year, duration,
                    last_modified, video_id, thumbnail_path, metadata_extracted_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )
            .bind(&record.file_path)
            .bind(&record.file_name)
            .bind(&record.title)
            .bind(record.file_size)
            .bind(record.episode)
            .bind(record.year)
            .bind(record.duration)
            .bind(datetime_to_str(record.last_modified))
            .bind(&record.video_id)
            .bind(&record.thumbnail_path)
            .bind(&extracted_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert catalog row for '{}'", record.file_path))?
            .rows_affected();

            if inserted % 1000 == 0 {
                debug!(inserted, total = records.len(), "Catalog insert progress");
            }
        }

        tx.commit().await.context("Failed to commit catalog transaction")?;

        info!(deleted, inserted, "Catalog replaced");
        Ok(CatalogSyncStats { deleted, inserted })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn record(path: &str) -> ExtractedRecord {
        ExtractedRecord {
            file_path: path.to_string(),
            file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
            title: "Title".to_string(),
            file_size: 1024,
            episode: Some(3),
            year: None,
            duration: Some(1440),
            last_modified: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            video_id: format!("id-{}", path),
            thumbnail_path: None,
        }
    }

    #[tokio::test]
    async fn test_replace_all_swaps_contents() {
        let db = Database::in_memory().await.unwrap();
        let catalog = db.catalog();

        let first = vec![record("/v/a.mp4"), record("/v/b.mp4")];
        let stats = catalog.replace_all(&first).await.unwrap();
        assert_eq!(stats, CatalogSyncStats { deleted: 0, inserted: 2 });

        let second = vec![record("/v/c.mp4")];
        let stats = catalog.replace_all(&second).await.unwrap();
        assert_eq!(stats, CatalogSyncStats { deleted: 2, inserted: 1 });

        assert_eq!(catalog.load_all().await.unwrap(), second);
        assert_eq!(catalog.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_replace_rolls_back() {
        let db = Database::in_memory().await.unwrap();
        let catalog = db.catalog();
        let original = vec![record("/v/a.mp4")];
        catalog.replace_all(&original).await.unwrap();

        // duplicate primary key aborts the transaction after the delete ran
        let broken = vec![record("/v/x.mp4"), record("/v/x.mp4")];
        assert!(catalog.replace_all(&broken).await.is_err());

        assert_eq!(catalog.load_all().await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_get_by_path() {
        let db = Database::in_memory().await.unwrap();
        let catalog = db.catalog();
        catalog.replace_all(&[record("/v/a.mp4")]).await.unwrap();

        let found = catalog.get_by_path("/v/a.mp4").await.unwrap().unwrap();
        assert_eq!(found.duration, Some(1440));
        assert!(catalog.get_by_path("/v/missing.mp4").await.unwrap().is_none());
    }
}
