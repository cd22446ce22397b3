//! Checkpoint manager
//!
//! Records which phase a scan reached and how far it got. A checkpoint left
//! behind by a crashed run is reported at the next start, but scans always
//! re-run discovery from scratch; the checkpoint is diagnostic only.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::{CheckpointRecord, CheckpointRepository};

use super::types::ScanPhase;

/// Summary exposed on the status endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointInfo {
    pub exists: bool,
    pub is_valid: bool,
    pub scan_id: Option<String>,
    pub phase: Option<ScanPhase>,
    pub age_minutes: Option<i64>,
    pub progress_pct: Option<u8>,
}

pub struct CheckpointManager {
    repo: CheckpointRepository,
    validity: Duration,
}

impl CheckpointManager {
    pub fn new(repo: CheckpointRepository, validity_hours: i64) -> Self {
        Self {
            repo,
            validity: Duration::hours(validity_hours.max(1)),
        }
    }

    pub async fn save(
        &self,
        scan_id: &str,
        mode: &str,
        phase: ScanPhase,
        processed: usize,
        total: usize,
    ) -> Result<()> {
        let record = CheckpointRecord {
            scan_id: scan_id.to_string(),
            mode: mode.to_string(),
            phase,
            processed_count: processed as i64,
            total_count: total as i64,
            saved_at: Utc::now(),
        };
        self.repo.upsert(&record).await?;
        debug!(scan_id = %scan_id, phase = %phase, processed, total, "Checkpoint saved");
        Ok(())
    }

    /// The stored checkpoint if it still describes an unfinished, recent run.
    /// Stale or inconsistent checkpoints are removed.
    pub async fn get_valid_checkpoint(&self) -> Result<Option<CheckpointRecord>> {
        self.get_valid_checkpoint_at(Utc::now()).await
    }

    pub async fn get_valid_checkpoint_at(&self, now: DateTime<Utc>) -> Result<Option<CheckpointRecord>> {
        let Some(record) = self.repo.get().await? else {
            return Ok(None);
        };

        if self.is_valid(&record, now) {
            return Ok(Some(record));
        }

        info!(scan_id = %record.scan_id, saved_at = %record.saved_at, "Discarding stale checkpoint");
        self.repo.delete().await?;
        Ok(None)
    }

    pub async fn invalidate(&self) -> Result<()> {
        if self.repo.delete().await? {
            debug!("Checkpoint invalidated");
        }
        Ok(())
    }

    pub async fn can_resume(&self) -> Result<bool> {
        Ok(self.get_valid_checkpoint().await?.is_some())
    }

    /// Read-only view of the stored checkpoint; never deletes
    pub async fn checkpoint_info(&self) -> Result<CheckpointInfo> {
        let now = Utc::now();
        let Some(record) = self.repo.get().await? else {
            return Ok(CheckpointInfo {
                exists: false,
                is_valid: false,
                scan_id: None,
                phase: None,
                age_minutes: None,
                progress_pct: None,
            });
        };

        let progress_pct = if record.total_count > 0 {
            ((record.processed_count as f64 / record.total_count as f64) * 100.0).round() as u8
        } else {
            0
        };

        Ok(CheckpointInfo {
            exists: true,
            is_valid: self.is_valid(&record, now),
            scan_id: Some(record.scan_id.clone()),
            phase: Some(record.phase),
            age_minutes: Some((now - record.saved_at).num_minutes()),
            progress_pct: Some(progress_pct.min(100)),
        })
    }

    fn is_valid(&self, record: &CheckpointRecord, now: DateTime<Utc>) -> bool {
        let age = now - record.saved_at;
        age <= self.validity
            && age >= Duration::zero()
            && record.phase != ScanPhase::Complete
            && record.processed_count <= record.total_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn manager() -> (Database, CheckpointManager) {
        let db = Database::in_memory().await.unwrap();
        let manager = CheckpointManager::new(db.checkpoints(), 24);
        (db, manager)
    }

    #[tokio::test]
    async fn test_save_then_read_valid() {
        let (_db, manager) = manager().await;
        manager.save("scan_1", "full", ScanPhase::Metadata, 40, 100).await.unwrap();

        let checkpoint = manager.get_valid_checkpoint().await.unwrap().unwrap();
        assert_eq!(checkpoint.scan_id, "scan_1");
        assert_eq!(checkpoint.phase, ScanPhase::Metadata);
        assert_eq!((checkpoint.processed_count, checkpoint.total_count), (40, 100));

        let info = manager.checkpoint_info().await.unwrap();
        assert!(info.exists && info.is_valid);
        assert_eq!(info.progress_pct, Some(40));
        assert!(manager.can_resume().await.unwrap());
    }

    #[tokio::test]
    async fn test_save_overwrites_previous() {
        let (_db, manager) = manager().await;
        manager.save("scan_1", "full", ScanPhase::Discovery, 0, 10).await.unwrap();
        manager.save("scan_1", "full", ScanPhase::Metadata, 10, 10).await.unwrap();

        let checkpoint = manager.get_valid_checkpoint().await.unwrap().unwrap();
        assert_eq!(checkpoint.phase, ScanPhase::Metadata);
    }

    #[tokio::test]
    async fn test_stale_checkpoint_is_discarded() {
        let (db, manager) = manager().await;
        manager.save("scan_old", "full", ScanPhase::Metadata, 5, 10).await.unwrap();

        let later = Utc::now() + Duration::hours(25);
        assert!(manager.get_valid_checkpoint_at(later).await.unwrap().is_none());
        assert!(db.checkpoints().get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_removes_checkpoint() {
        let (_db, manager) = manager().await;
        manager.save("scan_1", "incremental", ScanPhase::Database, 10, 10).await.unwrap();
        manager.invalidate().await.unwrap();

        assert!(!manager.can_resume().await.unwrap());
        assert!(!manager.checkpoint_info().await.unwrap().exists);
        // idempotent
        manager.invalidate().await.unwrap();
    }

    #[tokio::test]
    async fn test_inconsistent_counts_are_invalid() {
        let (_db, manager) = manager().await;
        manager.save("scan_1", "full", ScanPhase::Metadata, 11, 10).await.unwrap();
        assert!(!manager.checkpoint_info().await.unwrap().is_valid);
        assert!(manager.get_valid_checkpoint().await.unwrap().is_none());
    }
}
