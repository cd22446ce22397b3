//! Incremental change detection against the current catalog

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::types::{ExtractedRecord, MediaFile};
use crate::services::progress_hub::SkipStats;

/// Discovered files split by what the catalog already knows about them
#[derive(Debug, Default)]
pub struct ChangePlan {
    /// New and changed files, in discovery order
    pub to_process: Vec<MediaFile>,
    /// Catalog rows reused untouched
    pub unchanged: Vec<ExtractedRecord>,
    pub stats: SkipStats,
}

/// Compare discovered files with `existing` catalog rows by mtime (ms) and size
pub async fn plan_changes(files: &[MediaFile], existing: Vec<ExtractedRecord>) -> ChangePlan {
    let discovered: HashSet<String> = files.iter().map(MediaFile::key).collect();
    let deleted_files = existing
        .iter()
        .filter(|r| !discovered.contains(&r.file_path))
        .count();
    let mut by_path: HashMap<String, ExtractedRecord> =
        existing.into_iter().map(|r| (r.file_path.clone(), r)).collect();

    let mut plan = ChangePlan::default();
    let mut new_files = 0;
    let mut changed_files = 0;

    for file in files {
        let Some(record) = by_path.remove(&file.key()) else {
            new_files += 1;
            plan.to_process.push(file.clone());
            continue;
        };

        match tokio::fs::metadata(&file.file_path).await {
            Ok(stat) => {
                let mtime: Option<DateTime<Utc>> = stat.modified().ok().map(DateTime::from);
                let same_mtime =
                    mtime.is_some_and(|m| m.timestamp_millis() == record.last_modified.timestamp_millis());
                let same_size = i64::try_from(stat.len()).is_ok_and(|len| len == record.file_size);
                if same_mtime && same_size {
                    plan.unchanged.push(record);
                } else {
                    debug!(path = %file.file_path.display(), same_mtime, same_size, "File changed since last scan");
                    changed_files += 1;
                    plan.to_process.push(file.clone());
                }
            }
            Err(e) => {
                warn!(path = %file.file_path.display(), error = %e, "Cannot stat file, treating as changed");
                changed_files += 1;
                plan.to_process.push(file.clone());
            }
        }
    }

    let unchanged_files = plan.unchanged.len();
    plan.stats = SkipStats {
        total_files: files.len(),
        new_files,
        changed_files,
        unchanged_files,
        deleted_files,
        unchanged_percentage: if files.is_empty() {
            0
        } else {
            ((unchanged_files as f64 / files.len() as f64) * 100.0).round() as u8
        },
    };
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    fn record_from_disk(path: &Path) -> ExtractedRecord {
        let stat = std::fs::metadata(path).unwrap();
        let file = MediaFile::new(path.to_path_buf());
        ExtractedRecord {
            file_path: file.key(),
            file_name: file.file_name.clone(),
            title: file.file_name,
            file_size: stat.len() as i64,
            episode: None,
            year: None,
            duration: Some(10),
            last_modified: DateTime::from(stat.modified().unwrap()),
            video_id: "id".to_string(),
            thumbnail_path: None,
        }
    }

    #[tokio::test]
    async fn test_classifies_new_changed_unchanged_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let same = dir.path().join("same.mp4");
        let grown = dir.path().join("grown.mp4");
        let fresh = dir.path().join("fresh.mp4");
        for path in [&same, &grown, &fresh] {
            std::fs::write(path, b"abc").unwrap();
        }

        let mut stale = record_from_disk(&grown);
        stale.file_size = 1;
        let mut removed = record_from_disk(&same);
        removed.file_path = "/gone/removed.mp4".to_string();
        let existing = vec![record_from_disk(&same), stale, removed];

        let files: Vec<MediaFile> = [&same, &grown, &fresh]
            .into_iter()
            .map(|p| MediaFile::new(p.to_path_buf()))
            .collect();
        let plan = plan_changes(&files, existing).await;

        let to_process: Vec<&str> = plan.to_process.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(to_process, vec!["grown.mp4", "fresh.mp4"]);
        assert_eq!(plan.unchanged.len(), 1);
        assert_eq!(plan.unchanged[0].file_name, "same.mp4");
        assert_eq!(
            plan.stats,
            SkipStats {
                total_files: 3,
                new_files: 1,
                changed_files: 1,
                unchanged_files: 1,
                deleted_files: 1,
                unchanged_percentage: 33,
            }
        );
    }

    #[tokio::test]
    async fn test_empty_catalog_processes_everything() {
        let files = vec![MediaFile::new("/videos/a.mp4".into())];
        let plan = plan_changes(&files, Vec::new()).await;
        assert_eq!(plan.to_process.len(), 1);
        assert_eq!(plan.stats.new_files, 1);
        assert_eq!(plan.stats.unchanged_percentage, 0);
    }
}
