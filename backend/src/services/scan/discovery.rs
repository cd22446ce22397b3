//! Directory discoverer
//!
//! Walks every configured root concurrently and keeps files with a video
//! extension. Missing or unreadable roots are skipped with a warning.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::types::{MediaFile, ScanPhase};
use crate::services::progress_hub::{ProgressEvent, ProgressHub};

/// Video file extensions we recognize
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

pub struct DirectoryDiscoverer {
    roots: Vec<PathBuf>,
    hub: Arc<ProgressHub>,
}

impl DirectoryDiscoverer {
    pub fn new(roots: Vec<PathBuf>, hub: Arc<ProgressHub>) -> Self {
        Self { roots, hub }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Deduplicated video files under all roots, sorted by path
    pub async fn discover(&self, scan_id: &str) -> Vec<MediaFile> {
        self.hub.broadcast(ProgressEvent::phase(
            scan_id,
            ScanPhase::Discovery,
            0,
            format!("Discovering video files in {} directories", self.roots.len()),
        ));

        let walks = self.roots.iter().cloned().map(|root| async move {
            let walked = root.clone();
            match tokio::task::spawn_blocking(move || walk_root(&walked)).await {
                Ok(files) => files,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "Directory walk task failed");
                    Vec::new()
                }
            }
        });

        let unique: BTreeSet<PathBuf> = join_all(walks).await.into_iter().flatten().collect();
        let files: Vec<MediaFile> = unique.into_iter().map(MediaFile::new).collect();

        info!(scan_id = %scan_id, roots = self.roots.len(), files = files.len(), "Discovery complete");
        files
    }
}

/// Blocking walk of one root
fn walk_root(root: &Path) -> Vec<PathBuf> {
    if !root.is_dir() {
        warn!(root = %root.display(), "Video directory does not exist or is not a directory, skipping");
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && is_video_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    debug!(root = %root.display(), files = files.len(), "Walked video directory");
    files
}
