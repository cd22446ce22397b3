//! Metadata extractor
//!
//! Duration comes from ffprobe; size and mtime always come from a filesystem
//! stat. A file ffprobe cannot read still yields metadata with `duration = None`. Only a
//! file that cannot even be stat'ed is reported as a failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use super::ffmpeg::{FfmpegService, FormatInfo};

/// Default concurrency window for batch extraction
pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// Container probe used by the extractor
#[async_trait]
pub trait FormatProbe: Send + Sync {
    async fn probe_format(&self, path: &Path) -> Result<FormatInfo>;
}

#[async_trait]
impl FormatProbe for FfmpegService {
    async fn probe_format(&self, path: &Path) -> Result<FormatInfo> {
        FfmpegService::probe_format(self, path).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileMetadata {
    pub file_size: i64,
    /// Whole seconds
    pub duration: Option<i64>,
    pub last_modified: DateTime<Utc>,
    /// False when the stat fallback was used
    pub probed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionFailure {
    pub file_path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BatchExtraction {
    pub extracted: Vec<(PathBuf, FileMetadata)>,
    pub failures: Vec<ExtractionFailure>,
}

pub struct MetadataExtractor {
    probe: Arc<dyn FormatProbe>,
}

impl MetadataExtractor {
    pub fn new(probe: Arc<dyn FormatProbe>) -> Self {
        Self { probe }
    }

    /// Probe `path`, falling back to stat-only metadata when probing fails
    pub async fn extract(&self, path: &Path) -> Result<FileMetadata> {
        let stat = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("Cannot stat '{}'", path.display()))?;
        let last_modified: DateTime<Utc> = stat
            .modified()
            .map(DateTime::from)
            .unwrap_or_else(|_| Utc::now());
        let file_size = i64::try_from(stat.len()).unwrap_or(i64::MAX);

        match self.probe.probe_format(path).await {
            Ok(info) => {
                let duration = info
                    .duration_secs
                    .map(|d| d.round() as i64)
                    .filter(|d| *d > 0);
                debug!(
                    path = %path.display(),
                    duration = ?duration,
                    container_size = ?info.size_bytes,
                    "Extracted metadata"
                );
                Ok(FileMetadata {
                    file_size,
                    duration,
                    last_modified,
                    probed: true,
                })
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Probe failed, using file stat only");
                Ok(FileMetadata {
                    file_size,
                    duration: None,
                    last_modified,
                    probed: false,
                })
            }
        }
    }

    /// Extract many files with at most `concurrency` probes in flight
    pub async fn extract_batch(&self, paths: &[PathBuf], concurrency: usize) -> BatchExtraction {
        let results: Vec<(PathBuf, Result<FileMetadata>)> = stream::iter(paths.iter().cloned())
            .map(|path| async move {
                let result = self.extract(&path).await;
                (path, result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut batch = BatchExtraction::default();
        for (path, result) in results {
            match result {
                Ok(metadata) => batch.extracted.push((path, metadata)),
                Err(e) => batch.failures.push(ExtractionFailure {
                    file_path: path,
                    error: format!("{:#}", e),
                }),
            }
        }
        batch
    }
}
