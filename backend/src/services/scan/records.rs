//! Per-file record construction for the metadata phase

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::types::{ExtractedRecord, MediaFile};
use crate::services::filename_parser::parse_video_file_name;
use crate::services::metadata::MetadataExtractor;
use crate::services::thumbnails::{ThumbnailRenderer, video_id_for};

/// Turns a discovered file into a catalog record
#[async_trait]
pub trait RecordBuilder: Send + Sync {
    /// `None` when the file cannot be read at all (e.g. deleted mid-scan)
    async fn build(&self, file: &MediaFile) -> Option<ExtractedRecord>;
}

/// Probe + filename parsing + thumbnail
pub struct MediaRecordBuilder {
    extractor: MetadataExtractor,
    thumbnails: Option<Arc<ThumbnailRenderer>>,
}

impl MediaRecordBuilder {
    pub fn new(extractor: MetadataExtractor, thumbnails: Option<Arc<ThumbnailRenderer>>) -> Self {
        Self { extractor, thumbnails }
    }
}

#[async_trait]
impl RecordBuilder for MediaRecordBuilder {
    async fn build(&self, file: &MediaFile) -> Option<ExtractedRecord> {
        let metadata = match self.extractor.extract(&file.file_path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %file.file_path.display(), error = %e, "Skipping unreadable file");
                return None;
            }
        };

        let parsed = parse_video_file_name(&file.file_name);
        let file_path = file.key();
        let video_id = video_id_for(&file_path);

        let thumbnail_path = match &self.thumbnails {
            Some(renderer) => renderer
                .render(&file.file_path, metadata.duration.map(|d| d as f64))
                .await
                .ok()
                .map(|t| t.thumbnail_path.to_string_lossy().to_string()),
            None => None,
        };

        let title = if parsed.clean_title.is_empty() {
            file.file_name.clone()
        } else {
            parsed.clean_title.clone()
        };

        Some(ExtractedRecord {
            file_path,
            file_name: file.file_name.clone(),
            title,
            file_size: metadata.file_size,
            episode: parsed.episode,
            year: parsed.year(),
            duration: metadata.duration,
            last_modified: metadata.last_modified,
            video_id,
            thumbnail_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::metadata::tests::FakeProbe;
    use crate::services::thumbnails::tests::CountingRenderer;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_build_full_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("202401020304_Night Show ep5_ＡＴＸＸ.mp4");
        std::fs::write(&path, b"data").unwrap();

        let thumbnails = Arc::new(ThumbnailRenderer::new(
            Arc::new(CountingRenderer::default()),
            dir.path().join("thumbs"),
            300,
            70,
        ));
        let builder = MediaRecordBuilder::new(
            MetadataExtractor::new(Arc::new(FakeProbe::default())),
            Some(thumbnails.clone()),
        );

        let file = MediaFile::new(path.clone());
        let record = builder.build(&file).await.unwrap();
        assert_eq!(record.title, "Night Show ep5");
        assert_eq!(record.episode, Some(5));
        assert_eq!(record.year, Some(2024));
        assert_eq!(record.duration, Some(1440));
        assert_eq!(record.video_id, video_id_for(&file.key()));
        let expected_thumb = thumbnails.path_for(&record.video_id).to_string_lossy().to_string();
        assert_eq!(record.thumbnail_path, Some(expected_thumb));
    }

    #[tokio::test]
    async fn test_missing_file_yields_none() {
        let builder = MediaRecordBuilder::new(MetadataExtractor::new(Arc::new(FakeProbe::default())), None);
        let file = MediaFile::new(PathBuf::from("/nonexistent/dir/a.mp4"));
        assert!(builder.build(&file).await.is_none());
    }
}
