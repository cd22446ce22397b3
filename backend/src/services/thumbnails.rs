//! Thumbnail renderer
//!
//! Thumbnails are keyed by `hex(sha256(video path))`, so a renamed video gets a
//! new thumbnail and the old one becomes an orphan (see [`ThumbnailRenderer::find_orphans`]).
//! A thumbnail whose mtime is not older than its video is reused as is.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::ffmpeg::{FfmpegService, FrameRequest};

const THUMBNAIL_EXTENSION: &str = "webp";

/// Fraction of the duration to seek to, past intros and black frames
const SEEK_RATIO: f64 = 0.33;

/// Something that can turn a video into a single still image
#[async_trait]
pub trait FrameRenderer: Send + Sync {
    async fn render_frame(&self, input: &Path, output: &Path, request: FrameRequest) -> Result<()>;
}

#[async_trait]
impl FrameRenderer for FfmpegService {
    async fn render_frame(&self, input: &Path, output: &Path, request: FrameRequest) -> Result<()> {
        FfmpegService::render_frame(self, input, output, request).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailSource {
    Rendered,
    /// Existing thumbnail was newer than the video
    Cached,
    /// Copied from a `<video>.webp` next to the video
    Sidecar,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {
    pub video_id: String,
    pub thumbnail_path: PathBuf,
    pub size_bytes: u64,
    pub source: ThumbnailSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailFailure {
    pub video_id: String,
    pub error: String,
}

pub type ThumbnailResult = std::result::Result<Thumbnail, ThumbnailFailure>;

/// Stable id for a video path
pub fn video_id_for(file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct ThumbnailRenderer {
    renderer: Arc<dyn FrameRenderer>,
    dir: PathBuf,
    width: u32,
    quality: u8,
}

impl ThumbnailRenderer {
    pub fn new(renderer: Arc<dyn FrameRenderer>, dir: impl Into<PathBuf>, width: u32, quality: u8) -> Self {
        Self {
            renderer,
            dir: dir.into(),
            width,
            quality: quality.min(100),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, video_id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", video_id, THUMBNAIL_EXTENSION))
    }

    /// Produce (or reuse) the thumbnail for `video`. Never retries.
    pub async fn render(&self, video: &Path, known_duration: Option<f64>) -> ThumbnailResult {
        let video_id = video_id_for(&video.to_string_lossy());
        match self.render_inner(video, &video_id, known_duration).await {
            Ok(thumbnail) => Ok(thumbnail),
            Err(e) => {
                warn!(path = %video.display(), error = %e, "Thumbnail generation failed");
                Err(ThumbnailFailure {
                    video_id,
                    error: format!("{:#}", e),
                })
            }
        }
    }

    async fn render_inner(&self, video: &Path, video_id: &str, known_duration: Option<f64>) -> Result<Thumbnail> {
        let output = self.path_for(video_id);
        let video_meta = tokio::fs::metadata(video)
            .await
            .with_context(|| format!("Cannot stat video '{}'", video.display()))?;

        if let Ok(existing) = tokio::fs::metadata(&output).await {
            let fresh = match (existing.modified(), video_meta.modified()) {
                (Ok(thumb_mtime), Ok(video_mtime)) => thumb_mtime >= video_mtime,
                _ => false,
            };
            if fresh {
                debug!(path = %video.display(), "Thumbnail is up to date");
                return Ok(Thumbnail {
                    video_id: video_id.to_string(),
                    thumbnail_path: output,
                    size_bytes: existing.len(),
                    source: ThumbnailSource::Cached,
                });
            }
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Cannot create thumbnail dir '{}'", self.dir.display()))?;

        let sidecar = video.with_extension(THUMBNAIL_EXTENSION);
        if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
            let size_bytes = tokio::fs::copy(&sidecar, &output)
                .await
                .with_context(|| format!("Cannot copy sidecar '{}'", sidecar.display()))?;
            debug!(path = %video.display(), "Copied sidecar thumbnail");
            return Ok(Thumbnail {
                video_id: video_id.to_string(),
                thumbnail_path: output,
                size_bytes,
                source: ThumbnailSource::Sidecar,
            });
        }

        let request = FrameRequest {
            seek: seek_position(known_duration),
            width: self.width,
            quality: self.quality,
        };
        self.renderer.render_frame(video, &output, request).await?;

        let size_bytes = tokio::fs::metadata(&output)
            .await
            .with_context(|| format!("Renderer produced no file at '{}'", output.display()))?
            .len();

        Ok(Thumbnail {
            video_id: video_id.to_string(),
            thumbnail_path: output,
            size_bytes,
            source: ThumbnailSource::Rendered,
        })
    }

    /// Remove the thumbnail for `video_id`; false when there was none
    pub async fn delete(&self, video_id: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.path_for(video_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).context("Failed to delete thumbnail"),
        }
    }

    /// Thumbnail files whose id is not in `known_ids`
    pub async fn find_orphans(&self, known_ids: &HashSet<String>) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Failed to list thumbnail dir"),
        };

        let mut orphans = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(THUMBNAIL_EXTENSION) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !known_ids.contains(id) {
                orphans.push(path);
            }
        }
        orphans.sort();
        Ok(orphans)
    }

    pub async fn remove_orphans(&self, known_ids: &HashSet<String>) -> Result<usize> {
        let orphans = self.find_orphans(known_ids).await?;
        let mut removed = 0;
        for orphan in &orphans {
            match tokio::fs::remove_file(orphan).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %orphan.display(), error = %e, "Failed to remove orphaned thumbnail"),
            }
        }
        if removed > 0 {
            info!(removed, "Removed orphaned thumbnails");
        }
        Ok(removed)
    }
}

/// 33% into the video, never earlier than one second
pub fn seek_position(known_duration: Option<f64>) -> Duration {
    let secs = known_duration
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d * SEEK_RATIO)
        .unwrap_or(0.0)
        .max(1.0);
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a fixed payload and counts invocations
    #[derive(Default)]
    pub(crate) struct CountingRenderer {
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    #[async_trait]
    impl FrameRenderer for CountingRenderer {
        async fn render_frame(&self, _input: &Path, output: &Path, _request: FrameRequest) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("renderer exploded");
            }
            tokio::fs::write(output, b"RIFFfakewebp").await?;
            Ok(())
        }
    }

    fn setup(renderer: Arc<CountingRenderer>) -> (tempfile::TempDir, ThumbnailRenderer, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"video").unwrap();
        let thumbs = ThumbnailRenderer::new(renderer, dir.path().join("thumbs"), 300, 70);
        (dir, thumbs, video)
    }

    #[test]
    fn test_video_id_is_path_hash() {
        let a = video_id_for("/videos/a.mp4");
        assert_eq!(a.len(), 64);
        assert_eq!(a, video_id_for("/videos/a.mp4"));
        assert_ne!(a, video_id_for("/videos/b.mp4"));
    }

    #[test]
    fn test_seek_position() {
        assert_eq!(seek_position(None), Duration::from_secs(1));
        assert_eq!(seek_position(Some(2.0)), Duration::from_secs(1));
        assert_eq!(seek_position(Some(100.0)), Duration::from_secs_f64(33.0));
    }

    #[tokio::test]
    async fn test_second_render_is_skipped() {
        let renderer = Arc::new(CountingRenderer::default());
        let (_dir, thumbs, video) = setup(renderer.clone());

        let first = thumbs.render(&video, Some(60.0)).await.unwrap();
        assert_eq!(first.source, ThumbnailSource::Rendered);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);

        let second = thumbs.render(&video, Some(60.0)).await.unwrap();
        assert_eq!(second.source, ThumbnailSource::Cached);
        assert_eq!(second.size_bytes, first.size_bytes);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_thumbnail_is_rerendered() {
        let renderer = Arc::new(CountingRenderer::default());
        let (_dir, thumbs, video) = setup(renderer.clone());

        let first = thumbs.render(&video, None).await.unwrap();
        // make the video newer than the thumbnail
        let older = std::time::SystemTime::now() - Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&first.thumbnail_path)
            .unwrap()
            .set_modified(older)
            .unwrap();

        let second = thumbs.render(&video, None).await.unwrap();
        assert_eq!(second.source, ThumbnailSource::Rendered);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sidecar_is_copied() {
        let renderer = Arc::new(CountingRenderer::default());
        let (dir, thumbs, video) = setup(renderer.clone());
        std::fs::write(dir.path().join("clip.webp"), b"sidecar-image").unwrap();

        let thumb = thumbs.render(&video, None).await.unwrap();
        assert_eq!(thumb.source, ThumbnailSource::Sidecar);
        assert_eq!(thumb.size_bytes, 13);
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_is_a_value() {
        let renderer = Arc::new(CountingRenderer { fail: true, ..Default::default() });
        let (_dir, thumbs, video) = setup(renderer);

        let failure = thumbs.render(&video, None).await.unwrap_err();
        assert_eq!(failure.video_id, video_id_for(&video.to_string_lossy()));
        assert!(failure.error.contains("renderer exploded"));

        let missing = thumbs.render(Path::new("/nonexistent/video.mp4"), None).await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn test_orphans_and_delete() {
        let renderer = Arc::new(CountingRenderer::default());
        let (_dir, thumbs, video) = setup(renderer);
        let kept = thumbs.render(&video, None).await.unwrap();
        std::fs::write(thumbs.path_for("deadbeef"), b"x").unwrap();

        let known: HashSet<String> = [kept.video_id.clone()].into_iter().collect();
        assert_eq!(thumbs.find_orphans(&known).await.unwrap(), vec![thumbs.path_for("deadbeef")]);
        assert_eq!(thumbs.remove_orphans(&known).await.unwrap(), 1);
        assert!(thumbs.find_orphans(&known).await.unwrap().is_empty());

        assert!(thumbs.delete(&kept.video_id).await.unwrap());
        assert!(!thumbs.delete(&kept.video_id).await.unwrap());
    }
}
