//! Scan engine services and the external tools they drive

pub mod ffmpeg;
pub mod filename_parser;
pub mod metadata;
pub mod progress_hub;
pub mod scan;
pub mod thumbnails;

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::Database;

pub use ffmpeg::FfmpegService;
pub use metadata::MetadataExtractor;
pub use progress_hub::{ProgressEvent, ProgressEventType, ProgressHub};
pub use scan::{ScanOrchestrator, ScanOrchestratorParts};
pub use thumbnails::ThumbnailRenderer;

/// Wire the scan engine from configuration
pub async fn create_scan_orchestrator(
    config: &Config,
    db: &Database,
    hub: Arc<ProgressHub>,
) -> Arc<ScanOrchestrator> {
    let ffmpeg = Arc::new(FfmpegService::with_paths(
        config.ffprobe_path.clone(),
        config.ffmpeg_path.clone(),
    ));
    if !ffmpeg.is_available().await {
        warn!(ffprobe = %config.ffprobe_path, "ffprobe not found, durations will be missing");
    }

    let settings = Arc::new(scan::ScanSettingsStore::open(config.scan_settings_path.clone()).await);
    let thumbnails = Arc::new(ThumbnailRenderer::new(
        ffmpeg.clone(),
        config.thumbnail_dir.clone(),
        config.thumbnail_width,
        config.thumbnail_quality,
    ));
    let builder = scan::MediaRecordBuilder::new(MetadataExtractor::new(ffmpeg), Some(thumbnails.clone()));

    info!(
        directories = config.video_directories.len(),
        thumbnail_dir = %config.thumbnail_dir.display(),
        "Scan engine initialized"
    );

    Arc::new(ScanOrchestrator::new(ScanOrchestratorParts {
        discoverer: scan::DirectoryDiscoverer::new(config.video_directories.clone(), hub.clone()),
        catalog: Arc::new(db.catalog()),
        checkpoints: scan::CheckpointManager::new(db.checkpoints(), config.checkpoint_validity_hours),
        control: Arc::new(scan::ScanControl::new()),
        hub,
        resources: Arc::new(scan::ResourceMonitor::new(settings.clone())),
        settings,
        builder: Arc::new(builder),
        thumbnails: Some(thumbnails),
        catalog_timeout: scan::CATALOG_REPLACE_TIMEOUT,
    }))
}
