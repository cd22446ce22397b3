//! Scan orchestrator
//!
//! Runs discovery, the metadata phase and the catalog replace for one scan at
//! a time. A start request while a scan is in flight is rejected, never queued.
//!
//! Any error before the database phase (cancellation included) ends the scan
//! with an `error` event and leaves the catalog exactly as it was. The catalog
//! itself is only written by a single transactional replace bounded by
//! [`CATALOG_REPLACE_TIMEOUT`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::changes::plan_changes;
use super::checkpoint::CheckpointManager;
use super::control::{ControlResponse, ScanControl};
use super::discovery::DirectoryDiscoverer;
use super::error::{ScanError, ScanResult};
use super::processor::{ProcessingContext, select_processor};
use super::progress::{METADATA_PHASE_CEILING_PCT, ProgressCalculator, format_duration};
use super::records::RecordBuilder;
use super::resources::ResourceMonitor;
use super::settings::ScanSettingsStore;
use super::types::{ExtractedRecord, ScanPhase, ScanState};
use crate::db::{Catalog, CatalogSyncStats};
use crate::services::progress_hub::{ProgressEvent, ProgressEventType, ProgressHub, SkipStats};
use crate::services::thumbnails::ThumbnailRenderer;

/// Upper bound on the delete + insert transaction
pub const CATALOG_REPLACE_TIMEOUT: Duration = Duration::from_millis(600_000);

const SCAN_ID_SUFFIX_LEN: usize = 9;
const SCAN_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `scan_<unix millis>_<9 random base36 chars>`
pub fn generate_scan_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SCAN_ID_SUFFIX_LEN)
        .map(|_| SCAN_ID_ALPHABET[rng.gen_range(0..SCAN_ID_ALPHABET.len())] as char)
        .collect();
    format!("scan_{}_{}", chrono::Utc::now().timestamp_millis(), suffix)
}

/// Collaborators of the orchestrator, wired once at startup
pub struct ScanOrchestratorParts {
    pub discoverer: DirectoryDiscoverer,
    pub catalog: Arc<dyn Catalog>,
    pub checkpoints: CheckpointManager,
    pub control: Arc<ScanControl>,
    pub hub: Arc<ProgressHub>,
    pub resources: Arc<ResourceMonitor>,
    pub settings: Arc<ScanSettingsStore>,
    pub builder: Arc<dyn RecordBuilder>,
    pub thumbnails: Option<Arc<ThumbnailRenderer>>,
    pub catalog_timeout: Duration,
}

/// What a finished scan did
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub scan_id: String,
    pub total_files: usize,
    /// Records handed to the catalog replace
    pub processed_files: usize,
    pub skip_stats: SkipStats,
    pub catalog: CatalogSyncStats,
    pub orphans_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub is_scanning: bool,
    pub is_paused: bool,
    pub scan_id: Option<String>,
    pub state: ScanState,
    pub progress_pct: u8,
}

pub struct ScanOrchestrator {
    parts: ScanOrchestratorParts,
    is_updating: AtomicBool,
    state: Mutex<ScanState>,
}

impl ScanOrchestrator {
    pub fn new(parts: ScanOrchestratorParts) -> Self {
        Self {
            parts,
            is_updating: AtomicBool::new(false),
            state: Mutex::new(ScanState::Idle),
        }
    }

    pub fn hub(&self) -> &Arc<ProgressHub> {
        &self.parts.hub
    }

    pub fn control(&self) -> &Arc<ScanControl> {
        &self.parts.control
    }

    pub fn settings(&self) -> &Arc<ScanSettingsStore> {
        &self.parts.settings
    }

    pub fn resources(&self) -> &Arc<ResourceMonitor> {
        &self.parts.resources
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.parts.checkpoints
    }

    pub fn is_scanning(&self) -> bool {
        self.is_updating.load(Ordering::SeqCst)
    }

    /// Run a scan to completion on the caller's task
    pub async fn run_scan(&self) -> ScanResult<ScanReport> {
        let scan_id = self.begin()?;
        self.execute(scan_id).await
    }

    /// Start a scan in the background and return its id right away
    pub fn start_scan(self: &Arc<Self>) -> StartScanResponse {
        let scan_id = match self.begin() {
            Ok(scan_id) => scan_id,
            Err(e) => {
                return StartScanResponse {
                    success: false,
                    message: e.to_string(),
                    scan_id: None,
                };
            }
        };

        let orchestrator = Arc::clone(self);
        let spawned_id = scan_id.clone();
        tokio::spawn(async move {
            // outcome is already logged and broadcast
            let _ = orchestrator.execute(spawned_id).await;
        });

        StartScanResponse {
            success: true,
            message: "Scan started".to_string(),
            scan_id: Some(scan_id),
        }
    }

    pub fn pause(&self, scan_id: &str) -> ControlResponse {
        let response = self.parts.control.pause(scan_id);
        self.announce_control(scan_id, ProgressEventType::ControlPause, &response);
        response
    }

    pub fn resume(&self, scan_id: &str) -> ControlResponse {
        let response = self.parts.control.resume(scan_id);
        self.announce_control(scan_id, ProgressEventType::ControlResume, &response);
        response
    }

    pub fn cancel(&self, scan_id: &str) -> ControlResponse {
        let response = self.parts.control.cancel(scan_id);
        self.announce_control(scan_id, ProgressEventType::ControlCancel, &response);
        response
    }

    /// Cancel whatever scan is running, if any
    pub fn cancel_active(&self) -> Option<String> {
        let scan_id = self.parts.control.cancel_active()?;
        let response = ControlResponse::ok("Scan cancellation requested");
        self.announce_control(&scan_id, ProgressEventType::ControlCancel, &response);
        Some(scan_id)
    }

    pub fn status(&self) -> ScanStatus {
        let is_paused = self.parts.control.is_paused();
        let state = match *self.state.lock() {
            ScanState::Metadata if is_paused => ScanState::Paused(ScanPhase::Metadata),
            ScanState::Database if is_paused => ScanState::Paused(ScanPhase::Database),
            state => state,
        };
        let progress_pct = match state {
            ScanState::Idle | ScanState::Discovery => 0,
            ScanState::Complete => 100,
            _ => self
                .parts
                .hub
                .snapshot()
                .last_event
                .and_then(|e| e.progress_pct)
                .unwrap_or(0),
        };

        ScanStatus {
            is_scanning: self.is_scanning(),
            is_paused,
            scan_id: self.parts.control.active_scan_id(),
            state,
            progress_pct,
        }
    }

    /// Claim the single-flight slot and arm control for a new scan id
    fn begin(&self) -> ScanResult<String> {
        if self
            .is_updating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Scan already in progress, rejecting start request");
            return Err(ScanError::AlreadyRunning);
        }

        let scan_id = generate_scan_id();
        self.parts.control.begin(&scan_id);
        self.parts.hub.begin_scan(&scan_id);
        self.set_state(ScanState::Discovery);
        info!(scan_id = %scan_id, "Scan started");
        Ok(scan_id)
    }

    async fn execute(&self, scan_id: String) -> ScanResult<ScanReport> {
        let _guard = ActiveScanGuard {
            orchestrator: self,
            scan_id: &scan_id,
        };

        let result = self.run_phases(&scan_id).await;
        match &result {
            Ok(report) => {
                info!(
                    scan_id = %scan_id,
                    total = report.total_files,
                    processed = report.processed_files,
                    deleted = report.catalog.deleted,
                    inserted = report.catalog.inserted,
                    "Scan finished"
                );
            }
            Err(e) if e.is_cancellation() => {
                self.set_state(ScanState::Cancelled);
                info!(scan_id = %scan_id, "Scan cancelled, catalog left unchanged");
                self.parts
                    .hub
                    .broadcast(ProgressEvent::error(&scan_id, "Scan cancelled", e.to_string()));
            }
            Err(e) => {
                self.set_state(ScanState::Error);
                error!(scan_id = %scan_id, error = %e, "Scan failed");
                self.parts
                    .hub
                    .broadcast(ProgressEvent::error(&scan_id, "Scan failed", e.to_string()));
            }
        }
        result
    }

    async fn run_phases(&self, scan_id: &str) -> ScanResult<ScanReport> {
        let parts = &self.parts;
        let mut calculator = ProgressCalculator::new();

        match parts.checkpoints.get_valid_checkpoint().await {
            Ok(Some(previous)) => info!(
                scan_id = %scan_id,
                previous_scan = %previous.scan_id,
                phase = %previous.phase,
                processed = previous.processed_count,
                total = previous.total_count,
                "Found checkpoint from an unfinished scan, running full discovery"
            ),
            Ok(None) => {}
            Err(e) => warn!(scan_id = %scan_id, error = %e, "Failed to read scan checkpoint"),
        }

        // Discovery
        let files = parts.discoverer.discover(scan_id).await;
        let total = files.len();
        parts.control.check_control(scan_id).await?;

        let existing = parts.catalog.load_all().await?;
        let mode = if existing.is_empty() { "full" } else { "incremental" };
        let plan = plan_changes(&files, existing).await;
        info!(
            scan_id = %scan_id,
            mode,
            total,
            new = plan.stats.new_files,
            changed = plan.stats.changed_files,
            unchanged = plan.stats.unchanged_files,
            deleted = plan.stats.deleted_files,
            "Change detection complete"
        );
        parts.hub.broadcast(
            ProgressEvent::scan_stats(scan_id, plan.stats).with_message(format!(
                "Skipping {} unchanged files ({}%)",
                plan.stats.unchanged_files, plan.stats.unchanged_percentage
            )),
        );
        self.save_checkpoint(scan_id, mode, ScanPhase::Metadata, 0, total).await;

        // Metadata
        self.set_state(ScanState::Metadata);
        calculator.start_phase();
        let processor = select_processor(plan.to_process.len());
        parts.hub.broadcast(ProgressEvent::phase(
            scan_id,
            ScanPhase::Metadata,
            0,
            format!(
                "Extracting metadata for {} files ({} processor)",
                plan.to_process.len(),
                processor.name()
            ),
        ));
        let ctx = ProcessingContext {
            scan_id: scan_id.to_string(),
            control: Arc::clone(&parts.control),
            hub: Arc::clone(&parts.hub),
            resources: Arc::clone(&parts.resources),
            settings: Arc::clone(&parts.settings),
            builder: Arc::clone(&parts.builder),
            calculator: calculator.clone(),
        };
        let processed = processor.process(plan.to_process, &ctx).await?;
        parts.control.check_control(scan_id).await?;

        let mut records: Vec<ExtractedRecord> = plan.unchanged;
        records.extend(processed);
        records.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        self.save_checkpoint(scan_id, mode, ScanPhase::Database, records.len(), total)
            .await;

        // Database
        self.set_state(ScanState::Database);
        calculator.start_phase();
        parts.hub.broadcast(ProgressEvent::phase(
            scan_id,
            ScanPhase::Database,
            METADATA_PHASE_CEILING_PCT,
            format!("Saving {} records to the catalog", records.len()),
        ));
        let catalog = tokio::time::timeout(parts.catalog_timeout, parts.catalog.replace_all(&records))
            .await
            .map_err(|_| ScanError::CatalogTimeout(parts.catalog_timeout))?
            .map_err(ScanError::Catalog)?;

        if let Err(e) = parts.checkpoints.invalidate().await {
            warn!(scan_id = %scan_id, error = %e, "Failed to invalidate checkpoint");
        }

        let orphans_removed = match &parts.thumbnails {
            Some(thumbnails) => {
                let known: HashSet<String> = records.iter().map(|r| r.video_id.clone()).collect();
                thumbnails.remove_orphans(&known).await.unwrap_or_else(|e| {
                    warn!(scan_id = %scan_id, error = %e, "Failed to clean orphaned thumbnails");
                    0
                })
            }
            None => 0,
        };

        // Complete
        self.set_state(ScanState::Complete);
        let metrics = calculator.calculate(records.len(), total);
        parts.hub.broadcast(
            ProgressEvent::complete(
                scan_id,
                records.len(),
                total,
                format!(
                    "Scan complete: {} videos in {}",
                    records.len(),
                    format_duration(calculator.total_elapsed().as_secs())
                ),
            )
            .with_metrics(&metrics),
        );

        Ok(ScanReport {
            scan_id: scan_id.to_string(),
            total_files: total,
            processed_files: records.len(),
            skip_stats: plan.stats,
            catalog,
            orphans_removed,
        })
    }

    async fn save_checkpoint(&self, scan_id: &str, mode: &str, phase: ScanPhase, processed: usize, total: usize) {
        if let Err(e) = self
            .parts
            .checkpoints
            .save(scan_id, mode, phase, processed, total)
            .await
        {
            warn!(scan_id = %scan_id, phase = %phase, error = %e, "Failed to save checkpoint");
        }
    }

    fn set_state(&self, next: ScanState) {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            debug!(from = ?*state, to = ?next, "Scan state transition");
            *state = next;
        } else {
            warn!(from = ?*state, to = ?next, "Ignoring invalid scan state transition");
        }
    }

    fn announce_control(&self, scan_id: &str, kind: ProgressEventType, response: &ControlResponse) {
        if response.success {
            self.parts.hub.broadcast(
                ProgressEvent::new(kind)
                    .with_scan(scan_id)
                    .with_message(response.message.clone()),
            );
        }
    }
}

/// Releases the single-flight slot and control flags however the scan ends
struct ActiveScanGuard<'a> {
    orchestrator: &'a ScanOrchestrator,
    scan_id: &'a str,
}

impl Drop for ActiveScanGuard<'_> {
    fn drop(&mut self) {
        let parts = &self.orchestrator.parts;
        parts.control.end(self.scan_id);
        parts.hub.end_scan();
        self.orchestrator.is_updating.store(false, Ordering::SeqCst);
        debug!(scan_id = %self.scan_id, "Scan slot released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::metadata::MetadataExtractor;
    use crate::services::metadata::tests::FakeProbe;
    use crate::services::scan::records::MediaRecordBuilder;
    use crate::services::scan::resources::tests::FixedSampler;
    use crate::services::scan::settings::ScanSettings;
    use crate::services::scan::types::MediaFile;
    use crate::services::thumbnails::tests::CountingRenderer;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    /// Wraps the real builder with an adjustable per-file delay and a build counter
    struct SlowBuilder {
        inner: MediaRecordBuilder,
        delay_ms: Arc<AtomicU64>,
        built: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RecordBuilder for SlowBuilder {
        async fn build(&self, file: &MediaFile) -> Option<ExtractedRecord> {
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            let record = self.inner.build(file).await;
            self.built.fetch_add(1, Ordering::SeqCst);
            record
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        db: Database,
        orchestrator: Arc<ScanOrchestrator>,
        delay_ms: Arc<AtomicU64>,
        built: Arc<AtomicUsize>,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("videos");
        std::fs::create_dir_all(&root).unwrap();

        let db = Database::in_memory().await.unwrap();
        let hub = Arc::new(ProgressHub::new());
        let settings = Arc::new(ScanSettingsStore::with_settings(
            dir.path().join("settings.json"),
            ScanSettings::default(),
        ));
        let thumbnails = Arc::new(ThumbnailRenderer::new(
            Arc::new(CountingRenderer::default()),
            dir.path().join("thumbs"),
            300,
            70,
        ));
        let delay_ms = Arc::new(AtomicU64::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let builder = SlowBuilder {
            inner: MediaRecordBuilder::new(
                MetadataExtractor::new(Arc::new(FakeProbe::default())),
                Some(thumbnails.clone()),
            ),
            delay_ms: delay_ms.clone(),
            built: built.clone(),
        };

        let orchestrator = Arc::new(ScanOrchestrator::new(ScanOrchestratorParts {
            discoverer: DirectoryDiscoverer::new(vec![root.clone()], hub.clone()),
            catalog: Arc::new(db.catalog()),
            checkpoints: CheckpointManager::new(db.checkpoints(), 24),
            control: Arc::new(ScanControl::new()),
            hub,
            resources: Arc::new(ResourceMonitor::with_sampler(settings.clone(), Box::new(FixedSampler::idle()))),
            settings,
            builder: Arc::new(builder),
            thumbnails: Some(thumbnails),
            catalog_timeout: CATALOG_REPLACE_TIMEOUT,
        }));

        Harness {
            _dir: dir,
            root,
            db,
            orchestrator,
            delay_ms,
            built,
        }
    }

    /// Start a scan on its own task and wait until `files` records were built
    async fn start_and_wait_for(
        h: &Harness,
        files: usize,
    ) -> (String, tokio::task::JoinHandle<ScanResult<ScanReport>>) {
        let scan_id = h.orchestrator.begin().unwrap();
        let orchestrator = h.orchestrator.clone();
        let id = scan_id.clone();
        let handle = tokio::spawn(async move { orchestrator.execute(id).await });

        tokio::time::timeout(Duration::from_secs(10), async {
            while h.built.load(Ordering::SeqCst) < files {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        (scan_id, handle)
    }

    fn write_videos(root: &Path, names: &[&str]) {
        for name in names {
            std::fs::write(root.join(name), b"video-bytes").unwrap();
        }
    }

    #[test]
    fn test_scan_id_shape() {
        let id = generate_scan_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "scan");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert_ne!(id, generate_scan_id());
    }

    #[tokio::test]
    async fn test_full_then_incremental_scan() {
        let h = harness().await;
        write_videos(&h.root, &["a.mp4", "b.mkv", "corrupt.mp4"]);

        let report = h.orchestrator.run_scan().await.unwrap();
        assert_eq!(report.total_files, 3);
        assert_eq!(report.processed_files, 3);
        assert_eq!(report.catalog.inserted, 3);
        assert_eq!(h.db.catalog().count().await.unwrap(), 3);

        let corrupt = h
            .db
            .catalog()
            .get_by_path(&h.root.join("corrupt.mp4").to_string_lossy())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(corrupt.duration, None);

        let status = h.orchestrator.status();
        assert!(!status.is_scanning);
        assert_eq!(status.state, ScanState::Complete);
        assert_eq!(status.progress_pct, 100);
        assert!(!h.orchestrator.checkpoints().checkpoint_info().await.unwrap().exists);

        // second run only picks up the new file and drops the deleted one
        std::fs::remove_file(h.root.join("b.mkv")).unwrap();
        write_videos(&h.root, &["c.webm"]);
        let report = h.orchestrator.run_scan().await.unwrap();
        assert_eq!(report.skip_stats.new_files, 1);
        assert_eq!(report.skip_stats.unchanged_files, 2);
        assert_eq!(report.skip_stats.deleted_files, 1);
        assert_eq!(report.processed_files, 3);
        assert_eq!(report.orphans_removed, 1);
        assert_eq!(h.db.catalog().count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let h = harness().await;
        write_videos(&h.root, &["a.mp4"]);

        let scan_id = h.orchestrator.begin().unwrap();
        assert_matches!(h.orchestrator.run_scan().await, Err(ScanError::AlreadyRunning));
        let rejected = h.orchestrator.start_scan();
        assert!(!rejected.success);
        assert_eq!(rejected.scan_id, None);

        h.orchestrator.execute(scan_id).await.unwrap();
        assert!(!h.orchestrator.is_scanning());
    }

    #[tokio::test]
    async fn test_cancel_leaves_catalog_untouched() {
        let h = harness().await;
        write_videos(&h.root, &["a.mp4", "b.mp4"]);
        h.orchestrator.run_scan().await.unwrap();
        let before = h.db.catalog().load_all().await.unwrap();

        write_videos(&h.root, &["c.mp4", "d.mp4", "e.mp4"]);
        let scan_id = h.orchestrator.begin().unwrap();
        assert!(h.orchestrator.cancel(&scan_id).success);
        assert_matches!(h.orchestrator.execute(scan_id.clone()).await, Err(ScanError::Cancelled));

        assert_eq!(h.db.catalog().load_all().await.unwrap(), before);
        assert_eq!(h.orchestrator.status().state, ScanState::Cancelled);
        assert!(!h.orchestrator.is_scanning());
        // control for the finished scan is gone
        assert!(!h.orchestrator.pause(&scan_id).success);
    }

    #[tokio::test]
    async fn test_cancel_mid_metadata_keeps_previous_catalog() {
        let h = harness().await;
        write_videos(&h.root, &["a.mp4", "b.mp4"]);
        h.orchestrator.run_scan().await.unwrap();
        let before = h.db.catalog().load_all().await.unwrap();

        let names: Vec<String> = (0..30).map(|i| format!("new_{:02}.mp4", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        write_videos(&h.root, &names);
        h.delay_ms.store(20, Ordering::SeqCst);
        h.built.store(0, Ordering::SeqCst);

        let (scan_id, handle) = start_and_wait_for(&h, 3).await;
        assert_eq!(h.orchestrator.status().state, ScanState::Metadata);
        assert!(h.orchestrator.cancel(&scan_id).success);
        assert_matches!(handle.await.unwrap(), Err(ScanError::Cancelled));

        assert!(h.built.load(Ordering::SeqCst) < 30);
        assert_eq!(h.db.catalog().load_all().await.unwrap(), before);
        assert_eq!(h.orchestrator.status().state, ScanState::Cancelled);
        assert!(!h.orchestrator.is_scanning());

        let checkpoint = h.orchestrator.checkpoints().get_valid_checkpoint().await.unwrap().unwrap();
        assert_eq!(checkpoint.scan_id, scan_id);
        assert_eq!(checkpoint.phase, ScanPhase::Metadata);
        assert_eq!(checkpoint.total_count, 32);
        assert!(h.orchestrator.checkpoints().can_resume().await.unwrap());

        // the next scan picks everything up and clears the checkpoint
        h.delay_ms.store(0, Ordering::SeqCst);
        let report = h.orchestrator.run_scan().await.unwrap();
        assert_eq!(report.processed_files, 32);
        assert_eq!(h.db.catalog().count().await.unwrap(), 32);
        assert!(!h.orchestrator.checkpoints().can_resume().await.unwrap());
    }

    #[tokio::test]
    async fn test_pause_then_resume_catalogs_every_file() {
        let h = harness().await;
        let names: Vec<String> = (0..40).map(|i| format!("clip_{:02}.mp4", i)).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        write_videos(&h.root, &names);
        h.delay_ms.store(10, Ordering::SeqCst);

        let (scan_id, handle) = start_and_wait_for(&h, 5).await;
        assert!(h.orchestrator.pause(&scan_id).success);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let status = h.orchestrator.status();
        assert!(status.is_paused);
        assert_eq!(status.state, ScanState::Paused(ScanPhase::Metadata));

        // in-flight files may finish, nothing new starts
        let held = h.built.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.built.load(Ordering::SeqCst), held);

        assert!(h.orchestrator.resume(&scan_id).success);
        let report = handle.await.unwrap().unwrap();
        assert_eq!(report.total_files, 40);
        assert_eq!(report.processed_files, 40);
        assert_eq!(h.db.catalog().count().await.unwrap(), 40);
        assert_eq!(h.orchestrator.status().state, ScanState::Complete);
    }

    #[tokio::test]
    async fn test_control_rejects_unknown_scan() {
        let h = harness().await;
        let response = h.orchestrator.pause("scan_0_nothing");
        assert!(!response.success);
        assert_eq!(response.message, "No scan is running");
    }
}
