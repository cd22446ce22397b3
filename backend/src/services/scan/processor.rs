//! Metadata-phase execution strategies
//!
//! Two implementations of [`BatchProcessor`] with the same contract: take the
//! files that need work, return one record per readable file, fail with
//! [`ScanError::Cancelled`] as soon as a worker observes cancellation.
//!
//! - [`ChunkProcessor`] splits the list into `maxConcurrentOperations`
//!   contiguous chunks and runs one task per chunk.
//! - [`StreamProcessor`] runs a single producer feeding a bounded channel; the
//!   consumer side reports progress and applies back-off, so a slow consumer
//!   throttles the producer.
//!
//! [`select_processor`] picks the stream strategy from [`STREAM_THRESHOLD`] files up.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::control::ScanControl;
use super::error::{ScanError, ScanResult};
use super::progress::{ProgressCalculator, phase_progress_pct};
use super::records::RecordBuilder;
use super::resources::ResourceMonitor;
use super::settings::{ProcessingPriority, ScanSettingsStore};
use super::types::{ExtractedRecord, MediaFile, ScanPhase};
use crate::services::progress_hub::{ProgressEvent, ProgressHub};

/// File count from which the stream strategy is used
pub const STREAM_THRESHOLD: usize = 1000;

/// Floor for the pressure back-off sleep
const MIN_PRESSURE_BACKOFF: Duration = Duration::from_millis(250);

/// Everything a processor needs from the running scan
#[derive(Clone)]
pub struct ProcessingContext {
    pub scan_id: String,
    pub control: Arc<ScanControl>,
    pub hub: Arc<ProgressHub>,
    pub resources: Arc<ResourceMonitor>,
    pub settings: Arc<ScanSettingsStore>,
    pub builder: Arc<dyn RecordBuilder>,
    pub calculator: ProgressCalculator,
}

#[async_trait]
pub trait BatchProcessor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, files: Vec<MediaFile>, ctx: &ProcessingContext) -> ScanResult<Vec<ExtractedRecord>>;
}

pub fn select_processor(file_count: usize) -> Box<dyn BatchProcessor> {
    if file_count >= STREAM_THRESHOLD {
        Box::new(StreamProcessor)
    } else {
        Box::new(ChunkProcessor)
    }
}

/// Sleep applied when the resource monitor recommends pausing
pub fn pressure_backoff(sleep_interval_ms: u64) -> Duration {
    Duration::from_millis(sleep_interval_ms.saturating_mul(2)).max(MIN_PRESSURE_BACKOFF)
}

/// Shared processed counter plus the per-file reporting/throttling step
struct ProgressTracker {
    processed: AtomicUsize,
    total: usize,
}

impl ProgressTracker {
    fn new(total: usize) -> Self {
        Self {
            processed: AtomicUsize::new(0),
            total,
        }
    }

    fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    async fn file_done(&self, ctx: &ProcessingContext, file: &MediaFile) {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let settings = ctx.settings.get();
        let interval = settings.progress_update_interval.max(1) as usize;

        if processed % interval == 0 || processed == self.total {
            let check = ctx.resources.check_system_resources();
            let metrics = ctx.calculator.calculate(processed, self.total);
            ctx.hub.broadcast(
                ProgressEvent::progress(
                    &ctx.scan_id,
                    ScanPhase::Metadata,
                    phase_progress_pct(ScanPhase::Metadata, processed, self.total),
                    processed,
                    self.total,
                )
                .with_current_file(file.file_name.clone())
                .with_metrics(&metrics)
                .with_message(format!(
                    "Processed {}/{} files (memory {:.0} MB)",
                    processed, self.total, check.memory.used_mb
                )),
            );

            if check.should_pause {
                let backoff = pressure_backoff(settings.sleep_interval_ms);
                warn!(
                    scan_id = %ctx.scan_id,
                    memory_ok = check.memory_ok,
                    cpu_ok = check.cpu_ok,
                    cpu_pct = check.cpu.usage_percent,
                    quiet_hours = check.in_quiet_hours,
                    backoff_ms = backoff.as_millis() as u64,
                    "Resource pressure, backing off"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        if settings.processing_priority == ProcessingPriority::Low && settings.sleep_interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(settings.sleep_interval_ms)).await;
        }
    }
}

/// Contiguous chunks, one task each, sequential inside a chunk
pub struct ChunkProcessor;

impl ChunkProcessor {
    async fn run_chunk(
        files: Vec<MediaFile>,
        ctx: ProcessingContext,
        tracker: Arc<ProgressTracker>,
    ) -> ScanResult<Vec<ExtractedRecord>> {
        let mut records = Vec::with_capacity(files.len());
        for file in &files {
            ctx.control.check_control(&ctx.scan_id).await?;
            if let Some(record) = ctx.builder.build(file).await {
                records.push(record);
            }
            tracker.file_done(&ctx, file).await;
        }
        Ok(records)
    }
}

#[async_trait]
impl BatchProcessor for ChunkProcessor {
    fn name(&self) -> &'static str {
        "chunk"
    }

    async fn process(&self, files: Vec<MediaFile>, ctx: &ProcessingContext) -> ScanResult<Vec<ExtractedRecord>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let workers = ctx.settings.get().max_concurrent_operations.max(1) as usize;
        let chunk_size = files.len().div_ceil(workers);
        let tracker = Arc::new(ProgressTracker::new(files.len()));
        info!(
            scan_id = %ctx.scan_id,
            files = files.len(),
            workers,
            chunk_size,
            "Processing metadata in chunks"
        );

        let mut tasks = JoinSet::new();
        for (index, chunk) in files.chunks(chunk_size).enumerate() {
            let chunk = chunk.to_vec();
            let ctx = ctx.clone();
            let tracker = Arc::clone(&tracker);
            tasks.spawn(async move { (index, Self::run_chunk(chunk, ctx, tracker).await) });
        }

        let mut chunks = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| ScanError::Internal(anyhow::anyhow!("chunk task failed: {}", e)))?;
            // dropping the set aborts the remaining chunks
            chunks.push((index, result?));
        }

        chunks.sort_by_key(|(index, _)| *index);
        let records: Vec<ExtractedRecord> = chunks.into_iter().flat_map(|(_, records)| records).collect();
        debug!(scan_id = %ctx.scan_id, processed = tracker.processed(), records = records.len(), "Chunks finished");
        Ok(records)
    }
}

/// Single producer behind a bounded channel sized by the resource monitor
pub struct StreamProcessor;

#[async_trait]
impl BatchProcessor for StreamProcessor {
    fn name(&self) -> &'static str {
        "stream"
    }

    async fn process(&self, files: Vec<MediaFile>, ctx: &ProcessingContext) -> ScanResult<Vec<ExtractedRecord>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let capacity = ctx.resources.recommend_batch_size().max(1) as usize;
        let tracker = ProgressTracker::new(files.len());
        info!(scan_id = %ctx.scan_id, files = files.len(), capacity, "Processing metadata as a stream");

        let (tx, mut rx) = mpsc::channel::<(MediaFile, Option<ExtractedRecord>)>(capacity);
        let producer_ctx = ctx.clone();
        let producer = tokio::spawn(async move {
            for file in files {
                producer_ctx.control.check_control(&producer_ctx.scan_id).await?;
                let record = producer_ctx.builder.build(&file).await;
                if tx.send((file, record)).await.is_err() {
                    break;
                }
            }
            Ok::<(), ScanError>(())
        });

        let mut records = Vec::with_capacity(tracker.total);
        while let Some((file, record)) = rx.recv().await {
            if let Some(record) = record {
                records.push(record);
            }
            tracker.file_done(ctx, &file).await;
        }

        producer
            .await
            .map_err(|e| ScanError::Internal(anyhow::anyhow!("stream producer failed: {}", e)))??;

        debug!(scan_id = %ctx.scan_id, processed = tracker.processed(), records = records.len(), "Stream finished");
        Ok(records)
    }
}
