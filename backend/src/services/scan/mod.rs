//! Scan and ingestion engine
//!
//! Discovery, metadata extraction, catalog replace and the pieces that keep a
//! long scan observable and interruptible: resource monitoring, checkpoints,
//! cooperative control and progress metrics.

pub mod changes;
pub mod checkpoint;
pub mod control;
pub mod discovery;
pub mod error;
pub mod orchestrator;
pub mod processor;
pub mod progress;
pub mod records;
pub mod resources;
pub mod settings;
pub mod types;

pub use checkpoint::{CheckpointInfo, CheckpointManager};
pub use control::{ControlResponse, ScanControl};
pub use discovery::DirectoryDiscoverer;
pub use error::{ScanError, ScanResult};
pub use orchestrator::{
    CATALOG_REPLACE_TIMEOUT, ScanOrchestrator, ScanOrchestratorParts, ScanReport, ScanStatus,
    StartScanResponse,
};
pub use processor::{BatchProcessor, ChunkProcessor, StreamProcessor, select_processor};
pub use records::{MediaRecordBuilder, RecordBuilder};
pub use resources::ResourceMonitor;
pub use settings::{ScanSettings, ScanSettingsPatch, ScanSettingsStore, ScheduleSettings};
pub use types::{ExtractedRecord, MediaFile, ScanPhase, ScanState};
