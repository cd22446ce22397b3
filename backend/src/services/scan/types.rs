//! Core data shapes shared across the scan pipeline

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A video file found during discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaFile {
    /// Absolute path; the natural key throughout the pipeline
    pub file_path: PathBuf,
    pub file_name: String,
}

impl MediaFile {
    pub fn new(file_path: PathBuf) -> Self {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { file_path, file_name }
    }

    /// Path rendered as the string key used by the catalog
    pub fn key(&self) -> String {
        self.file_path.to_string_lossy().to_string()
    }
}

/// The unit persisted to the catalog, one per unique file path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRecord {
    pub file_path: String,
    pub file_name: String,
    pub title: String,
    pub file_size: i64,
    pub episode: Option<i32>,
    pub year: Option<i32>,
    /// Whole seconds, only present when the probe reported a positive duration
    pub duration: Option<i64>,
    pub last_modified: DateTime<Utc>,
    /// hex(sha256(file_path))
    pub video_id: String,
    pub thumbnail_path: Option<String>,
}

/// Phase of a running scan, as reported on progress events and checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    Discovery,
    Metadata,
    Database,
    Complete,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Discovery => "discovery",
            ScanPhase::Metadata => "metadata",
            ScanPhase::Database => "database",
            ScanPhase::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "discovery" => Some(ScanPhase::Discovery),
            "metadata" => Some(ScanPhase::Metadata),
            "database" => Some(ScanPhase::Database),
            "complete" => Some(ScanPhase::Complete),
            _ => None,
        }
    }
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of the scan engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "phase", rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Discovery,
    Metadata,
    Database,
    /// Paused inside the given phase
    Paused(ScanPhase),
    Complete,
    Error,
    Cancelled,
}

impl ScanState {
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            ScanState::Discovery | ScanState::Metadata | ScanState::Database | ScanState::Paused(_)
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ScanState) -> bool {
        use ScanState::*;
        match (*self, next) {
            // terminal states can only restart
            (Idle | Complete | Error | Cancelled, Discovery) => true,
            (Discovery, Metadata) => true,
            (Metadata, Database) => true,
            (Database, Complete) => true,
            (Metadata, Paused(ScanPhase::Metadata)) => true,
            (Database, Paused(ScanPhase::Database)) => true,
            (Paused(ScanPhase::Metadata), Metadata) => true,
            (Paused(ScanPhase::Database), Database) => true,
            (from, Error | Cancelled) => from.is_in_flight(),
            (Complete | Error | Cancelled, Idle) => true,
            _ => false,
        }
    }
}
