//! Scan engine error taxonomy

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Cooperative stop requested through scan control. Not a failure.
    #[error("scan cancelled")]
    Cancelled,

    #[error("a scan is already running")]
    AlreadyRunning,

    #[error("invalid scan id")]
    InvalidScanId,

    #[error("catalog replace timed out after {0:?}")]
    CatalogTimeout(Duration),

    #[error("catalog replace failed: {0:#}")]
    Catalog(anyhow::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ScanError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ScanError::Cancelled)
    }
}

pub type ScanResult<T> = std::result::Result<T, ScanError>;
