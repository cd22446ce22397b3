//! Cooperative pause / resume / cancel for the running scan
//!
//! Control is keyed by the active scan id; requests for any other id are
//! rejected. Workers call [`ScanControl::check_control`] between files: it
//! returns immediately when running, parks on a watch channel while paused
//! (waking as soon as resume or cancel arrives) and fails with
//! [`ScanError::Cancelled`] once cancel was requested.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::{ScanError, ScanResult};

/// Reply for control endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Snapshot of the flags for the active scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanControlState {
    pub scan_id: String,
    pub pause_requested: bool,
    pub cancel_requested: bool,
}

struct ActiveScan {
    scan_id: String,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

#[derive(Default)]
pub struct ScanControl {
    active: Mutex<Option<ActiveScan>>,
}

impl ScanControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install fresh flags for `scan_id`, replacing any previous scan's
    pub fn begin(&self, scan_id: &str) {
        let (paused, _) = watch::channel(false);
        *self.active.lock() = Some(ActiveScan {
            scan_id: scan_id.to_string(),
            cancel: CancellationToken::new(),
            paused,
        });
        debug!(scan_id = %scan_id, "Scan control armed");
    }

    /// Drop the flags if `scan_id` is still the active one
    pub fn end(&self, scan_id: &str) {
        let mut active = self.active.lock();
        if active.as_ref().is_some_and(|a| a.scan_id == scan_id) {
            *active = None;
        }
    }

    pub fn active_scan_id(&self) -> Option<String> {
        self.active.lock().as_ref().map(|a| a.scan_id.clone())
    }

    pub fn state(&self) -> Option<ScanControlState> {
        self.active.lock().as_ref().map(|a| ScanControlState {
            scan_id: a.scan_id.clone(),
            pause_requested: *a.paused.borrow(),
            cancel_requested: a.cancel.is_cancelled(),
        })
    }

    pub fn is_paused(&self) -> bool {
        self.state().is_some_and(|s| s.pause_requested && !s.cancel_requested)
    }

    pub fn pause(&self, scan_id: &str) -> ControlResponse {
        self.with_scan(scan_id, |scan| {
            if scan.cancel.is_cancelled() {
                return ControlResponse::rejected("Scan is being cancelled");
            }
            if !scan.paused.send_replace(true) {
                info!(scan_id = %scan_id, "Scan paused");
                ControlResponse::ok("Scan paused")
            } else {
                ControlResponse::rejected("Scan is already paused")
            }
        })
    }

    pub fn resume(&self, scan_id: &str) -> ControlResponse {
        self.with_scan(scan_id, |scan| {
            if scan.paused.send_replace(false) {
                info!(scan_id = %scan_id, "Scan resumed");
                ControlResponse::ok("Scan resumed")
            } else {
                ControlResponse::rejected("Scan is not paused")
            }
        })
    }

    pub fn cancel(&self, scan_id: &str) -> ControlResponse {
        self.with_scan(scan_id, |scan| {
            if scan.cancel.is_cancelled() {
                return ControlResponse::rejected("Scan is already being cancelled");
            }
            scan.cancel.cancel();
            info!(scan_id = %scan_id, "Scan cancellation requested");
            ControlResponse::ok("Scan cancellation requested")
        })
    }

    /// Cancel whatever is running; returns the id that was cancelled
    pub fn cancel_active(&self) -> Option<String> {
        let active = self.active.lock();
        let scan = active.as_ref()?;
        scan.cancel.cancel();
        info!(scan_id = %scan.scan_id, "Active scan cancelled");
        Some(scan.scan_id.clone())
    }

    /// Wait while paused; fail once cancelled
    pub async fn check_control(&self, scan_id: &str) -> ScanResult<()> {
        let (cancel, mut paused) = {
            let active = self.active.lock();
            match active.as_ref() {
                Some(scan) if scan.scan_id == scan_id => (scan.cancel.clone(), scan.paused.subscribe()),
                _ => return Err(ScanError::InvalidScanId),
            }
        };

        loop {
            if cancel.is_cancelled() {
                return Err(ScanError::Cancelled);
            }
            if !*paused.borrow_and_update() {
                return Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(ScanError::Cancelled),
                changed = paused.changed() => {
                    // sender gone means the scan was ended under us
                    if changed.is_err() {
                        return Err(ScanError::Cancelled);
                    }
                }
            }
        }
    }

    fn with_scan(&self, scan_id: &str, f: impl FnOnce(&ActiveScan) -> ControlResponse) -> ControlResponse {
        let active = self.active.lock();
        match active.as_ref() {
            Some(scan) if scan.scan_id == scan_id => f(scan),
            Some(_) => ControlResponse::rejected("Invalid scan ID"),
            None => ControlResponse::rejected("No scan is running"),
        }
    }
}
