//! Throughput, ETA and elapsed-time figures for progress events

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::types::ScanPhase;

/// Share of the bar covered by the metadata phase; the database phase sits at this value
pub const METADATA_PHASE_CEILING_PCT: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMetrics {
    /// Files per second in the current phase, two decimals
    pub processing_speed: f64,
    /// Seconds, `None` until a speed is known
    pub estimated_time_remaining: Option<u64>,
    pub total_elapsed_time: u64,
    pub current_phase_elapsed: u64,
}

/// Holds the scan and phase timers; everything else is computed on demand
#[derive(Debug, Clone)]
pub struct ProgressCalculator {
    scan_started: Instant,
    phase_started: Instant,
}

impl ProgressCalculator {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            scan_started: now,
            phase_started: now,
        }
    }

    /// Restart the phase timer when entering metadata or database
    pub fn start_phase(&mut self) {
        self.phase_started = Instant::now();
    }

    pub fn total_elapsed(&self) -> Duration {
        self.scan_started.elapsed()
    }

    pub fn calculate(&self, processed: usize, total: usize) -> ProgressMetrics {
        compute_metrics(
            processed,
            total,
            self.phase_started.elapsed(),
            self.scan_started.elapsed(),
        )
    }
}

impl Default for ProgressCalculator {
    fn default() -> Self {
        Self::new()
    }
}

pub fn compute_metrics(
    processed: usize,
    total: usize,
    phase_elapsed: Duration,
    total_elapsed: Duration,
) -> ProgressMetrics {
    let phase_secs = phase_elapsed.as_secs_f64();
    let speed = if phase_secs > 0.0 {
        processed as f64 / phase_secs
    } else {
        0.0
    };

    let remaining = total.saturating_sub(processed);
    let estimated_time_remaining = if remaining == 0 {
        Some(0)
    } else if speed > 0.0 {
        Some((remaining as f64 / speed).round() as u64)
    } else {
        None
    };

    ProgressMetrics {
        processing_speed: (speed * 100.0).round() / 100.0,
        estimated_time_remaining,
        total_elapsed_time: total_elapsed.as_secs_f64().round() as u64,
        current_phase_elapsed: phase_secs.round() as u64,
    }
}

/// Overall percentage for `processed` of `total` files in `phase`
pub fn phase_progress_pct(phase: ScanPhase, processed: usize, total: usize) -> u8 {
    match phase {
        ScanPhase::Discovery => 0,
        ScanPhase::Metadata if total == 0 => METADATA_PHASE_CEILING_PCT,
        ScanPhase::Metadata => {
            let done = processed.min(total) as u64 * METADATA_PHASE_CEILING_PCT as u64;
            (done / total as u64) as u8
        }
        ScanPhase::Database => METADATA_PHASE_CEILING_PCT,
        ScanPhase::Complete => 100,
    }
}

/// Compact human form used in progress messages, e.g. `1h 02m 05s`
pub fn format_duration(secs: u64) -> String {
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}
