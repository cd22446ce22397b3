//! Progress broadcast hub
//!
//! Fan-out of scan progress events to any number of live stream subscribers.
//! Each subscriber owns a bounded queue of pre-serialized NDJSON lines. The
//! broadcaster never waits on a subscriber: a full or closed queue drops that
//! subscriber instead.
//!
//! While a scan is in flight the most recent event is replayed to new
//! subscribers right after their `connected` event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::jobs::scheduler::SchedulerStatus;
use crate::services::scan::progress::ProgressMetrics;
use crate::services::scan::types::ScanPhase;

/// Queue depth per subscriber before it is considered too slow
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventType {
    Connected,
    Heartbeat,
    Phase,
    Progress,
    Complete,
    Error,
    ScanStats,
    ControlPause,
    ControlResume,
    ControlCancel,
    SchedulerStatus,
}

/// Change-detection summary sent before the metadata phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipStats {
    pub total_files: usize,
    pub new_files: usize,
    pub changed_files: usize,
    pub unchanged_files: usize,
    pub deleted_files: usize,
    pub unchanged_percentage: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressEventType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<ScanPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_pct: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_elapsed_time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_phase_elapsed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_stats: Option<SkipStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_connections: Option<usize>,
}

impl ProgressEvent {
    pub fn new(kind: ProgressEventType) -> Self {
        Self {
            kind,
            scan_id: None,
            phase: None,
            progress_pct: None,
            processed_files: None,
            total_files: None,
            current_file: None,
            message: None,
            error: None,
            processing_speed: None,
            estimated_time_remaining: None,
            total_elapsed_time: None,
            current_phase_elapsed: None,
            skip_stats: None,
            scheduler: None,
            timestamp: None,
            active_connections: None,
        }
    }

    pub fn connected() -> Self {
        Self::new(ProgressEventType::Connected).with_message("connected")
    }

    pub fn heartbeat() -> Self {
        Self::new(ProgressEventType::Heartbeat)
    }

    pub fn phase(scan_id: &str, phase: ScanPhase, progress_pct: u8, message: impl Into<String>) -> Self {
        let mut event = Self::new(ProgressEventType::Phase).with_scan(scan_id);
        event.phase = Some(phase);
        event.progress_pct = Some(progress_pct);
        event.message = Some(message.into());
        event
    }

    pub fn progress(
        scan_id: &str,
        phase: ScanPhase,
        progress_pct: u8,
        processed: usize,
        total: usize,
    ) -> Self {
        let mut event = Self::new(ProgressEventType::Progress).with_scan(scan_id);
        event.phase = Some(phase);
        event.progress_pct = Some(progress_pct);
        event.processed_files = Some(processed);
        event.total_files = Some(total);
        event
    }

    pub fn complete(scan_id: &str, processed: usize, total: usize, message: impl Into<String>) -> Self {
        let mut event = Self::new(ProgressEventType::Complete).with_scan(scan_id);
        event.phase = Some(ScanPhase::Complete);
        event.progress_pct = Some(100);
        event.processed_files = Some(processed);
        event.total_files = Some(total);
        event.message = Some(message.into());
        event
    }

    pub fn error(scan_id: &str, message: impl Into<String>, error: impl Into<String>) -> Self {
        let mut event = Self::new(ProgressEventType::Error).with_scan(scan_id);
        event.message = Some(message.into());
        event.error = Some(error.into());
        event
    }

    pub fn scan_stats(scan_id: &str, stats: SkipStats) -> Self {
        let mut event = Self::new(ProgressEventType::ScanStats).with_scan(scan_id);
        event.skip_stats = Some(stats);
        event
    }

    pub fn scheduler_status(status: SchedulerStatus, message: impl Into<String>) -> Self {
        let mut event = Self::new(ProgressEventType::SchedulerStatus).with_message(message);
        event.scheduler = Some(status);
        event
    }

    pub fn with_scan(mut self, scan_id: &str) -> Self {
        self.scan_id = Some(scan_id.to_string());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_current_file(mut self, file: impl Into<String>) -> Self {
        self.current_file = Some(file.into());
        self
    }

    pub fn with_metrics(mut self, metrics: &ProgressMetrics) -> Self {
        self.processing_speed = Some(metrics.processing_speed);
        self.estimated_time_remaining = metrics.estimated_time_remaining;
        self.total_elapsed_time = Some(metrics.total_elapsed_time);
        self.current_phase_elapsed = Some(metrics.current_phase_elapsed);
        self
    }

    /// One NDJSON line, newline included
    pub fn to_line(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(mut line) => {
                line.push('\n');
                Some(line)
            }
            Err(e) => {
                warn!(error = %e, "Failed to serialize progress event");
                None
            }
        }
    }

    fn is_replayable(&self) -> bool {
        !matches!(self.kind, ProgressEventType::Connected | ProgressEventType::Heartbeat)
    }
}

struct Subscriber {
    tx: mpsc::Sender<String>,
    connected_at: DateTime<Utc>,
    last_delivery: DateTime<Utc>,
}

#[derive(Default)]
struct HubInner {
    subscribers: HashMap<String, Subscriber>,
    last_event: Option<ProgressEvent>,
    active_scan: Option<String>,
}

/// Point-in-time view of the hub
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSnapshot {
    pub scan_id: Option<String>,
    pub last_event: Option<ProgressEvent>,
    pub connection_count: usize,
}

#[derive(Default)]
pub struct ProgressHub {
    inner: Mutex<HubInner>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. The returned queue already holds `connected`
    /// and, during a scan, the last known event.
    pub fn subscribe(&self, id: impl Into<String>) -> mpsc::Receiver<String> {
        let id = id.into();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let now = Utc::now();

        let mut inner = self.inner.lock();
        let mut connected = ProgressEvent::connected();
        connected.timestamp = Some(now);
        connected.active_connections = Some(inner.subscribers.len() + 1);
        connected.scan_id = inner.active_scan.clone();
        if let Some(line) = connected.to_line() {
            let _ = tx.try_send(line);
        }

        if inner.active_scan.is_some() {
            if let Some(line) = inner.last_event.as_ref().and_then(|e| e.to_line()) {
                let _ = tx.try_send(line);
            }
        }

        inner.subscribers.insert(
            id.clone(),
            Subscriber {
                tx,
                connected_at: now,
                last_delivery: now,
            },
        );
        debug!(connection_id = %id, connections = inner.subscribers.len(), "Progress subscriber connected");
        rx
    }

    pub fn unsubscribe(&self, id: &str) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.subscribers.remove(id).is_some();
        if removed {
            debug!(connection_id = %id, connections = inner.subscribers.len(), "Progress subscriber disconnected");
        }
        removed
    }

    /// Stamp, record and fan out `event`. Returns the number of subscribers reached.
    pub fn broadcast(&self, mut event: ProgressEvent) -> usize {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        event.timestamp = Some(now);
        event.active_connections = Some(inner.subscribers.len());

        let line = event.to_line();
        if event.is_replayable() {
            inner.last_event = Some(event);
        }
        let Some(line) = line else {
            return 0;
        };

        let mut dropped = Vec::new();
        let mut delivered = 0;
        for (id, subscriber) in inner.subscribers.iter_mut() {
            match subscriber.tx.try_send(line.clone()) {
                Ok(()) => {
                    subscriber.last_delivery = now;
                    delivered += 1;
                }
                Err(_) => dropped.push(id.clone()),
            }
        }

        for id in dropped {
            inner.subscribers.remove(&id);
            warn!(connection_id = %id, "Dropping progress subscriber that cannot keep up");
        }
        delivered
    }

    /// Mark `scan_id` as in flight so late subscribers get a replay
    pub fn begin_scan(&self, scan_id: &str) {
        let mut inner = self.inner.lock();
        inner.active_scan = Some(scan_id.to_string());
        inner.last_event = None;
    }

    /// Stop replaying; the last event stays available through `snapshot`
    pub fn end_scan(&self) {
        self.inner.lock().active_scan = None;
    }

    pub fn clear_scan_state(&self) {
        let mut inner = self.inner.lock();
        inner.active_scan = None;
        inner.last_event = None;
    }

    /// Drop every subscriber, ending their streams
    pub fn disconnect_all(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.subscribers.len();
        inner.subscribers.clear();
        count
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn snapshot(&self) -> HubSnapshot {
        let inner = self.inner.lock();
        HubSnapshot {
            scan_id: inner.active_scan.clone(),
            last_event: inner.last_event.clone(),
            connection_count: inner.subscribers.len(),
        }
    }

    /// Remove subscribers whose stream is gone or that have not taken an event for `max_idle`
    pub fn cleanup_stale(&self, max_idle: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(max_idle)
            .ok()
            .and_then(|idle| Utc::now().checked_sub_signed(idle));
        let mut inner = self.inner.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|id, subscriber| {
            let fresh = cutoff.is_none_or(|cutoff| subscriber.last_delivery >= cutoff);
            let keep = !subscriber.tx.is_closed() && fresh;
            if !keep {
                debug!(
                    connection_id = %id,
                    connected_at = %subscriber.connected_at,
                    "Removing stale progress subscriber"
                );
            }
            keep
        });
        before - inner.subscribers.len()
    }

    /// Periodic heartbeat plus stale-connection sweep, until `shutdown` fires
    pub fn spawn_heartbeat(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        hub.broadcast(ProgressEvent::heartbeat());
                        hub.cleanup_stale(STALE_CONNECTION_AGE);
                    }
                }
            }
            debug!("Progress heartbeat stopped");
        })
    }
}

/// Subscribers idle longer than this are swept by the heartbeat task
pub const STALE_CONNECTION_AGE: Duration = Duration::from_secs(30 * 60);

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn next_event(rx: &mut mpsc::Receiver<String>) -> Option<ProgressEvent> {
        rx.try_recv()
            .ok()
            .map(|line| serde_json::from_str(line.trim_end()).unwrap())
    }

    #[test]
    fn test_connected_is_first() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe("a");
        let event = next_event(&mut rx).unwrap();
        assert_eq!(event.kind, ProgressEventType::Connected);
        assert_eq!(event.active_connections, Some(1));
        assert!(next_event(&mut rx).is_none());
    }

    #[test]
    fn test_late_subscriber_gets_replay_during_scan() {
        let hub = ProgressHub::new();
        hub.begin_scan("scan_1");
        hub.broadcast(ProgressEvent::progress("scan_1", ScanPhase::Metadata, 40, 4, 10));

        let mut early = hub.subscribe("early");
        assert_eq!(next_event(&mut early).unwrap().kind, ProgressEventType::Connected);
        let replay = next_event(&mut early).unwrap();
        assert_eq!(replay.kind, ProgressEventType::Progress);
        assert_eq!(replay.processed_files, Some(4));

        let mut late = hub.subscribe("late");
        next_event(&mut late);
        next_event(&mut late);

        hub.broadcast(ProgressEvent::progress("scan_1", ScanPhase::Metadata, 50, 5, 10));
        let a = next_event(&mut early).unwrap();
        let b = next_event(&mut late).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.active_connections, Some(2));
    }

    #[test]
    fn test_no_replay_when_idle() {
        let hub = ProgressHub::new();
        hub.begin_scan("scan_1");
        hub.broadcast(ProgressEvent::complete("scan_1", 3, 3, "done"));
        hub.end_scan();

        let mut rx = hub.subscribe("a");
        next_event(&mut rx);
        assert!(next_event(&mut rx).is_none());
        assert_matches!(hub.snapshot().last_event, Some(ProgressEvent { kind: ProgressEventType::Complete, .. }));
    }

    #[test]
    fn test_broadcast_without_subscribers_records_last_event() {
        let hub = ProgressHub::new();
        hub.begin_scan("scan_1");
        assert_eq!(hub.broadcast(ProgressEvent::phase("scan_1", ScanPhase::Discovery, 0, "discovering")), 0);
        // heartbeats are never replayed
        hub.broadcast(ProgressEvent::heartbeat());

        let snapshot = hub.snapshot();
        assert_eq!(snapshot.scan_id.as_deref(), Some("scan_1"));
        assert_eq!(snapshot.last_event.unwrap().kind, ProgressEventType::Phase);
    }

    #[test]
    fn test_closed_subscriber_is_dropped() {
        let hub = ProgressHub::new();
        let rx = hub.subscribe("gone");
        let mut live = hub.subscribe("live");
        drop(rx);

        assert_eq!(hub.broadcast(ProgressEvent::heartbeat()), 1);
        assert_eq!(hub.connection_count(), 1);
        next_event(&mut live);
        assert_eq!(next_event(&mut live).unwrap().kind, ProgressEventType::Heartbeat);
    }

    #[test]
    fn test_slow_subscriber_is_dropped_without_blocking() {
        let hub = ProgressHub::new();
        let _slow = hub.subscribe("slow");
        let mut fast = hub.subscribe("fast");

        for i in 0..SUBSCRIBER_QUEUE_CAPACITY + 5 {
            hub.broadcast(ProgressEvent::progress("s", ScanPhase::Metadata, 0, i, 100));
            while next_event(&mut fast).is_some() {}
        }

        assert_eq!(hub.connection_count(), 1);
        assert!(!hub.unsubscribe("slow"));
        assert!(hub.unsubscribe("fast"));
    }

    #[test]
    fn test_cleanup_removes_closed() {
        let hub = ProgressHub::new();
        drop(hub.subscribe("a"));
        let _b = hub.subscribe("b");
        assert_eq!(hub.cleanup_stale(STALE_CONNECTION_AGE), 1);
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_all_ends_streams() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe("a");
        assert_eq!(hub.disconnect_all(), 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_event_wire_shape() {
        let event = ProgressEvent::progress("scan_1", ScanPhase::Metadata, 10, 1, 10);
        let json: serde_json::Value = serde_json::from_str(&event.to_line().unwrap()).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["scanId"], "scan_1");
        assert_eq!(json["phase"], "metadata");
        assert_eq!(json["processedFiles"], 1);
        assert!(json.get("error").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task() {
        let hub = Arc::new(ProgressHub::new());
        let mut rx = hub.subscribe("a");
        next_event(&mut rx);

        let shutdown = CancellationToken::new();
        let handle = hub.spawn_heartbeat(Duration::from_secs(30), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(next_event(&mut rx).unwrap().kind, ProgressEventType::Heartbeat);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
