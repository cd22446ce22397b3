//! Scheduled re-scans
//!
//! Owns one cron job derived from [`ScheduleSettings`]. Each fire asks the
//! injected [`ScanExecutor`] to run a scan unless a manual scan is active (with
//! `skipIfRunning`) or the machine is busy (with `onlyWhenIdle`). While a
//! scheduled run is active a watchdog checks it against
//! `maxExecutionTimeMinutes`; on timeout the run is marked `timeout` and the
//! scan is cancelled.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::ScheduleSettingsRepository;
use crate::services::progress_hub::{ProgressEvent, ProgressHub};
use crate::services::scan::error::ScanResult;
use crate::services::scan::settings::{ScheduleInterval, ScheduleSettings};

/// How often the watchdog looks at a running scheduled scan
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(60);

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub is_enabled: bool,
    pub is_running: bool,
    pub next_execution: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_execution_status: Option<ExecutionStatus>,
    pub current_execution_start_time: Option<DateTime<Utc>>,
}

/// What the scheduler needs from the scan engine
#[async_trait]
pub trait ScanExecutor: Send + Sync {
    fn is_scan_running(&self) -> bool;

    async fn execute_scan(&self) -> ScanResult<()>;

    /// Cancel the in-flight scan; returns its id
    fn cancel_active_scan(&self) -> Option<String>;

    fn system_is_idle(&self) -> bool;
}

/// Six-field (seconds first) cron pattern for `settings`, local time
pub fn cron_pattern(settings: &ScheduleSettings) -> String {
    let ExecutionTimeParts { hour, minute } = ExecutionTimeParts::from(settings);
    match settings.interval {
        ScheduleInterval::Daily => format!("0 {} {} * * *", minute, hour),
        ScheduleInterval::Weekly => {
            let days: Vec<&str> = settings
                .weekly_days
                .iter()
                .filter_map(|d| WEEKDAY_NAMES.get(if *d == 7 { 0 } else { *d as usize }).copied())
                .collect();
            let days = if days.is_empty() {
                WEEKDAY_NAMES[0].to_string()
            } else {
                days.join(",")
            };
            format!("0 {} {} * * {}", minute, hour, days)
        }
        ScheduleInterval::Monthly => format!("0 {} {} {} * *", minute, hour, settings.monthly_day.clamp(1, 31)),
        ScheduleInterval::Custom if settings.interval_hours >= 24 => format!("0 {} {} * * *", minute, hour),
        ScheduleInterval::Custom => format!("0 {} */{} * * *", minute, settings.interval_hours.max(1)),
    }
}

struct ExecutionTimeParts {
    hour: u8,
    minute: u8,
}

impl From<&ScheduleSettings> for ExecutionTimeParts {
    fn from(settings: &ScheduleSettings) -> Self {
        Self {
            hour: settings.execution_time.hour.min(23),
            minute: settings.execution_time.minute.min(59),
        }
    }
}

#[derive(Default)]
struct RunState {
    settings: ScheduleSettings,
    is_running: bool,
    last_execution: Option<DateTime<Utc>>,
    last_execution_status: Option<ExecutionStatus>,
    current_execution_start_time: Option<DateTime<Utc>>,
    watchdog: Option<CancellationToken>,
}

struct CronHandle {
    scheduler: JobScheduler,
    job_id: Option<Uuid>,
}

pub struct ScanScheduler {
    executor: Arc<dyn ScanExecutor>,
    store: ScheduleSettingsRepository,
    hub: Arc<ProgressHub>,
    state: Mutex<RunState>,
    cron: tokio::sync::Mutex<Option<CronHandle>>,
}

impl ScanScheduler {
    pub fn new(executor: Arc<dyn ScanExecutor>, store: ScheduleSettingsRepository, hub: Arc<ProgressHub>) -> Self {
        Self {
            executor,
            store,
            hub,
            state: Mutex::new(RunState::default()),
            cron: tokio::sync::Mutex::new(None),
        }
    }

    pub fn settings(&self) -> ScheduleSettings {
        self.state.lock().settings.clone()
    }

    /// Load persisted settings and start the timer when enabled
    pub async fn initialize_from_store(self: &Arc<Self>) -> Result<()> {
        match self.store.get().await.context("Failed to load schedule settings")? {
            Some(settings) => {
                self.state.lock().settings = settings.normalized();
                info!("Loaded scan schedule settings");
            }
            None => debug!("No stored scan schedule, using defaults"),
        }

        if self.settings().enabled {
            self.start().await?;
        }
        Ok(())
    }

    /// Register the cron job for the current settings; no-op when disabled
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let settings = self.settings();
        if !settings.enabled {
            info!("Scan schedule is disabled, not starting");
            return Ok(());
        }

        let mut cron = self.cron.lock().await;
        if cron.as_ref().is_some_and(|c| c.job_id.is_some()) {
            debug!("Scan schedule already running");
            return Ok(());
        }

        let pattern = cron_pattern(&settings);
        let weak: Weak<Self> = Arc::downgrade(self);
        let job = Job::new_async_tz(pattern.as_str(), chrono::Local, move |_uuid, _lock| {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.run_scheduled().await;
                }
            })
        })
        .with_context(|| format!("Invalid cron pattern '{}'", pattern))?;

        let handle = match cron.take() {
            Some(handle) => handle,
            None => {
                let scheduler = JobScheduler::new().await.context("Failed to create job scheduler")?;
                scheduler.start().await.context("Failed to start job scheduler")?;
                CronHandle { scheduler, job_id: None }
            }
        };
        let job_id = handle.scheduler.add(job).await.context("Failed to add scan job")?;
        *cron = Some(CronHandle {
            scheduler: handle.scheduler,
            job_id: Some(job_id),
        });

        info!(pattern = %pattern, interval = settings.interval.as_str(), "Scan schedule started");
        Ok(())
    }

    /// Remove the cron job; a scheduled scan already running is left alone
    pub async fn stop(&self) -> Result<()> {
        let mut cron = self.cron.lock().await;
        if let Some(handle) = cron.as_mut() {
            if let Some(job_id) = handle.job_id.take() {
                handle
                    .scheduler
                    .remove(&job_id)
                    .await
                    .context("Failed to remove scan job")?;
                info!("Scan schedule stopped");
            }
        }
        Ok(())
    }

    pub async fn restart(self: &Arc<Self>) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    /// Persist `settings` and move the timer to match
    pub async fn update_settings(self: &Arc<Self>, settings: ScheduleSettings) -> Result<SchedulerStatus> {
        let settings = settings.normalized();
        self.store
            .save(&settings)
            .await
            .context("Failed to save schedule settings")?;

        let was_enabled = {
            let mut state = self.state.lock();
            let was_enabled = state.settings.enabled;
            state.settings = settings.clone();
            was_enabled
        };

        match (was_enabled, settings.enabled) {
            (false, true) => self.start().await?,
            (true, false) => self.stop().await?,
            (true, true) => self.restart().await?,
            (false, false) => {}
        }

        let status = self.status().await;
        self.hub
            .broadcast(ProgressEvent::scheduler_status(status.clone(), "Schedule settings updated"));
        Ok(status)
    }

    pub async fn status(&self) -> SchedulerStatus {
        let next_execution = self.next_execution().await;
        let state = self.state.lock();
        SchedulerStatus {
            is_enabled: state.settings.enabled,
            is_running: state.is_running,
            next_execution,
            last_execution: state.last_execution,
            last_execution_status: state.last_execution_status,
            current_execution_start_time: state.current_execution_start_time,
        }
    }

    async fn next_execution(&self) -> Option<DateTime<Utc>> {
        let mut cron = self.cron.lock().await;
        let handle = cron.as_mut()?;
        let job_id = handle.job_id?;
        match handle.scheduler.next_tick_for_job(job_id).await {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %e, "Failed to read next scan execution");
                None
            }
        }
    }

    /// One cron fire
    pub async fn run_scheduled(self: &Arc<Self>) {
        let settings = self.settings();

        if self.state.lock().is_running {
            info!("Previous scheduled scan still running, skipping");
            return;
        }
        if settings.skip_if_running && self.executor.is_scan_running() {
            info!("Manual scan in progress, skipping scheduled scan");
            self.broadcast_status("Scheduled scan skipped: a scan is already running").await;
            return;
        }
        if settings.only_when_idle && !self.executor.system_is_idle() {
            info!("System busy, skipping scheduled scan");
            self.broadcast_status("Scheduled scan skipped: system is busy").await;
            return;
        }

        let started_at = Utc::now();
        let watchdog = CancellationToken::new();
        let claimed = {
            let mut state = self.state.lock();
            if state.is_running {
                false
            } else {
                state.is_running = true;
                state.current_execution_start_time = Some(started_at);
                state.last_execution = Some(started_at);
                state.watchdog = Some(watchdog.clone());
                true
            }
        };
        if !claimed {
            info!("Another scheduled scan claimed this run, skipping");
            return;
        }
        info!("Scheduled scan started");
        self.broadcast_status("Scheduled scan started").await;
        self.spawn_watchdog(watchdog.clone());

        let result = self.executor.execute_scan().await;
        watchdog.cancel();

        let status = match &result {
            Ok(()) => ExecutionStatus::Completed,
            Err(e) if e.is_cancellation() => ExecutionStatus::Cancelled,
            Err(e) => {
                error!(error = %e, "Scheduled scan failed");
                ExecutionStatus::Failed
            }
        };

        let finished = {
            let mut state = self.state.lock();
            // the watchdog already closed this run out as a timeout
            if !state.is_running {
                false
            } else {
                state.is_running = false;
                state.current_execution_start_time = None;
                state.last_execution_status = Some(status);
                state.watchdog = None;
                true
            }
        };

        if finished {
            info!(status = ?status, "Scheduled scan finished");
            self.broadcast_status(format!("Scheduled scan {}", status_label(status))).await;
        }
    }

    /// Watchdog check against the wall clock
    pub async fn check_execution_timeout(&self) -> bool {
        self.check_execution_timeout_at(Utc::now()).await
    }

    /// Mark the running scheduled scan as timed out and cancel it when it has
    /// exceeded `maxExecutionTimeMinutes` at `now`
    pub async fn check_execution_timeout_at(&self, now: DateTime<Utc>) -> bool {
        let timed_out = {
            let mut state = self.state.lock();
            let Some(started) = state.current_execution_start_time else {
                return false;
            };
            let limit = chrono::Duration::minutes(state.settings.max_execution_time_minutes as i64);
            if now - started <= limit {
                return false;
            }
            state.is_running = false;
            state.current_execution_start_time = None;
            state.last_execution_status = Some(ExecutionStatus::Timeout);
            if let Some(watchdog) = state.watchdog.take() {
                watchdog.cancel();
            }
            now - started
        };

        warn!(elapsed_minutes = timed_out.num_minutes(), "Scheduled scan exceeded its time limit");
        if let Some(scan_id) = self.executor.cancel_active_scan() {
            info!(scan_id = %scan_id, "Cancelled timed out scan");
        }
        self.broadcast_status("Scheduled scan timed out").await;
        true
    }

    fn spawn_watchdog(self: &Arc<Self>, token: CancellationToken) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCHDOG_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(scheduler) = weak.upgrade() else { break };
                        if scheduler.check_execution_timeout().await {
                            break;
                        }
                    }
                }
            }
        });
    }

    async fn broadcast_status(&self, message: impl Into<String>) {
        let status = self.status().await;
        self.hub.broadcast(ProgressEvent::scheduler_status(status, message));
    }

    /// Stop the cron runtime entirely
    pub async fn shutdown(&self) -> Result<()> {
        let mut cron = self.cron.lock().await;
        if let Some(mut handle) = cron.take() {
            handle
                .scheduler
                .shutdown()
                .await
                .context("Failed to shut down job scheduler")?;
        }
        Ok(())
    }
}

fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
        ExecutionStatus::Timeout => "timed out",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::services::progress_hub::ProgressEventType;
    use crate::services::scan::error::ScanError;
    use crate::services::scan::settings::ExecutionTime;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeExecutor {
        running: AtomicBool,
        busy: AtomicBool,
        fail: AtomicBool,
        runs: AtomicUsize,
        cancels: AtomicUsize,
        delay_ms: AtomicU64,
    }

    #[async_trait]
    impl ScanExecutor for FakeExecutor {
        fn is_scan_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        async fn execute_scan(&self) -> ScanResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ScanError::Internal(anyhow::anyhow!("disk on fire")));
            }
            Ok(())
        }

        fn cancel_active_scan(&self) -> Option<String> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            Some("scan_1_abc".to_string())
        }

        fn system_is_idle(&self) -> bool {
            !self.busy.load(Ordering::SeqCst)
        }
    }

    async fn scheduler(executor: Arc<FakeExecutor>) -> (Database, Arc<ProgressHub>, Arc<ScanScheduler>) {
        let db = Database::in_memory().await.unwrap();
        let hub = Arc::new(ProgressHub::new());
        let scheduler = Arc::new(ScanScheduler::new(executor, db.schedule_settings(), hub.clone()));
        (db, hub, scheduler)
    }

    fn schedule(interval: ScheduleInterval, hour: u8, minute: u8) -> ScheduleSettings {
        ScheduleSettings {
            interval,
            execution_time: ExecutionTime { hour, minute },
            ..ScheduleSettings::default()
        }
    }

    #[test]
    fn test_cron_patterns() {
        let weekly = ScheduleSettings {
            weekly_days: vec![0],
            ..schedule(ScheduleInterval::Weekly, 3, 0)
        };
        assert_eq!(cron_pattern(&weekly), "0 0 3 * * SUN");

        let custom = ScheduleSettings {
            interval_hours: 6,
            ..schedule(ScheduleInterval::Custom, 0, 30)
        };
        assert_eq!(cron_pattern(&custom), "0 30 */6 * * *");

        assert_eq!(cron_pattern(&schedule(ScheduleInterval::Daily, 22, 15)), "0 15 22 * * *");

        let monthly = ScheduleSettings {
            monthly_day: 15,
            ..schedule(ScheduleInterval::Monthly, 4, 5)
        };
        assert_eq!(cron_pattern(&monthly), "0 5 4 15 * *");

        let several = ScheduleSettings {
            weekly_days: vec![1, 3, 5],
            ..schedule(ScheduleInterval::Weekly, 1, 0)
        };
        assert_eq!(cron_pattern(&several), "0 0 1 * * MON,WED,FRI");
    }

    #[test]
    fn test_cron_pattern_edges() {
        let no_days = ScheduleSettings {
            weekly_days: Vec::new(),
            ..schedule(ScheduleInterval::Weekly, 3, 0)
        };
        assert_eq!(cron_pattern(&no_days), "0 0 3 * * SUN");

        let sunday_as_seven = ScheduleSettings {
            weekly_days: vec![7],
            ..schedule(ScheduleInterval::Weekly, 3, 0)
        };
        assert_eq!(cron_pattern(&sunday_as_seven), "0 0 3 * * SUN");

        let daily_custom = ScheduleSettings {
            interval_hours: 168,
            ..schedule(ScheduleInterval::Custom, 2, 10)
        };
        assert_eq!(cron_pattern(&daily_custom), "0 10 2 * * *");
    }

    #[tokio::test]
    async fn test_run_records_completion_and_failure() {
        let executor = Arc::new(FakeExecutor::default());
        let (_db, hub, scheduler) = scheduler(executor.clone()).await;
        let mut rx = hub.subscribe("viewer");

        scheduler.run_scheduled().await;
        let status = scheduler.status().await;
        assert_eq!(status.last_execution_status, Some(ExecutionStatus::Completed));
        assert!(!status.is_running);
        assert!(status.last_execution.is_some());

        executor.fail.store(true, Ordering::SeqCst);
        scheduler.run_scheduled().await;
        assert_eq!(scheduler.status().await.last_execution_status, Some(ExecutionStatus::Failed));
        assert_eq!(executor.runs.load(Ordering::SeqCst), 2);

        let mut kinds = Vec::new();
        while let Ok(line) = rx.try_recv() {
            let event: ProgressEvent = serde_json::from_str(line.trim_end()).unwrap();
            kinds.push(event.kind);
        }
        assert_eq!(kinds.iter().filter(|k| **k == ProgressEventType::SchedulerStatus).count(), 4);
    }

    #[tokio::test]
    async fn test_skips_when_manual_scan_running_or_busy() {
        let executor = Arc::new(FakeExecutor::default());
        let (_db, _hub, scheduler) = scheduler(executor.clone()).await;

        executor.running.store(true, Ordering::SeqCst);
        scheduler.run_scheduled().await;
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);

        executor.running.store(false, Ordering::SeqCst);
        executor.busy.store(true, Ordering::SeqCst);
        let mut settings = scheduler.settings();
        settings.only_when_idle = true;
        scheduler.state.lock().settings = settings;
        scheduler.run_scheduled().await;
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.status().await.last_execution_status, None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fires_run_once() {
        let executor = Arc::new(FakeExecutor::default());
        executor.delay_ms.store(100, Ordering::SeqCst);
        let (_db, _hub, scheduler) = scheduler(executor.clone()).await;

        let barrier = Arc::new(tokio::sync::Barrier::new(4));
        let fires: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = scheduler.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    scheduler.run_scheduled().await;
                })
            })
            .collect();
        for fire in fires {
            fire.await.unwrap();
        }

        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
        let status = scheduler.status().await;
        assert!(!status.is_running);
        assert_eq!(status.last_execution_status, Some(ExecutionStatus::Completed));
    }

    #[tokio::test]
    async fn test_timeout_marks_and_cancels() {
        let executor = Arc::new(FakeExecutor::default());
        let (_db, _hub, scheduler) = scheduler(executor.clone()).await;
        let started = Utc::now();
        {
            let mut state = scheduler.state.lock();
            state.settings.max_execution_time_minutes = 10;
            state.is_running = true;
            state.current_execution_start_time = Some(started);
        }

        assert!(!scheduler.check_execution_timeout_at(started + chrono::Duration::minutes(10)).await);
        assert!(scheduler.check_execution_timeout_at(started + chrono::Duration::minutes(11)).await);

        let status = scheduler.status().await;
        assert_eq!(status.last_execution_status, Some(ExecutionStatus::Timeout));
        assert!(!status.is_running);
        assert_eq!(status.current_execution_start_time, None);
        assert_eq!(executor.cancels.load(Ordering::SeqCst), 1);

        // nothing left to time out
        assert!(!scheduler.check_execution_timeout_at(started + chrono::Duration::minutes(60)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_settings_transitions_timer() {
        let executor = Arc::new(FakeExecutor::default());
        let (db, _hub, scheduler) = scheduler(executor).await;

        let enabled = ScheduleSettings {
            enabled: true,
            ..schedule(ScheduleInterval::Daily, 3, 0)
        };
        let status = scheduler.update_settings(enabled.clone()).await.unwrap();
        assert!(status.is_enabled);
        assert!(status.next_execution.is_some());
        assert_eq!(db.schedule_settings().get().await.unwrap(), Some(enabled));

        let status = scheduler
            .update_settings(ScheduleSettings {
                enabled: true,
                ..schedule(ScheduleInterval::Weekly, 4, 0)
            })
            .await
            .unwrap();
        assert!(status.next_execution.is_some());

        let status = scheduler.update_settings(ScheduleSettings::default()).await.unwrap();
        assert!(!status.is_enabled);
        assert_eq!(status.next_execution, None);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_from_store() {
        let executor = Arc::new(FakeExecutor::default());
        let (db, hub, _) = scheduler(executor.clone()).await;
        let stored = ScheduleSettings {
            enabled: true,
            ..schedule(ScheduleInterval::Daily, 5, 45)
        };
        db.schedule_settings().save(&stored).await.unwrap();

        let scheduler = Arc::new(ScanScheduler::new(executor, db.schedule_settings(), hub));
        scheduler.initialize_from_store().await.unwrap();
        assert_eq!(scheduler.settings(), stored);
        assert!(scheduler.status().await.next_execution.is_some());
        scheduler.shutdown().await.unwrap();
    }
}
