//! Scan tunables and schedule settings
//!
//! `ScanSettings` is persisted as a JSON file next to the database and read on
//! every resource recommendation, so edits made mid-scan take effect on the
//! next batch. `ScheduleSettings` is persisted in SQLite (see `db::schedule`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const MIN_BATCH_SIZE: u32 = 1;
pub const MAX_BATCH_SIZE: u32 = 200;

/// Scheduling tier applied on top of the memory-driven batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Wall-clock window during which scanning should auto-pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuietHours {
    pub enabled: bool,
    pub start_hour: u8,
    pub end_hour: u8,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: 22,
            end_hour: 6,
        }
    }
}

impl QuietHours {
    /// Whether `hour` (0-23) falls inside the window. Windows may wrap past midnight.
    pub fn contains(&self, hour: u8) -> bool {
        if !self.enabled {
            return false;
        }
        if self.start_hour <= self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            hour >= self.start_hour || hour < self.end_hour
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanSettings {
    pub batch_size: u32,
    pub progress_update_interval: u32,
    pub sleep_interval_ms: u64,
    pub processing_priority: ProcessingPriority,
    pub max_concurrent_operations: u32,
    pub memory_threshold_mb: u64,
    pub auto_pause_on_high_cpu: bool,
    pub auto_pause_threshold_pct: f32,
    pub auto_pause_time_range: QuietHours,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            progress_update_interval: 10,
            sleep_interval_ms: 100,
            processing_priority: ProcessingPriority::Normal,
            max_concurrent_operations: 3,
            memory_threshold_mb: 1024,
            auto_pause_on_high_cpu: false,
            auto_pause_threshold_pct: 80.0,
            auto_pause_time_range: QuietHours::default(),
        }
    }
}

impl ScanSettings {
    /// Force every field into its allowed range
    pub fn clamped(mut self) -> Self {
        self.batch_size = self.batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self.progress_update_interval = self.progress_update_interval.clamp(1, 1000);
        self.sleep_interval_ms = self.sleep_interval_ms.min(1000);
        self.max_concurrent_operations = self.max_concurrent_operations.clamp(1, 8);
        self.memory_threshold_mb = self.memory_threshold_mb.clamp(256, 8192);
        self.auto_pause_threshold_pct = if self.auto_pause_threshold_pct.is_finite() {
            self.auto_pause_threshold_pct.clamp(50.0, 95.0)
        } else {
            80.0
        };
        self.auto_pause_time_range.start_hour %= 24;
        self.auto_pause_time_range.end_hour %= 24;
        self
    }

    pub fn apply(mut self, patch: ScanSettingsPatch) -> Self {
        if let Some(v) = patch.batch_size {
            self.batch_size = v;
        }
        if let Some(v) = patch.progress_update_interval {
            self.progress_update_interval = v;
        }
        if let Some(v) = patch.sleep_interval_ms {
            self.sleep_interval_ms = v;
        }
        if let Some(v) = patch.processing_priority {
            self.processing_priority = v;
        }
        if let Some(v) = patch.max_concurrent_operations {
            self.max_concurrent_operations = v;
        }
        if let Some(v) = patch.memory_threshold_mb {
            self.memory_threshold_mb = v;
        }
        if let Some(v) = patch.auto_pause_on_high_cpu {
            self.auto_pause_on_high_cpu = v;
        }
        if let Some(v) = patch.auto_pause_threshold_pct {
            self.auto_pause_threshold_pct = v;
        }
        if let Some(v) = patch.auto_pause_time_range {
            self.auto_pause_time_range = v;
        }
        self.clamped()
    }
}

/// Partial update accepted by the settings endpoint
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSettingsPatch {
    pub batch_size: Option<u32>,
    pub progress_update_interval: Option<u32>,
    pub sleep_interval_ms: Option<u64>,
    pub processing_priority: Option<ProcessingPriority>,
    pub max_concurrent_operations: Option<u32>,
    pub memory_threshold_mb: Option<u64>,
    pub auto_pause_on_high_cpu: Option<bool>,
    pub auto_pause_threshold_pct: Option<f32>,
    pub auto_pause_time_range: Option<QuietHours>,
}

/// JSON-file backed holder of the current `ScanSettings`
pub struct ScanSettingsStore {
    path: PathBuf,
    current: RwLock<ScanSettings>,
    /// Serializes read-modify-write so concurrent patches do not drop each other
    write_lock: tokio::sync::Mutex<()>,
}

impl ScanSettingsStore {
    /// Load settings from `path`, falling back to defaults when absent or unreadable
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<ScanSettings>(&raw) {
                Ok(settings) => {
                    debug!(path = %path.display(), "Loaded scan settings");
                    settings.clamped()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Scan settings file is invalid, using defaults");
                    ScanSettings::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ScanSettings::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read scan settings, using defaults");
                ScanSettings::default()
            }
        };

        Self {
            path,
            current: RwLock::new(settings),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// In-memory store that never touches disk until a mutation
    pub fn with_settings(path: impl Into<PathBuf>, settings: ScanSettings) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(settings.clamped()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn get(&self) -> ScanSettings {
        self.current.read().clone()
    }

    pub async fn update(&self, patch: ScanSettingsPatch) -> Result<ScanSettings> {
        let _guard = self.write_lock.lock().await;
        let updated = self.get().apply(patch);
        self.persist(&updated).await?;
        *self.current.write() = updated.clone();
        info!(batch_size = updated.batch_size, priority = ?updated.processing_priority, "Scan settings updated");
        Ok(updated)
    }

    pub async fn reset(&self) -> Result<ScanSettings> {
        let _guard = self.write_lock.lock().await;
        let defaults = ScanSettings::default();
        self.persist(&defaults).await?;
        *self.current.write() = defaults.clone();
        info!("Scan settings reset to defaults");
        Ok(defaults)
    }

    async fn persist(&self, settings: &ScanSettings) -> Result<()> {
        write_json_atomic(&self.path, settings).await
    }
}

async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_vec_pretty(value).context("Failed to serialize settings")?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

// ============================================================================
// Schedule settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleInterval {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl ScheduleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleInterval::Daily => "daily",
            ScheduleInterval::Weekly => "weekly",
            ScheduleInterval::Monthly => "monthly",
            ScheduleInterval::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(ScheduleInterval::Daily),
            "weekly" => Some(ScheduleInterval::Weekly),
            "monthly" => Some(ScheduleInterval::Monthly),
            "custom" => Some(ScheduleInterval::Custom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTime {
    pub hour: u8,
    pub minute: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSettings {
    pub enabled: bool,
    pub interval: ScheduleInterval,
    /// Only used by `custom`
    pub interval_hours: u32,
    pub execution_time: ExecutionTime,
    /// 0 = Sunday .. 6 = Saturday
    pub weekly_days: Vec<u8>,
    pub monthly_day: u8,
    pub skip_if_running: bool,
    pub max_execution_time_minutes: u32,
    pub only_when_idle: bool,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: ScheduleInterval::Weekly,
            interval_hours: 168,
            execution_time: ExecutionTime { hour: 3, minute: 0 },
            weekly_days: vec![0],
            monthly_day: 1,
            skip_if_running: true,
            max_execution_time_minutes: 180,
            only_when_idle: false,
        }
    }
}

impl ScheduleSettings {
    /// Clamp times and days into range and dedupe the weekday list.
    /// Weekday 7 is accepted as Sunday.
    pub fn normalized(mut self) -> Self {
        self.interval_hours = self.interval_hours.clamp(1, 24 * 31);
        self.execution_time.hour = self.execution_time.hour.min(23);
        self.execution_time.minute = self.execution_time.minute.min(59);
        for day in self.weekly_days.iter_mut() {
            if *day == 7 {
                *day = 0;
            }
        }
        self.weekly_days.retain(|d| *d < 7);
        self.weekly_days.sort_unstable();
        self.weekly_days.dedup();
        self.monthly_day = self.monthly_day.clamp(1, 31);
        self.max_execution_time_minutes = self.max_execution_time_minutes.max(1);
        self
    }
}
