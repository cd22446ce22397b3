//! Resource monitor for the scan pipeline
//!
//! Samples this process's memory and CPU through `sysinfo`, keeps a short
//! rolling window of memory readings and turns them into batch-size and pause
//! recommendations. Nothing here blocks or pauses work itself.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use chrono::Timelike;
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::debug;

use super::settings::{
    MAX_BATCH_SIZE, MIN_BATCH_SIZE, ProcessingPriority, ScanSettings, ScanSettingsStore,
};

/// Number of memory samples kept for the rolling average
const MEMORY_HISTORY_SIZE: usize = 10;

const MEMORY_HIGH_THRESHOLD_PCT: f64 = 80.0;
const MEMORY_LOW_THRESHOLD_PCT: f64 = 40.0;
const BATCH_REDUCTION_RATIO: f64 = 0.5;
const BATCH_INCREASE_RATIO: f64 = 1.5;
const MIN_BATCH_SIZE_AFTER_REDUCTION: f64 = 5.0;
const LOW_PRIORITY_RATIO: f64 = 0.7;
const HIGH_PRIORITY_RATIO: f64 = 1.3;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySample {
    pub used_mb: f64,
    pub total_mb: f64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSample {
    /// This process, normalized across cores, capped at 100
    pub usage_percent: f64,
    /// Whole machine
    pub system_percent: f64,
}

/// Result of `check_system_resources`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCheck {
    pub memory_ok: bool,
    pub cpu_ok: bool,
    pub in_quiet_hours: bool,
    pub should_pause: bool,
    pub memory: MemorySample,
    pub cpu: CpuSample,
}

/// Source of raw resource readings
pub trait ResourceSampler: Send {
    /// Memory and CPU read from one refresh
    fn sample(&mut self) -> (MemorySample, CpuSample);
}

/// Reads the current process through `sysinfo`
///
/// Process CPU is a delta between two refreshes, so the process is refreshed
/// at most once per `MINIMUM_CPU_UPDATE_INTERVAL`; readings in between reuse
/// the last delta.
pub struct SysinfoSampler {
    sys: System,
    pid: Option<Pid>,
    cpu_count: f64,
    last_refresh: Option<Instant>,
    last_cpu: CpuSample,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();
        let pid = sysinfo::get_current_pid().ok();
        if let Some(pid) = pid {
            sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        }
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get() as f64)
            .unwrap_or(1.0);
        Self {
            sys,
            pid,
            cpu_count,
            last_refresh: Some(Instant::now()),
            last_cpu: CpuSample { usage_percent: 0.0, system_percent: 0.0 },
        }
    }

    fn refresh_cpu(&mut self) -> CpuSample {
        let due = self
            .last_refresh
            .map_or(true, |at| at.elapsed() >= sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        if !due {
            return self.last_cpu;
        }

        self.sys.refresh_cpu_all();
        let raw = match self.pid {
            Some(pid) => {
                self.sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                self.sys.process(pid).map(|p| p.cpu_usage() as f64).unwrap_or(0.0)
            }
            None => 0.0,
        };
        self.last_refresh = Some(Instant::now());
        // sysinfo reports process usage per core
        self.last_cpu = CpuSample {
            usage_percent: (raw / self.cpu_count).clamp(0.0, 100.0),
            system_percent: (self.sys.global_cpu_usage() as f64).clamp(0.0, 100.0),
        };
        self.last_cpu
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self) -> (MemorySample, CpuSample) {
        let cpu = self.refresh_cpu();
        self.sys.refresh_memory();
        let total_mb = self.sys.total_memory() as f64 / BYTES_PER_MB;
        let used_mb = self
            .pid
            .and_then(|pid| self.sys.process(pid))
            .map(|p| p.memory() as f64 / BYTES_PER_MB)
            .unwrap_or(0.0);
        let usage_percent = if total_mb > 0.0 {
            used_mb / total_mb * 100.0
        } else {
            0.0
        };
        (MemorySample { used_mb, total_mb, usage_percent }, cpu)
    }
}

struct MonitorInner {
    sampler: Box<dyn ResourceSampler>,
    memory_history: VecDeque<f64>,
}

/// Resource-aware batch sizing and pause recommendations
pub struct ResourceMonitor {
    settings: Arc<ScanSettingsStore>,
    inner: Mutex<MonitorInner>,
}

impl ResourceMonitor {
    pub fn new(settings: Arc<ScanSettingsStore>) -> Self {
        Self::with_sampler(settings, Box::new(SysinfoSampler::new()))
    }

    pub fn with_sampler(settings: Arc<ScanSettingsStore>, sampler: Box<dyn ResourceSampler>) -> Self {
        Self {
            settings,
            inner: Mutex::new(MonitorInner {
                sampler,
                memory_history: VecDeque::with_capacity(MEMORY_HISTORY_SIZE),
            }),
        }
    }

    /// One reading of both resources; memory goes into the rolling window
    fn sample(&self) -> (MemorySample, CpuSample) {
        let mut inner = self.inner.lock();
        let (memory, cpu) = inner.sampler.sample();
        if inner.memory_history.len() >= MEMORY_HISTORY_SIZE {
            inner.memory_history.pop_front();
        }
        inner.memory_history.push_back(memory.used_mb);
        (memory, cpu)
    }

    pub fn memory_usage(&self) -> MemorySample {
        self.sample().0
    }

    pub fn cpu_usage(&self) -> CpuSample {
        self.sample().1
    }

    /// Mean of the recorded memory readings in MB, with the window length
    pub fn memory_average(&self) -> (f64, usize) {
        let inner = self.inner.lock();
        let len = inner.memory_history.len();
        if len == 0 {
            return (0.0, 0);
        }
        (inner.memory_history.iter().sum::<f64>() / len as f64, len)
    }

    pub fn recommend_batch_size(&self) -> u32 {
        let settings = self.settings.get();
        let memory = self.memory_usage();
        let (average_mb, samples) = self.memory_average();
        let size = compute_batch_size(&settings, &memory, average_mb, samples);
        debug!(
            batch_size = size,
            memory_pct = memory.usage_percent,
            average_mb,
            "Recommended batch size"
        );
        size
    }

    pub fn check_system_resources(&self) -> ResourceCheck {
        let hour = chrono::Local::now().hour() as u8;
        self.check_system_resources_at(hour)
    }

    /// Same as `check_system_resources` with an explicit local hour
    pub fn check_system_resources_at(&self, hour: u8) -> ResourceCheck {
        let settings = self.settings.get();
        let (memory, cpu) = self.sample();

        let memory_ok = memory.used_mb < settings.memory_threshold_mb as f64;
        let cpu_ok = !settings.auto_pause_on_high_cpu
            || cpu.usage_percent < settings.auto_pause_threshold_pct as f64;
        let in_quiet_hours = settings.auto_pause_time_range.contains(hour);

        ResourceCheck {
            memory_ok,
            cpu_ok,
            in_quiet_hours,
            should_pause: !memory_ok || !cpu_ok || in_quiet_hours,
            memory,
            cpu,
        }
    }
}

/// Batch size for the given memory state, always within `MIN_BATCH_SIZE..=MAX_BATCH_SIZE`
pub fn compute_batch_size(
    settings: &ScanSettings,
    memory: &MemorySample,
    average_mb: f64,
    samples: usize,
) -> u32 {
    let mut size = settings.batch_size as f64;

    if memory.usage_percent > MEMORY_HIGH_THRESHOLD_PCT {
        size = (size * BATCH_REDUCTION_RATIO)
            .floor()
            .max(MIN_BATCH_SIZE_AFTER_REDUCTION);
    } else if memory.usage_percent < MEMORY_LOW_THRESHOLD_PCT
        && samples >= 3
        && average_mb < settings.memory_threshold_mb as f64 * 0.5
    {
        size = (size * BATCH_INCREASE_RATIO).floor().min(MAX_BATCH_SIZE as f64);
    }

    size = match settings.processing_priority {
        ProcessingPriority::Low => (size * LOW_PRIORITY_RATIO).floor(),
        ProcessingPriority::Normal => size,
        ProcessingPriority::High => (size * HIGH_PRIORITY_RATIO).floor(),
    };

    if !size.is_finite() {
        return MIN_BATCH_SIZE;
    }
    (size as u32).clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
}
