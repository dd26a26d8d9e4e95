//! Per-module operation timers and running statistics.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

/// Running statistics for one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub operation_count: u64,
    pub last_duration: Duration,
    pub average_duration: Duration,
    /// Resident memory of the host process at the last stop, in bytes.
    /// Modules share one address space, so this is not per-module.
    pub memory_usage: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl PerformanceStats {
    fn record(&mut self, latest: Duration, memory_usage: u64) {
        self.operation_count += 1;
        let n = u128::from(self.operation_count);
        let total = self.average_duration.as_nanos() * (n - 1) + latest.as_nanos();
        self.average_duration = duration_from_nanos(total / n);
        self.last_duration = latest;
        self.memory_usage = memory_usage;
        self.last_update = Some(Utc::now());
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    let secs = (nanos / 1_000_000_000).min(u128::from(u64::MAX)) as u64;
    let sub = (nanos % 1_000_000_000) as u32;
    Duration::new(secs, sub)
}

/// Source of the host process memory figure.
pub trait MemorySampler: Send + Sync {
    /// Current memory usage in bytes.
    fn sample(&self) -> u64;
}

/// Samples resident memory of the current process through `sysinfo`.
pub struct ProcessMemorySampler {
    system: Mutex<sysinfo::System>,
    pid: Option<sysinfo::Pid>,
}

impl ProcessMemorySampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(sysinfo::System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySampler for ProcessMemorySampler {
    fn sample(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let mut system = self.system.lock();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]));
        system.process(pid).map_or(0, |p| p.memory())
    }
}

type TimerKey = (String, String);

/// Process-wide performance monitor.
pub struct PerformanceMonitor {
    timers: RwLock<HashMap<TimerKey, Instant>>,
    stats: RwLock<HashMap<String, PerformanceStats>>,
    sampler: Box<dyn MemorySampler>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::with_sampler(ProcessMemorySampler::new())
    }

    pub fn with_sampler(sampler: impl MemorySampler + 'static) -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
            stats: RwLock::new(HashMap::new()),
            sampler: Box::new(sampler),
        }
    }

    /// Start timing `operation` for `module_id`. Restarts a running timer.
    pub fn start_timer(&self, module_id: &str, operation: &str) {
        self.timers
            .write()
            .insert((module_id.to_string(), operation.to_string()), Instant::now());
    }

    /// Stop a timer and fold its duration into the module's statistics.
    ///
    /// Returns `None`, leaving statistics untouched, if the timer was not
    /// running.
    pub fn stop_timer(&self, module_id: &str, operation: &str) -> Option<Duration> {
        let started = self
            .timers
            .write()
            .remove(&(module_id.to_string(), operation.to_string()))?;
        let elapsed = started.elapsed();
        self.record(module_id, elapsed);
        Some(elapsed)
    }

    /// Fold an externally measured duration into the module's statistics.
    pub fn record(&self, module_id: &str, duration: Duration) {
        let memory = self.sampler.sample();
        self.stats
            .write()
            .entry(module_id.to_string())
            .or_default()
            .record(duration, memory);
    }

    /// Time a closure as one operation.
    pub fn time<R>(&self, module_id: &str, operation: &str, f: impl FnOnce() -> R) -> R {
        self.start_timer(module_id, operation);
        let result = f();
        self.stop_timer(module_id, operation);
        result
    }

    /// Statistics for a module; zeroed if it has not recorded anything.
    pub fn get_stats(&self, module_id: &str) -> PerformanceStats {
        self.stats.read().get(module_id).cloned().unwrap_or_default()
    }

    pub fn all_stats(&self) -> HashMap<String, PerformanceStats> {
        self.stats.read().clone()
    }

    /// Timers currently running, as `(module_id, operation)` pairs.
    pub fn running_timers(&self) -> Vec<(String, String)> {
        let mut timers: Vec<_> = self.timers.read().keys().cloned().collect();
        timers.sort();
        timers
    }

    /// Drop the statistics and running timers of one module.
    pub fn reset(&self, module_id: &str) {
        self.stats.write().remove(module_id);
        self.timers.write().retain(|(id, _), _| id != module_id);
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("modules", &self.stats.read().len())
            .field("running_timers", &self.timers.read().len())
            .finish()
    }
}
