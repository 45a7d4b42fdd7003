//! Per-operation processing metrics
//!
//! Counters live in atomics on an [`OperationTracker`]; completed
//! operations are appended to the monitor's bounded history, which is the
//! only state kept under a lock.

use super::memory::MemoryMonitor;
use crate::config::MonitorConfig;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Metrics of one completed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: f64,
    pub memory_before_mb: f64,
    pub memory_after_mb: f64,
    pub memory_peak_mb: f64,
    pub rows_processed: u64,
    /// Rows per second
    pub throughput: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub failed_batches: u64,
    pub reclaim_passes: u64,
}

/// Counters of an operation in flight
#[derive(Debug)]
pub struct OperationTracker<'a> {
    operation: String,
    memory: &'a MemoryMonitor,
    started_at: DateTime<Utc>,
    start: Instant,
    memory_before_mb: f64,
    /// f64 bits of the highest reading so far
    peak_mb_bits: AtomicU64,
    rows: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    errors: AtomicU64,
    failed_batches: AtomicU64,
    reclaim_passes: AtomicU64,
}

impl<'a> OperationTracker<'a> {
    fn new(operation: &str, memory: &'a MemoryMonitor) -> Self {
        let before = memory.process_mb();
        Self {
            operation: operation.to_string(),
            memory,
            started_at: Utc::now(),
            start: Instant::now(),
            memory_before_mb: before,
            peak_mb_bits: AtomicU64::new(before.to_bits()),
            rows: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            failed_batches: AtomicU64::new(0),
            reclaim_passes: AtomicU64::new(0),
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn record_rows(&self, rows: usize) {
        self.rows.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch whose attributions were replaced by zeros; also an error
    pub fn record_batch_failure(&self) {
        self.failed_batches.fetch_add(1, Ordering::Relaxed);
        self.record_error();
    }

    pub fn record_reclaim(&self) {
        self.reclaim_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn failed_batches(&self) -> u64 {
        self.failed_batches.load(Ordering::Relaxed)
    }

    pub fn reclaim_passes(&self) -> u64 {
        self.reclaim_passes.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Read process memory and fold it into the peak
    pub fn sample_memory(&self) -> f64 {
        let current = self.memory.process_mb();
        let _ = self
            .peak_mb_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (current > f64::from_bits(bits)).then_some(current.to_bits())
            });
        current
    }

    /// Sample memory, then report whether system usage is at or above
    /// `threshold_pct`
    pub fn memory_over(&self, threshold_pct: f64) -> bool {
        self.sample_memory();
        self.memory.is_over(threshold_pct)
    }

    fn finish(self) -> ProcessingMetrics {
        let after = self.sample_memory();
        let duration = self.start.elapsed();
        let rows = self.rows.load(Ordering::Relaxed);
        let secs = duration.as_secs_f64();
        ProcessingMetrics {
            operation: self.operation,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_ms: secs * 1000.0,
            memory_before_mb: self.memory_before_mb,
            memory_after_mb: after,
            memory_peak_mb: f64::from_bits(self.peak_mb_bits.load(Ordering::Acquire)),
            rows_processed: rows,
            throughput: if secs > 0.0 { rows as f64 / secs } else { 0.0 },
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            reclaim_passes: self.reclaim_passes.load(Ordering::Relaxed),
        }
    }
}

/// Aggregate over the retained history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub operations: usize,
    pub mean_duration_ms: f64,
    pub total_rows: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub total_errors: u64,
    pub peak_memory_mb: f64,
}

/// Starts operation trackers and keeps the last `history_capacity`
/// completed operations
#[derive(Debug)]
pub struct ResourceMonitor {
    memory: MemoryMonitor,
    history: Mutex<VecDeque<ProcessingMetrics>>,
    capacity: usize,
}

impl ResourceMonitor {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            memory: MemoryMonitor::new(Duration::from_millis(config.memory_refresh_ms)),
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            capacity: config.history_capacity.max(1),
        }
    }

    pub fn start(&self, operation: &str) -> OperationTracker<'_> {
        OperationTracker::new(operation, &self.memory)
    }

    /// Freeze the tracker's counters and append them to the history
    pub fn complete(&self, tracker: OperationTracker<'_>) -> ProcessingMetrics {
        let metrics = tracker.finish();
        debug!(
            operation = %metrics.operation,
            duration_ms = metrics.duration_ms,
            rows = metrics.rows_processed,
            errors = metrics.errors,
            "Operation complete"
        );

        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(metrics.clone());
        metrics
    }

    pub fn memory(&self) -> &MemoryMonitor {
        &self.memory
    }

    /// Oldest first
    pub fn history(&self) -> Vec<ProcessingMetrics> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn summary(&self) -> MonitorSummary {
        let history = self.history.lock();
        if history.is_empty() {
            return MonitorSummary::default();
        }
        let operations = history.len();
        let cache_hits: u64 = history.iter().map(|m| m.cache_hits).sum();
        let cache_misses: u64 = history.iter().map(|m| m.cache_misses).sum();
        let lookups = cache_hits + cache_misses;
        MonitorSummary {
            operations,
            mean_duration_ms: history.iter().map(|m| m.duration_ms).sum::<f64>() / operations as f64,
            total_rows: history.iter().map(|m| m.rows_processed).sum(),
            cache_hits,
            cache_misses,
            cache_hit_rate: if lookups > 0 { cache_hits as f64 / lookups as f64 } else { 0.0 },
            total_errors: history.iter().map(|m| m.errors).sum(),
            peak_memory_mb: history.iter().map(|m| m.memory_peak_mb).fold(0.0, f64::max),
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(&MonitorConfig::default())
    }
}
