//! Process and system memory probes

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::{Pid, System};

const NEVER: u64 = u64::MAX;

/// Throttled memory readings.
///
/// A probe refreshes a fresh [`System`] at most once per refresh interval;
/// readings in between return the cached values. All state is atomic so one
/// monitor can be shared across the batch workers.
#[derive(Debug)]
pub struct MemoryMonitor {
    pid: Pid,
    refresh_interval: Duration,
    origin: Instant,
    /// Milliseconds since `origin` of the last probe
    last_probe_ms: AtomicU64,
    process_bytes: AtomicU64,
    /// f64 bits of the system usage percentage
    system_pct_bits: AtomicU64,
}

impl MemoryMonitor {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            refresh_interval,
            origin: Instant::now(),
            last_probe_ms: AtomicU64::new(NEVER),
            process_bytes: AtomicU64::new(0),
            system_pct_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn refresh(&self) {
        let now_ms = self.origin.elapsed().as_millis() as u64;
        let last = self.last_probe_ms.load(Ordering::Acquire);
        if last != NEVER && now_ms.saturating_sub(last) < self.refresh_interval.as_millis() as u64 {
            return;
        }
        // another worker is already probing
        if self
            .last_probe_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let mut system = System::new();
        system.refresh_all();

        let process = system.process(self.pid).map(|p| p.memory()).unwrap_or(0);
        let total = system.total_memory() as f64;
        let used_pct = if total > 0.0 {
            system.used_memory() as f64 / total * 100.0
        } else {
            0.0
        };
        self.process_bytes.store(process, Ordering::Release);
        self.system_pct_bits.store(used_pct.to_bits(), Ordering::Release);
    }

    /// Resident memory of this process in MB
    pub fn process_mb(&self) -> f64 {
        self.refresh();
        self.process_bytes.load(Ordering::Acquire) as f64 / (1024.0 * 1024.0)
    }

    /// System RAM in use, 0–100
    pub fn system_usage_pct(&self) -> f64 {
        self.refresh();
        f64::from_bits(self.system_pct_bits.load(Ordering::Acquire))
    }

    pub fn is_over(&self, threshold_pct: f64) -> bool {
        self.system_usage_pct() >= threshold_pct
    }
}

/// Something that can release memory when usage crosses the threshold
pub trait MemoryReclaimer: Send + Sync + fmt::Debug {
    /// Release what can be released; returns the number of items freed
    fn reclaim(&self) -> usize;
}

impl Default for MemoryMonitor {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readings_are_sane() {
        let monitor = MemoryMonitor::new(Duration::ZERO);
        assert!(monitor.process_mb() >= 0.0);
        let pct = monitor.system_usage_pct();
        assert!((0.0..=100.0).contains(&pct));
    }

    #[test]
    fn test_thresholds() {
        let monitor = MemoryMonitor::default();
        assert!(monitor.is_over(0.0));
        assert!(!monitor.is_over(f64::INFINITY));
    }
}
