//! Resource monitoring
//!
//! Memory probes and per-operation processing metrics with a bounded
//! history.

mod memory;
mod metrics;

pub use memory::{MemoryMonitor, MemoryReclaimer};
pub use metrics::{MonitorSummary, OperationTracker, ProcessingMetrics, ResourceMonitor};
