//! Pool statistics tracking
//!
//! Counters are cumulative and only reset at boot.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Snapshot of one pool's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Pool name
    pub name: &'static str,
    /// Number of slots
    pub capacity: usize,
    /// Payload width per slot
    pub payload_size: usize,
    /// Slots currently handed out
    pub in_use: usize,
    /// Slots on the free list
    pub free: usize,
    /// Historical peak of `in_use`
    pub max_in_use: usize,
    /// Successful allocations
    pub total_allocations: u64,
    /// Slots returned to the free list
    pub total_releases: u64,
    /// Allocations refused (exhausted or timed out)
    pub alloc_failures: u64,
    /// Releases of a slot already on the free list
    pub double_free_count: u64,
    /// Free-list consistency checks performed
    pub corrupt_checks: u64,
}

impl PoolStats {
    /// Fraction of slots currently handed out (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.in_use as f64 / self.capacity as f64
    }

    /// Allocation failure rate (0.0 to 1.0)
    pub fn failure_rate(&self) -> f64 {
        let attempts = self.total_allocations + self.alloc_failures;
        if attempts == 0 {
            return 0.0;
        }
        self.alloc_failures as f64 / attempts as f64
    }

    /// No integrity problems recorded
    pub fn is_healthy(&self) -> bool {
        self.double_free_count == 0 && self.corrupt_checks == 0
    }

    /// One-line summary used by `log_stats`
    pub fn summary(&self) -> String {
        format!(
            "{} pool stats: total={} in_use={} max_in_use={} alloc_failures={} double_free={} checks={}",
            self.name,
            self.capacity,
            self.in_use,
            self.max_in_use,
            self.alloc_failures,
            self.double_free_count,
            self.corrupt_checks
        )
    }
}

/// Lock-free counters kept alongside the free-list lock
#[derive(Debug, Default)]
pub struct AtomicPoolStats {
    pub max_in_use: AtomicUsize,
    pub total_allocations: AtomicU64,
    pub total_releases: AtomicU64,
    pub alloc_failures: AtomicU64,
    pub double_free_count: AtomicU64,
    pub corrupt_checks: AtomicU64,
}

impl AtomicPoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful allocation that brought `in_use` to `now_in_use`
    pub fn record_allocation(&self, now_in_use: usize) {
        self.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.max_in_use.fetch_max(now_in_use, Ordering::Relaxed);
    }

    pub fn record_release(&self) {
        self.total_releases.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused allocation, returning the new failure count
    pub fn record_failure(&self) -> u64 {
        self.alloc_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a double release, returning the new count
    pub fn record_double_free(&self) -> u64 {
        self.double_free_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_corrupt_check(&self) {
        self.corrupt_checks.fetch_add(1, Ordering::Relaxed);
    }

    /// Fill the counter fields of `stats`
    pub fn fill(&self, stats: &mut PoolStats) {
        stats.max_in_use = self.max_in_use.load(Ordering::Relaxed);
        stats.total_allocations = self.total_allocations.load(Ordering::Relaxed);
        stats.total_releases = self.total_releases.load(Ordering::Relaxed);
        stats.alloc_failures = self.alloc_failures.load(Ordering::Relaxed);
        stats.double_free_count = self.double_free_count.load(Ordering::Relaxed);
        stats.corrupt_checks = self.corrupt_checks.load(Ordering::Relaxed);
    }
}
