//! Rate-limited queue congestion warnings

use std::time::{Duration, Instant};

/// Congestion threshold as a fraction of channel capacity
pub const CONGESTION_NUMERATOR: usize = 3;
pub const CONGESTION_DENOMINATOR: usize = 4;

/// Minimum spacing between two warnings
pub const WARNING_INTERVAL: Duration = Duration::from_secs(10);

/// Decides when a congested channel deserves a warning
///
/// The clock is passed in so the decision is deterministic under test.
#[derive(Debug, Clone)]
pub struct BackpressureMonitor {
    interval: Duration,
    last_warning: Option<Instant>,
    warnings: u64,
}

impl Default for BackpressureMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackpressureMonitor {
    pub fn new() -> Self {
        Self::with_interval(WARNING_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            last_warning: None,
            warnings: 0,
        }
    }

    /// Occupancy at or above three quarters of capacity
    pub fn is_congested(depth: usize, capacity: usize) -> bool {
        capacity > 0 && depth * CONGESTION_DENOMINATOR >= capacity * CONGESTION_NUMERATOR
    }

    /// Returns true when a warning should be emitted now
    pub fn observe(&mut self, depth: usize, capacity: usize, now: Instant) -> bool {
        if !Self::is_congested(depth, capacity) {
            return false;
        }
        let due = match self.last_warning {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.interval,
        };
        if due {
            self.last_warning = Some(now);
            self.warnings += 1;
        }
        due
    }

    /// Warnings emitted so far
    pub fn warnings(&self) -> u64 {
        self.warnings
    }
}
