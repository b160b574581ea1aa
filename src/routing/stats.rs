//! Per-target delivery statistics

use std::sync::atomic::{AtomicU64, Ordering};

use crate::ids::{TargetId, TARGET_COUNT};

/// Delivery counters for one target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetStats {
    /// Pooled messages pushed onto the target's channel
    pub delivered: u64,
    /// Pushes refused because the channel was full
    pub dropped: u64,
    /// Value messages handed to the target's handler
    pub handled: u64,
}

/// Routing counters for every target
#[derive(Debug)]
pub struct RouterStats {
    delivered: [AtomicU64; TARGET_COUNT],
    dropped: [AtomicU64; TARGET_COUNT],
    handled: [AtomicU64; TARGET_COUNT],
    broadcasts: AtomicU64,
    unrouted: AtomicU64,
}

impl Default for RouterStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterStats {
    pub fn new() -> Self {
        Self {
            delivered: std::array::from_fn(|_| AtomicU64::new(0)),
            dropped: std::array::from_fn(|_| AtomicU64::new(0)),
            handled: std::array::from_fn(|_| AtomicU64::new(0)),
            broadcasts: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
        }
    }

    pub fn record_delivered(&self, target: TargetId) {
        self.delivered[target.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record a refused push, returning the target's drop count
    pub fn record_dropped(&self, target: TargetId) -> u64 {
        self.dropped[target.index()].fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_handled(&self, target: TargetId) {
        self.handled[target.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record one broadcast call and whether anything received it
    pub fn record_broadcast(&self, delivered: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        if delivered == 0 {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Counters for one target
    pub fn target(&self, target: TargetId) -> TargetStats {
        let i = target.index();
        TargetStats {
            delivered: self.delivered[i].load(Ordering::Relaxed),
            dropped: self.dropped[i].load(Ordering::Relaxed),
            handled: self.handled[i].load(Ordering::Relaxed),
        }
    }

    /// Total broadcast calls
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Broadcasts that reached no target
    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    /// Drops summed over all targets
    pub fn total_dropped(&self) -> u64 {
        self.dropped.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_target() {
        let stats = RouterStats::new();
        stats.record_delivered(TargetId::Rgb);
        stats.record_delivered(TargetId::Rgb);
        assert_eq!(stats.record_dropped(TargetId::Log), 1);

        assert_eq!(stats.target(TargetId::Rgb).delivered, 2);
        assert_eq!(stats.target(TargetId::Rgb).dropped, 0);
        assert_eq!(stats.target(TargetId::Log).dropped, 1);
        assert_eq!(stats.total_dropped(), 1);
    }

    #[test]
    fn test_unrouted_broadcasts() {
        let stats = RouterStats::new();
        stats.record_broadcast(0);
        stats.record_broadcast(2);
        assert_eq!(stats.broadcasts(), 2);
        assert_eq!(stats.unrouted(), 1);
    }
}
