//! Counting admission gate bounding outstanding allocations

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counting semaphore holding one credit per free slot
#[derive(Debug)]
pub struct AdmissionGate {
    credits: Mutex<usize>,
    available: Condvar,
    capacity: usize,
}

impl AdmissionGate {
    /// Create a gate with `capacity` credits, all available
    pub fn new(capacity: usize) -> Self {
        Self {
            credits: Mutex::new(capacity),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Take a credit if one is available right now
    pub fn try_acquire(&self) -> bool {
        let mut credits = self.credits.lock();
        if *credits == 0 {
            return false;
        }
        *credits -= 1;
        true
    }

    /// Take a credit, waiting up to `timeout` (`None` waits forever)
    ///
    /// A timeout too large to form a deadline is treated as forever.
    pub fn acquire_timeout(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut credits = self.credits.lock();
        match deadline {
            None => {
                while *credits == 0 {
                    self.available.wait(&mut credits);
                }
            }
            Some(deadline) => {
                while *credits == 0 {
                    if self.available.wait_until(&mut credits, deadline).timed_out() {
                        if *credits == 0 {
                            return false;
                        }
                        break;
                    }
                }
            }
        }
        *credits -= 1;
        true
    }

    /// Return a credit and wake one waiter
    pub fn release(&self) {
        let mut credits = self.credits.lock();
        debug_assert!(*credits < self.capacity, "admission gate over-released");
        *credits = (*credits + 1).min(self.capacity);
        drop(credits);
        self.available.notify_one();
    }

    /// Credits currently available
    pub fn available(&self) -> usize {
        *self.credits.lock()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
