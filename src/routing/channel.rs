//! Bounded FIFO of pooled-message handles for one target

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::{
    error::{BusError, Result},
    pools::PoolMsg,
};

/// Per-target pointer channel
///
/// Each queued entry holds one reference to its slot; entries still queued
/// when the last channel clone is dropped release their references.
#[derive(Debug, Clone)]
pub struct PtrChannel {
    tx: Sender<PoolMsg>,
    rx: Receiver<PoolMsg>,
    capacity: usize,
}

impl PtrChannel {
    /// Create a channel holding at most `capacity` messages
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BusError::config_invalid(
                "queue_len",
                "Pointer channel capacity cannot be zero",
            ));
        }
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Ok(Self { tx, rx, capacity })
    }

    /// Push without waiting; hands the message back if the channel is full
    pub fn try_send(&self, msg: PoolMsg) -> std::result::Result<(), PoolMsg> {
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(msg) | TrySendError::Disconnected(msg) => msg,
        })
    }

    /// Pop without waiting
    pub fn try_recv(&self) -> Option<PoolMsg> {
        self.rx.try_recv().ok()
    }

    /// Pop, waiting up to `timeout` (`None` waits forever)
    pub fn recv_timeout(&self, timeout: Option<Duration>) -> Option<PoolMsg> {
        match timeout {
            Some(timeout) => match self.rx.recv_timeout(timeout) {
                Ok(msg) => Some(msg),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
            },
            None => self.rx.recv().ok(),
        }
    }

    /// Receiving end, for use in `select!`
    pub fn receiver(&self) -> &Receiver<PoolMsg> {
        &self.rx
    }

    /// Messages currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free positions
    pub fn spaces(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Drop every queued message, returning how many were released
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Whether two handles refer to the same channel
    pub fn same_channel(&self, other: &PtrChannel) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::{Pool, PoolConfig, PoolId};

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(PtrChannel::new(0).is_err());
    }

    #[test]
    fn test_full_channel_returns_message() {
        let pool = Pool::new(PoolId::Control, &PoolConfig::fixed(2, 16)).unwrap();
        let channel = PtrChannel::new(1).unwrap();

        let first = pool.try_alloc().unwrap().share();
        let second = pool.try_alloc().unwrap().share();
        assert!(channel.try_send(first).is_ok());
        assert!(channel.is_full());

        let returned = channel.try_send(second).unwrap_err();
        assert_eq!(returned.ref_count(), 1);
        drop(returned);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_drain_releases_references() {
        let pool = Pool::new(PoolId::Control, &PoolConfig::fixed(3, 16)).unwrap();
        let channel = PtrChannel::new(4).unwrap();
        for _ in 0..3 {
            channel.try_send(pool.try_alloc().unwrap().share()).unwrap();
        }
        assert_eq!(pool.available(), 0);
        assert_eq!(channel.drain(), 3);
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn test_recv_timeout_expires() {
        let channel = PtrChannel::new(1).unwrap();
        assert!(channel
            .recv_timeout(Some(Duration::from_millis(10)))
            .is_none());
    }
}
