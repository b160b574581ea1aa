//! Per-target routing table and fan-out
//!
//! The table is filled during bring-up: every registry entry can be written
//! exactly once, through a shared reference, and is read without locking by
//! every producer afterwards.

use std::{
    fmt,
    sync::{Arc, OnceLock},
};

use crate::{
    error::{BusError, Result},
    ids::{TargetId, TargetSet, TARGET_COUNT},
    message::ValueMessage,
    pools::PoolMsg,
};

use super::{channel::PtrChannel, stats::RouterStats};

/// Synchronous per-target callback for value-copy messages
pub trait MessageHandler: Send + Sync {
    fn handle(&self, msg: &ValueMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(&ValueMessage) + Send + Sync,
{
    fn handle(&self, msg: &ValueMessage) {
        self(msg)
    }
}

/// Routing table shared by every producer and consumer
pub struct Router {
    handlers: [OnceLock<Arc<dyn MessageHandler>>; TARGET_COUNT],
    channels: [OnceLock<PtrChannel>; TARGET_COUNT],
    stats: RouterStats,
}

impl Router {
    /// Create an empty routing table
    pub fn new() -> Self {
        Self {
            handlers: std::array::from_fn(|_| OnceLock::new()),
            channels: std::array::from_fn(|_| OnceLock::new()),
            stats: RouterStats::new(),
        }
    }

    /// Register the value-message handler for `target`
    pub fn register_handler(
        &self,
        target: TargetId,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        self.handlers[target.index()]
            .set(handler)
            .map_err(|_| BusError::already_registered(target.name(), "handler"))
    }

    /// Register an existing pointer channel for `target`
    pub fn register_ptr_channel(&self, target: TargetId, channel: PtrChannel) -> Result<PtrChannel> {
        let slot = &self.channels[target.index()];
        slot.set(channel)
            .map_err(|_| BusError::already_registered(target.name(), "pointer channel"))?;
        slot.get()
            .cloned()
            .ok_or_else(|| BusError::setup(format!("channel for {} vanished", target)))
    }

    /// Create a pointer channel of `capacity` entries and register it
    pub fn create_ptr_channel(&self, target: TargetId, capacity: usize) -> Result<PtrChannel> {
        self.register_ptr_channel(target, PtrChannel::new(capacity)?)
    }

    pub fn has_ptr_channel(&self, target: TargetId) -> bool {
        self.channels[target.index()].get().is_some()
    }

    pub fn get_ptr_channel(&self, target: TargetId) -> Option<&PtrChannel> {
        self.channels[target.index()].get()
    }

    pub fn has_handler(&self, target: TargetId) -> bool {
        self.handlers[target.index()].get().is_some()
    }

    /// Deliver `msg` to the pointer channel of every target in `targets`
    ///
    /// Each successful push holds its own reference; the caller's reference is
    /// released before returning, so a message nobody accepted goes straight
    /// back to its pool. Returns the number of deliveries.
    pub fn broadcast(&self, msg: PoolMsg, targets: impl Into<TargetSet>) -> usize {
        let mut delivered = 0;

        for target in targets.into() {
            let Some(channel) = self.get_ptr_channel(target) else {
                continue;
            };
            // Reference taken before the push so a fast consumer cannot free
            // the slot underneath us.
            match channel.try_send(msg.clone()) {
                Ok(()) => {
                    delivered += 1;
                    self.stats.record_delivered(target);
                }
                Err(refused) => {
                    drop(refused);
                    let drops = self.stats.record_dropped(target);
                    log::warn!(
                        "delivery dropped: target={} slot={} queue={}/{} (drops={})",
                        target,
                        msg.id(),
                        channel.len(),
                        channel.capacity(),
                        drops
                    );
                }
            }
        }

        self.stats.record_broadcast(delivered);
        drop(msg);
        delivered
    }

    /// Call the registered handler of every addressed target, synchronously
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch_value(&self, msg: &ValueMessage) -> usize {
        let mut handled = 0;
        for target in msg.targets {
            if let Some(handler) = self.handlers[target.index()].get() {
                handler.handle(msg);
                self.stats.record_handled(target);
                handled += 1;
            }
        }
        handled
    }

    /// Log channel depth for each target, to locate a backlogged consumer
    pub fn log_target_depths(&self, targets: TargetSet) {
        for target in targets {
            log::warn!(" {}", self.depth_line(target));
        }
    }

    fn depth_line(&self, target: TargetId) -> String {
        match self.get_ptr_channel(target) {
            None => format!("target {}: no pointer channel registered", target),
            Some(channel) => format!(
                "target {}: queue depth {}/{} (spaces={})",
                target,
                channel.len(),
                channel.capacity(),
                channel.spaces()
            ),
        }
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels: Vec<_> = TargetId::ALL
            .iter()
            .filter(|t| self.has_ptr_channel(**t))
            .collect();
        let handlers: Vec<_> = TargetId::ALL
            .iter()
            .filter(|t| self.has_handler(**t))
            .collect();
        f.debug_struct("Router")
            .field("channels", &channels)
            .field("handlers", &handlers)
            .finish()
    }
}
