//! The two-pool allocator
//!
//! Operations execute synchronously on the caller's thread; the allocator
//! owns no worker of its own.

use std::{path::Path, sync::Arc, time::Duration};

use crate::{
    error::{BusError, Result},
    ids::{SourceId, TargetId},
    routing::Router,
};

use super::{
    config::{AllocatorConfig, PoolId},
    pool::Pool,
    slot::{PoolMsg, PoolMsgMut, SlotId},
    stats::PoolStats,
};

/// Wait used by the self-test for blocking allocation and receive
const SELF_TEST_WAIT: Duration = Duration::from_millis(50);

/// Millisecond timeout meaning "wait forever" in [`PoolAllocator::alloc_blocking_ms`]
pub const WAIT_FOREVER_MS: u32 = u32::MAX;

/// Outcome of [`PoolAllocator::self_test`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelfTestReport {
    /// Streaming try_alloc, write and read back
    pub streaming: bool,
    /// Control blocking alloc, write and read back
    pub control: bool,
    /// Pointer broadcast through a scratch channel
    pub broadcast: bool,
}

impl SelfTestReport {
    pub fn passed(&self) -> bool {
        self.streaming && self.control && self.broadcast
    }
}

/// Streaming and control pools, sized once at init
#[derive(Debug)]
pub struct PoolAllocator {
    pools: [Arc<Pool>; 2],
    config: AllocatorConfig,
}

impl PoolAllocator {
    /// Carve both pools from `config`
    ///
    /// A construction failure is a boot-time fatal for the host.
    pub fn init(config: &AllocatorConfig) -> Result<Self> {
        let streaming = Pool::new(PoolId::Streaming, &config.streaming)?;
        let control = Pool::new(PoolId::Control, &config.control)?;
        log::info!(
            "dispatcher pools ready: streaming={} control={}",
            streaming.capacity(),
            control.capacity()
        );
        Ok(Self {
            pools: [streaming, control],
            config: *config,
        })
    }

    /// Defaults overlaid with the document at `path`, if any
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(&AllocatorConfig::load_or_default(path))
    }

    /// Sizing the pools were built from
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    pub fn pool(&self, id: PoolId) -> &Arc<Pool> {
        &self.pools[id.index()]
    }

    /// Allocate without waiting
    pub fn try_alloc(&self, id: PoolId) -> Option<PoolMsgMut> {
        self.pool(id).try_alloc()
    }

    /// Allocate, waiting up to `timeout` (`None` waits forever)
    pub fn alloc_blocking(&self, id: PoolId, timeout: Option<Duration>) -> Option<PoolMsgMut> {
        self.pool(id).alloc_blocking(timeout)
    }

    /// Millisecond variant of [`alloc_blocking`](Self::alloc_blocking);
    /// [`WAIT_FOREVER_MS`] waits forever
    pub fn alloc_blocking_ms(&self, id: PoolId, timeout_ms: u32) -> Option<PoolMsgMut> {
        let timeout = (timeout_ms != WAIT_FOREVER_MS)
            .then(|| Duration::from_millis(u64::from(timeout_ms)));
        self.alloc_blocking(id, timeout)
    }

    /// Like [`alloc_blocking`](Self::alloc_blocking), with the failure as an error
    pub fn alloc_checked(&self, id: PoolId, timeout: Option<Duration>) -> Result<PoolMsgMut> {
        match timeout {
            Some(Duration::ZERO) => self
                .try_alloc(id)
                .ok_or_else(|| BusError::pool_exhausted(id.name())),
            Some(wait) => self
                .alloc_blocking(id, Some(wait))
                .ok_or_else(|| BusError::alloc_timeout(id.name(), wait)),
            None => self
                .alloc_blocking(id, None)
                .ok_or_else(|| BusError::pool_exhausted(id.name())),
        }
    }

    fn checked_slot(&self, id: SlotId) -> Option<&Arc<Pool>> {
        let pool = self.pool(id.pool);
        if id.index < pool.capacity() {
            Some(pool)
        } else {
            log::warn!("{} pool: slot {} out of range", pool.name(), id);
            None
        }
    }

    /// Take one more reference to a raw slot
    ///
    /// # Safety
    /// The slot must currently be allocated and the caller must hold a
    /// reference to it; the new reference must later be released with
    /// [`unref_slot`](Self::unref_slot) or reclaimed with
    /// [`msg_from_raw`](Self::msg_from_raw).
    pub unsafe fn ref_slot(&self, id: SlotId) {
        if let Some(pool) = self.checked_slot(id) {
            pool.add_ref(id.index);
        }
    }

    /// Release one reference to a raw slot
    ///
    /// Releasing a slot that is already free is detected and counted in
    /// `double_free_count` without touching the free list.
    ///
    /// # Safety
    /// The caller must give up a reference it owns; releasing a reference
    /// that belongs to a live [`PoolMsg`] lets the slot be reused under it.
    pub unsafe fn unref_slot(&self, id: SlotId) {
        let _ = self.unref_slot_checked(id);
    }

    /// [`unref_slot`](Self::unref_slot) reporting what went wrong
    ///
    /// Returns `DoubleRelease` for a slot already back on its free list and
    /// `InvalidSlot` for an index outside the pool; neither changes pool state.
    ///
    /// # Safety
    /// Same contract as [`unref_slot`](Self::unref_slot).
    pub unsafe fn unref_slot_checked(&self, id: SlotId) -> Result<()> {
        match self.checked_slot(id) {
            Some(pool) => pool.release(id.index),
            None => Err(BusError::invalid_slot(id.to_string())),
        }
    }

    /// Rebuild a handle from a reference given up by [`PoolMsg::into_raw`]
    ///
    /// # Safety
    /// The caller must own the outstanding reference being reclaimed.
    pub unsafe fn msg_from_raw(&self, id: SlotId) -> Option<PoolMsg> {
        self.checked_slot(id)
            .map(|pool| PoolMsg::from_raw(Arc::clone(pool), id.index))
    }

    /// Current reference count of a slot
    pub fn ref_count(&self, id: SlotId) -> Option<u16> {
        self.pool(id.pool).ref_count(id.index)
    }

    /// Payload width of pool `id`
    pub fn payload_size(&self, id: PoolId) -> usize {
        self.pool(id).payload_size()
    }

    pub fn stats(&self, id: PoolId) -> PoolStats {
        self.pool(id).stats()
    }

    /// Log one summary line per pool
    pub fn log_stats(&self) {
        for id in PoolId::ALL {
            log::info!("{}", self.stats(id).summary());
        }
    }

    /// Write, read back and broadcast one message from each pool
    ///
    /// The broadcast leg runs through a scratch router so no registered
    /// consumer sees the test traffic.
    pub fn self_test(&self) -> SelfTestReport {
        let report = SelfTestReport {
            streaming: self.pattern_check(PoolId::Streaming, 0xA5, None),
            control: self.pattern_check(PoolId::Control, 0x5A, Some(SELF_TEST_WAIT)),
            broadcast: self.broadcast_check(),
        };

        if report.passed() {
            log::info!("pool self-test passed");
        } else {
            log::error!("pool self-test failed: {:?}", report);
        }
        report
    }

    fn pattern_check(&self, id: PoolId, pattern: u8, wait: Option<Duration>) -> bool {
        let msg = match wait {
            None => self.try_alloc(id),
            Some(wait) => self.alloc_blocking(id, Some(wait)),
        };
        let Some(mut msg) = msg else {
            log::error!("self-test: {} alloc failed", id);
            return false;
        };

        let len = msg.capacity().min(16);
        msg.payload_mut()[..len].fill(pattern);
        if msg.set_len(len).is_err() {
            return false;
        }
        let ok = msg.payload().iter().all(|b| *b == pattern);
        if !ok {
            log::error!("self-test: {} pattern 0x{:02X} mismatch", id, pattern);
        }
        ok
    }

    fn broadcast_check(&self) -> bool {
        const PATTERN: [u8; 8] = [0xCC; 8];

        let router = Router::new();
        let channel = match router.create_ptr_channel(TargetId::Log, 1) {
            Ok(channel) => channel,
            Err(e) => {
                log::error!("self-test: scratch channel failed: {}", e);
                return false;
            }
        };

        let Some(mut msg) = self.try_alloc(PoolId::Streaming) else {
            log::error!("self-test: broadcast alloc failed");
            return false;
        };
        msg.write(&PATTERN);
        msg.set_source(SourceId::PoolTest);
        msg.set_targets(TargetId::Log);

        if router.broadcast(msg.share(), TargetId::Log) != 1 {
            log::error!("self-test: broadcast not delivered");
            return false;
        }

        match channel.recv_timeout(Some(SELF_TEST_WAIT)) {
            Some(received) => {
                let ok = received.payload() == PATTERN;
                if !ok {
                    log::error!("self-test: broadcast payload mismatch");
                }
                ok
            }
            None => {
                log::error!("self-test: broadcast receive timed out");
                false
            }
        }
    }
}
