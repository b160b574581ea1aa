//! A single fixed-capacity message pool

use std::{
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    error::{BusError, Result},
    ids::MAX_MESSAGE_SIZE,
};

use super::{
    config::{PoolConfig, PoolId, MIN_PAYLOAD_SIZE},
    gate::AdmissionGate,
    slot::{PoolMsgMut, Slot},
    stats::{AtomicPoolStats, PoolStats},
};

/// Entry dumps in consistency checks are skipped above this many slots
const DUMP_ENTRY_LIMIT: usize = 64;

/// State guarded by the pool lock
#[derive(Debug)]
struct FreeList {
    /// LIFO stack of free slot indices
    stack: Vec<usize>,
    in_use: usize,
}

/// Fixed array of slots with a free list and an admission gate
///
/// `free.len() + in_use == capacity` holds whenever the lock is held.
pub struct Pool {
    id: PoolId,
    slots: Box<[Slot]>,
    free: Mutex<FreeList>,
    gate: AdmissionGate,
    payload_size: usize,
    stats: AtomicPoolStats,
}

impl Pool {
    /// Carve a pool from `config`, clamping out-of-range fields first
    pub fn new(id: PoolId, config: &PoolConfig) -> Result<Arc<Self>> {
        let sanitized = config.sanitized();
        if sanitized.payload_size != config.payload_size {
            log::warn!(
                "{} pool payload_size {} outside [{}, {}]; using {}",
                id,
                config.payload_size,
                MIN_PAYLOAD_SIZE,
                MAX_MESSAGE_SIZE,
                sanitized.payload_size
            );
        }
        let entries = sanitized.entries();
        let payload_size = sanitized.payload_size;

        let mut slots = Vec::new();
        slots.try_reserve_exact(entries).map_err(|e| {
            BusError::setup(format!("{} pool allocation failed (entries={}): {}", id, entries, e))
        })?;
        let mut stack = Vec::new();
        stack.try_reserve_exact(entries).map_err(|e| {
            BusError::setup(format!("{} pool free list allocation failed: {}", id, e))
        })?;

        for index in 0..entries {
            slots.push(Slot::new(payload_size));
            // Pushed in order so the lowest index is popped last
            stack.push(index);
        }

        log::info!(
            "{} pool: entries={} payload={} entry_size={}",
            id,
            entries,
            payload_size,
            std::mem::size_of::<Slot>() + payload_size
        );

        Ok(Arc::new(Self {
            id,
            slots: slots.into_boxed_slice(),
            free: Mutex::new(FreeList { stack, in_use: 0 }),
            gate: AdmissionGate::new(entries),
            payload_size,
            stats: AtomicPoolStats::new(),
        }))
    }

    pub fn id(&self) -> PoolId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.id.name()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Payload width per slot
    pub fn payload_size(&self) -> usize {
        self.payload_size
    }

    pub(crate) fn slot(&self, index: usize) -> &Slot {
        &self.slots[index]
    }

    /// Allocate without waiting
    pub fn try_alloc(self: &Arc<Self>) -> Option<PoolMsgMut> {
        if !self.gate.try_acquire() {
            let failures = self.stats.record_failure();
            log::warn!("{} pool exhausted (failures={})", self.name(), failures);
            return None;
        }
        self.take_slot()
    }

    /// Allocate, waiting up to `timeout` for a slot (`None` waits forever)
    pub fn alloc_blocking(self: &Arc<Self>, timeout: Option<Duration>) -> Option<PoolMsgMut> {
        if !self.gate.acquire_timeout(timeout) {
            let failures = self.stats.record_failure();
            log::warn!("{} pool alloc timed out (failures={})", self.name(), failures);
            return None;
        }
        self.take_slot()
    }

    /// Pop a slot after a gate credit has been taken
    fn take_slot(self: &Arc<Self>) -> Option<PoolMsgMut> {
        let popped = {
            let mut free = self.free.lock();
            let index = free.stack.pop();
            if let Some(index) = index {
                let slot = &self.slots[index];
                slot.on_free_list.store(false, Ordering::SeqCst);
                slot.refcount.store(1, Ordering::SeqCst);
                free.in_use += 1;
                self.stats.record_allocation(free.in_use);
            }
            index
        };

        let Some(index) = popped else {
            log::error!(
                "{} pool internal empty despite gate credit (capacity={})",
                self.name(),
                self.capacity()
            );
            self.consistency_check();
            self.gate.release();
            return None;
        };

        // SAFETY: the slot was just taken off the free list with refcount 1;
        // no other handle refers to it.
        unsafe { self.slots[index].body_mut().reset() };
        Some(PoolMsgMut::new(Arc::clone(self), index))
    }

    /// Take one more reference to slot `index`
    pub(crate) fn add_ref(&self, index: usize) {
        let prev = self.slots[index].refcount.fetch_add(1, Ordering::SeqCst);
        if prev == 0 || prev == u16::MAX {
            log::warn!(
                "{} pool: ref on slot {} with suspicious count {}",
                self.name(),
                index,
                prev
            );
        }
    }

    /// Drop one reference to slot `index`, returning it to the free list
    /// when the count reaches zero
    ///
    /// A slot that is already on the free list is left alone and reported as
    /// `DoubleRelease`.
    pub(crate) fn release(&self, index: usize) -> Result<()> {
        let slot = &self.slots[index];
        let previous = slot
            .refcount
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));

        // Err means the count was already zero: let the free-list check decide
        match previous {
            Ok(1) | Err(_) => self.return_to_pool(index),
            Ok(prev) => {
                let remaining = (prev - 1) as usize;
                if remaining > self.capacity() {
                    log::warn!(
                        "{} pool: suspicious ref value after unref: {} for slot {}",
                        self.name(),
                        remaining,
                        index
                    );
                }
                Ok(())
            }
        }
    }

    fn return_to_pool(&self, index: usize) -> Result<()> {
        let slot = &self.slots[index];
        {
            let mut free = self.free.lock();
            if slot.on_free_list.load(Ordering::SeqCst) {
                let count = self.stats.record_double_free();
                // SAFETY: the slot is on the free list; nobody writes to it.
                let source = unsafe { slot.body().source };
                log::warn!(
                    "double-unref detected: pool={} slot={} source={} thread={} (skipping push, double_free_count={})",
                    self.name(),
                    index,
                    source,
                    std::thread::current().name().unwrap_or("(unnamed)"),
                    count
                );
                return Err(BusError::double_release(self.name(), index));
            }

            // SAFETY: the refcount reached zero and the slot is not yet on the
            // free list, so no handle refers to it.
            unsafe { slot.body_mut().context = None };
            slot.on_free_list.store(true, Ordering::SeqCst);
            free.stack.push(index);
            free.in_use = free.in_use.saturating_sub(1);
            self.stats.record_release();
        }
        self.gate.release();
        Ok(())
    }

    /// Log the free list and per-entry state, bumping `corrupt_checks`
    pub fn consistency_check(&self) -> usize {
        let free = self.free.lock();
        let free_count = free.stack.len();
        log::warn!(
            "{} pool consistency: free_count={} in_use={} entry_count={} double_free_count={}",
            self.name(),
            free_count,
            free.in_use,
            self.capacity(),
            self.stats.double_free_count.load(Ordering::Relaxed)
        );
        if self.capacity() <= DUMP_ENTRY_LIMIT {
            for (i, slot) in self.slots.iter().enumerate() {
                log::warn!(
                    " entry[{}] ref={} on_free_list={}",
                    i,
                    slot.refcount.load(Ordering::SeqCst),
                    slot.on_free_list.load(Ordering::SeqCst)
                );
            }
        }
        self.stats.record_corrupt_check();
        free_count
    }

    /// Reference count of slot `index`
    pub fn ref_count(&self, index: usize) -> Option<u16> {
        self.slots
            .get(index)
            .map(|slot| slot.refcount.load(Ordering::SeqCst))
    }

    /// Whether slot `index` is currently on the free list
    pub fn is_free(&self, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.on_free_list.load(Ordering::SeqCst))
    }

    /// Slots available for allocation
    pub fn available(&self) -> usize {
        self.free.lock().stack.len()
    }

    pub fn in_use(&self) -> usize {
        self.free.lock().in_use
    }

    /// Snapshot of the counters, taken under the lock
    pub fn stats(&self) -> PoolStats {
        let mut stats = {
            let free = self.free.lock();
            PoolStats {
                name: self.name(),
                capacity: self.capacity(),
                payload_size: self.payload_size,
                in_use: free.in_use,
                free: free.stack.len(),
                ..Default::default()
            }
        };
        self.stats.fill(&mut stats);
        stats
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("capacity", &self.capacity())
            .field("payload_size", &self.payload_size)
            .finish()
    }
}
