//! Pool slots and the handles that own references to them
//!
//! A slot is a preallocated message record. Allocation hands out a
//! [`PoolMsgMut`], the only handle through which payload and metadata can be
//! written; it holds the slot's single reference. [`PoolMsgMut::share`] turns
//! it into a [`PoolMsg`], which is read-only: cloning takes a reference and
//! dropping releases one. The last release returns the slot to its pool.

use std::{
    cell::UnsafeCell,
    fmt,
    mem::ManuallyDrop,
    ptr,
    sync::{
        atomic::{AtomicBool, AtomicU16, Ordering},
        Arc,
    },
};

use crate::{
    error::{BusError, Result},
    ids::{SourceId, TargetSet},
    message::{MessageContext, ValueMessage},
};

use super::{config::PoolId, pool::Pool};

/// Names one slot of one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub pool: PoolId,
    pub index: usize,
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.pool, self.index)
    }
}

/// Mutable part of a slot
pub(crate) struct SlotBody {
    pub(crate) payload: Box<[u8]>,
    pub(crate) len: usize,
    pub(crate) source: SourceId,
    pub(crate) targets: TargetSet,
    pub(crate) context: MessageContext,
}

impl SlotBody {
    /// Clear metadata, keeping the payload storage
    pub(crate) fn reset(&mut self) {
        self.len = 0;
        self.source = SourceId::Undefined;
        self.targets = TargetSet::empty();
        self.context = None;
    }
}

/// One preallocated message record
pub(crate) struct Slot {
    pub(crate) refcount: AtomicU16,
    /// Written only while holding the owning pool's free-list lock
    pub(crate) on_free_list: AtomicBool,
    body: UnsafeCell<SlotBody>,
}

// The body is written only through a unique `PoolMsgMut` (refcount == 1) or
// by the pool while the slot is unreferenced; shared handles only read it.
unsafe impl Sync for Slot {}

impl Slot {
    pub(crate) fn new(payload_size: usize) -> Self {
        Self {
            refcount: AtomicU16::new(0),
            on_free_list: AtomicBool::new(true),
            body: UnsafeCell::new(SlotBody {
                payload: vec![0u8; payload_size].into_boxed_slice(),
                len: 0,
                source: SourceId::Undefined,
                targets: TargetSet::empty(),
                context: None,
            }),
        }
    }

    /// # Safety
    /// No handle may be writing to this slot.
    pub(crate) unsafe fn body(&self) -> &SlotBody {
        &*self.body.get()
    }

    /// # Safety
    /// The caller must have exclusive access: either the unique writer handle
    /// or the pool while the slot has no references.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn body_mut(&self) -> &mut SlotBody {
        &mut *self.body.get()
    }
}

/// One counted reference to a slot; releasing happens on drop
struct SlotRef {
    pool: Arc<Pool>,
    index: usize,
}

impl SlotRef {
    fn slot(&self) -> &Slot {
        self.pool.slot(self.index)
    }

    fn id(&self) -> SlotId {
        SlotId {
            pool: self.pool.id(),
            index: self.index,
        }
    }

    fn body(&self) -> &SlotBody {
        // SAFETY: a `SlotRef` only exists while the slot is referenced, and
        // mutable access requires the unique `PoolMsgMut`, borrowed mutably.
        unsafe { self.slot().body() }
    }

    fn into_raw(self) -> SlotId {
        let this = ManuallyDrop::new(self);
        let id = this.id();
        // SAFETY: `this` is never used again and its own drop is suppressed;
        // only the pool handle is dropped, the slot reference stays counted.
        drop(unsafe { ptr::read(&this.pool) });
        id
    }
}

impl Drop for SlotRef {
    fn drop(&mut self) {
        // A handle owns its reference; the pool logs anything amiss
        let _ = self.pool.release(self.index);
    }
}

/// Sole owner of a freshly allocated slot
///
/// Fill in payload and metadata, then call [`share`](Self::share) to get a
/// broadcastable [`PoolMsg`]. Dropping it returns the slot to the pool.
pub struct PoolMsgMut {
    inner: SlotRef,
}

impl PoolMsgMut {
    pub(crate) fn new(pool: Arc<Pool>, index: usize) -> Self {
        Self {
            inner: SlotRef { pool, index },
        }
    }

    fn body_mut(&mut self) -> &mut SlotBody {
        // SAFETY: this handle holds the only reference (refcount == 1) and
        // cannot be cloned, so no reader exists.
        unsafe { self.inner.slot().body_mut() }
    }

    pub fn id(&self) -> SlotId {
        self.inner.id()
    }

    pub fn pool_id(&self) -> PoolId {
        self.inner.pool.id()
    }

    /// Payload width of the slot
    pub fn capacity(&self) -> usize {
        self.inner.body().payload.len()
    }

    /// Whole payload buffer, regardless of the current length
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.body_mut().payload
    }

    /// Bytes written so far
    pub fn payload(&self) -> &[u8] {
        let body = self.inner.body();
        &body.payload[..body.len]
    }

    pub fn len(&self) -> usize {
        self.inner.body().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the message length after writing through `payload_mut`
    pub fn set_len(&mut self, len: usize) -> Result<()> {
        let capacity = self.capacity();
        if len > capacity {
            return Err(BusError::payload_too_large(len, capacity));
        }
        self.body_mut().len = len;
        Ok(())
    }

    /// Copy `data` in, truncating to the slot width; returns bytes kept
    pub fn write(&mut self, data: &[u8]) -> usize {
        let body = self.body_mut();
        let len = data.len().min(body.payload.len());
        body.payload[..len].copy_from_slice(&data[..len]);
        body.len = len;
        len
    }

    pub fn source(&self) -> SourceId {
        self.inner.body().source
    }

    pub fn set_source(&mut self, source: SourceId) {
        self.body_mut().source = source;
    }

    pub fn targets(&self) -> TargetSet {
        self.inner.body().targets
    }

    pub fn set_targets(&mut self, targets: impl Into<TargetSet>) {
        self.body_mut().targets = targets.into();
    }

    pub fn set_context(&mut self, context: MessageContext) {
        self.body_mut().context = context;
    }

    /// Freeze the message so it can be shared with consumers
    pub fn share(self) -> PoolMsg {
        PoolMsg { inner: self.inner }
    }
}

impl fmt::Debug for PoolMsgMut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolMsgMut")
            .field("slot", &self.id())
            .field("len", &self.len())
            .finish()
    }
}

/// Shared, read-only reference to a pooled message
///
/// `clone` takes a reference, `drop` releases one.
pub struct PoolMsg {
    inner: SlotRef,
}

impl PoolMsg {
    pub fn id(&self) -> SlotId {
        self.inner.id()
    }

    pub fn pool_id(&self) -> PoolId {
        self.inner.pool.id()
    }

    pub fn payload(&self) -> &[u8] {
        let body = self.inner.body();
        &body.payload[..body.len]
    }

    pub fn len(&self) -> usize {
        self.inner.body().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source(&self) -> SourceId {
        self.inner.body().source
    }

    pub fn targets(&self) -> TargetSet {
        self.inner.body().targets
    }

    pub fn context(&self) -> &MessageContext {
        &self.inner.body().context
    }

    /// Current number of references to the slot
    pub fn ref_count(&self) -> u16 {
        self.inner.slot().refcount.load(Ordering::SeqCst)
    }

    /// Copy metadata and payload into a stack-local value message
    pub fn to_value(&self) -> ValueMessage {
        let body = self.inner.body();
        let mut value = ValueMessage::new(body.source, body.targets);
        value.set_payload(&body.payload[..body.len]);
        value.context = body.context.clone();
        value
    }

    /// Give up the handle without releasing its reference
    ///
    /// The reference must later be released with
    /// [`PoolAllocator::unref_slot`](super::PoolAllocator::unref_slot) or
    /// reclaimed with [`PoolAllocator::msg_from_raw`](super::PoolAllocator::msg_from_raw).
    pub fn into_raw(self) -> SlotId {
        self.inner.into_raw()
    }

    /// # Safety
    /// The caller must own one outstanding reference to slot `index` of
    /// `pool` and the slot must not have a live `PoolMsgMut`.
    pub(crate) unsafe fn from_raw(pool: Arc<Pool>, index: usize) -> Self {
        Self {
            inner: SlotRef { pool, index },
        }
    }
}

impl Clone for PoolMsg {
    fn clone(&self) -> Self {
        self.inner.pool.add_ref(self.inner.index);
        Self {
            inner: SlotRef {
                pool: Arc::clone(&self.inner.pool),
                index: self.inner.index,
            },
        }
    }
}

impl fmt::Debug for PoolMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolMsg")
            .field("slot", &self.id())
            .field("source", &self.source())
            .field("targets", &self.targets())
            .field("len", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

impl AsRef<[u8]> for PoolMsg {
    fn as_ref(&self) -> &[u8] {
        self.payload()
    }
}
