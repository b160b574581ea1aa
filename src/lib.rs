//! # Switchboard - Pooled Inter-Module Message Bus
//!
//! Switchboard moves messages between the peripheral modules of an embedded
//! system. Producers draw a fixed-size slot from one of two preallocated
//! pools, fill it in place, and fan it out by reference to every addressed
//! target; the last consumer to let go returns the slot to its pool.
//!
//! ## Features
//!
//! - **Fixed-capacity pools**: `streaming` and `control`, sized once from a
//!   fraction/credit formula, optionally overridden by a JSON document
//! - **Admission gate**: allocation never exceeds the pool; immediate-fail
//!   and bounded-wait variants
//! - **Reference-counted slots**: zero-copy fan-out, release on last drop,
//!   double-release detection on the raw path
//! - **Per-target routing**: value handlers and bounded pointer channels,
//!   registered once at bring-up
//! - **Module scaffold**: one worker per peripheral with a periodic step and
//!   rate-limited backpressure warnings
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  alloc   ┌─────────────────────────────┐
//! │   Producer   │ ───────► │ PoolAllocator               │
//! └──────┬───────┘          │  streaming │ control        │
//!        │ broadcast        └─────────────────────────────┘
//!        ▼                               ▲ last release
//! ┌──────────────────────────────┐       │
//! │ Router                       │       │
//! │  target ─► PtrChannel (FIFO) ├──► Module worker
//! │  target ─► MessageHandler    │   (copy, process, release, step)
//! └──────────────────────────────┘
//! ```

pub mod bus;
pub mod error;
pub mod ids;
pub mod message;
pub mod module;
pub mod pools;
pub mod routing;

// Main API re-exports
pub use bus::{MessageBus, SendParams, SendReceipt, StatsReporter};
pub use error::{BusError, Result};
pub use ids::{SourceId, TargetId, TargetSet, MAX_MESSAGE_SIZE, TARGET_COUNT};
pub use message::{MessageContext, ValueMessage};
pub use module::{
    module_start, BackpressureMonitor, FnHandler, ModuleDescriptor, ModuleHandle, ModuleHandler,
    ModuleStats,
};
pub use pools::{
    compute_entries, AllocatorConfig, Pool, PoolAllocator, PoolConfig, PoolId, PoolMsg,
    PoolMsgMut, PoolStats, SelfTestReport, SlotId,
};
pub use routing::{MessageHandler, PtrChannel, Router, RouterStats, TargetStats};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 3;
pub const VERSION_PATCH: u32 = 0;
