//! Fixed-capacity, reference-counted message pools
//!
//! Two pools are carved out at init: `streaming` for high-rate sensor data
//! and `control` for commands and status. Capacity is derived once from
//! [`PoolConfig`] and never changes.

pub mod allocator;
pub mod config;
pub mod gate;
pub mod pool;
pub mod slot;
pub mod stats;

// Re-export main types
pub use allocator::{PoolAllocator, SelfTestReport, WAIT_FOREVER_MS};
pub use config::{compute_entries, AllocatorConfig, PoolConfig, PoolId, DEFAULT_CONFIG_PATH};
pub use gate::AdmissionGate;
pub use pool::Pool;
pub use slot::{PoolMsg, PoolMsgMut, SlotId};
pub use stats::{AtomicPoolStats, PoolStats};
