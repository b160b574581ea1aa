//! Peripheral module scaffold
//!
//! A module owns one worker thread that consumes its target's pointer
//! channel, hands each message to a [`ModuleHandler`] as a value copy and
//! releases the pooled slot, with an optional periodic `step`.

pub mod backpressure;
pub mod descriptor;
pub mod worker;

pub use backpressure::BackpressureMonitor;
pub use descriptor::{FnHandler, ModuleDescriptor, ModuleHandler, DEFAULT_QUEUE_LEN};
pub use worker::{module_start, ModuleHandle, ModuleStats};
