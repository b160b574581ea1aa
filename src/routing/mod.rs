//! Target-addressed routing
//!
//! Every target may own a synchronous value handler, a bounded pointer
//! channel for pooled messages, or both.

pub mod channel;
pub mod router;
pub mod stats;

pub use channel::PtrChannel;
pub use router::{MessageHandler, Router};
pub use stats::{RouterStats, TargetStats};
