//! Value-copy message form handed to peripheral handlers

use std::{any::Any, fmt, sync::Arc};

use crate::ids::{SourceId, TargetSet, MAX_MESSAGE_SIZE};

/// Opaque per-message context supplied by the producer
pub type MessageContext = Option<Arc<dyn Any + Send + Sync>>;

/// A self-contained copy of a message
///
/// Module workers unwrap every pooled message into one of these on their own
/// stack before calling the peripheral's handler, so the handler never holds
/// a pool slot. The legacy synchronous handler path passes these directly.
#[derive(Clone)]
pub struct ValueMessage {
    /// Producer of the message
    pub source: SourceId,
    /// Destinations the producer addressed
    pub targets: TargetSet,
    /// Producer context, if any
    pub context: MessageContext,
    len: usize,
    data: [u8; MAX_MESSAGE_SIZE],
}

impl ValueMessage {
    /// Create an empty message
    pub fn new(source: SourceId, targets: impl Into<TargetSet>) -> Self {
        Self {
            source,
            targets: targets.into(),
            context: None,
            len: 0,
            data: [0; MAX_MESSAGE_SIZE],
        }
    }

    /// Create a message carrying `payload`, truncated to `MAX_MESSAGE_SIZE`
    pub fn with_payload(source: SourceId, targets: impl Into<TargetSet>, payload: &[u8]) -> Self {
        let mut msg = Self::new(source, targets);
        msg.set_payload(payload);
        msg
    }

    /// Replace the payload, returning the number of bytes kept
    pub fn set_payload(&mut self, payload: &[u8]) -> usize {
        let len = payload.len().min(MAX_MESSAGE_SIZE);
        self.data[..len].copy_from_slice(&payload[..len]);
        self.len = len;
        len
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Downcast the producer context
    pub fn context_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context.as_deref().and_then(|ctx| ctx.downcast_ref::<T>())
    }
}

impl fmt::Debug for ValueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueMessage")
            .field("source", &self.source)
            .field("targets", &self.targets)
            .field("len", &self.len)
            .field("has_context", &self.context.is_some())
            .finish()
    }
}
