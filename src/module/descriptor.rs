//! Static description of a peripheral module

use std::time::Duration;

use crate::{ids::TargetId, message::ValueMessage};

/// Default pointer channel depth when a module creates its own channel
pub const DEFAULT_QUEUE_LEN: usize = 8;

/// Behaviour of one peripheral module
///
/// `process` runs on the module's worker for every received message, with a
/// value copy of the pooled message; the pooled slot is released afterwards
/// whatever `process` does. `step` runs on the configured period.
pub trait ModuleHandler: Send + 'static {
    fn process(&mut self, msg: &ValueMessage);

    fn step(&mut self) {}
}

/// Adapts a closure into a [`ModuleHandler`] without a periodic step
#[derive(Debug, Clone)]
pub struct FnHandler<F>(pub F);

impl<F> ModuleHandler for FnHandler<F>
where
    F: FnMut(&ValueMessage) + Send + 'static,
{
    fn process(&mut self, msg: &ValueMessage) {
        (self.0)(msg)
    }
}

/// Everything `module_start` needs to bring a module up
#[derive(Debug, Clone)]
pub struct ModuleDescriptor<H> {
    /// Module name; the worker thread is named `<name>_ptr`
    pub name: String,
    /// Target whose pointer channel the module consumes
    pub target: TargetId,
    /// Depth of the channel created when none is registered yet.
    /// Zero means the channel must already exist.
    pub queue_len: usize,
    /// Worker stack size hint
    pub stack_size: Option<usize>,
    /// Scheduling priority hint; logged, not enforced
    pub priority: u8,
    /// Period of `step`; `None` disables it
    pub step_period: Option<Duration>,
    pub handler: H,
}

impl<H: ModuleHandler> ModuleDescriptor<H> {
    pub fn new(name: impl Into<String>, target: TargetId, handler: H) -> Self {
        Self {
            name: name.into(),
            target,
            queue_len: DEFAULT_QUEUE_LEN,
            stack_size: None,
            priority: 0,
            step_period: None,
            handler,
        }
    }

    pub fn with_queue_len(mut self, queue_len: usize) -> Self {
        self.queue_len = queue_len;
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Run `step` every `period`; a zero period disables it
    pub fn with_step_period(mut self, period: Duration) -> Self {
        self.step_period = (!period.is_zero()).then_some(period);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_builder() {
        let desc = ModuleDescriptor::new("rgb", TargetId::Rgb, FnHandler(|_: &ValueMessage| {}))
            .with_queue_len(4)
            .with_stack_size(64 * 1024)
            .with_step_period(Duration::from_millis(20));
        assert_eq!(desc.queue_len, 4);
        assert_eq!(desc.stack_size, Some(64 * 1024));
        assert_eq!(desc.step_period, Some(Duration::from_millis(20)));

        let desc = desc.with_step_period(Duration::ZERO);
        assert_eq!(desc.step_period, None);
    }
}
