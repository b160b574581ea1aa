//! Allocator and router bundled for peripheral code

use std::{
    path::Path,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{RecvTimeoutError, Sender};

use crate::{
    error::{BusError, Result},
    ids::{SourceId, TargetSet},
    message::{MessageContext, ValueMessage},
    module::{module_start, ModuleDescriptor, ModuleHandle, ModuleHandler},
    pools::{AllocatorConfig, PoolAllocator, PoolId, SelfTestReport, SlotId},
    routing::Router,
};

/// Everything needed to send one pooled message
#[derive(Debug, Clone)]
pub struct SendParams<'a> {
    pub pool: PoolId,
    pub source: SourceId,
    pub targets: TargetSet,
    pub data: &'a [u8],
    pub context: MessageContext,
    /// How long to wait for a free slot; `None` fails at once
    pub wait: Option<Duration>,
}

impl<'a> SendParams<'a> {
    pub fn new(pool: PoolId, source: SourceId, targets: impl Into<TargetSet>, data: &'a [u8]) -> Self {
        Self {
            pool,
            source,
            targets: targets.into(),
            data,
            context: None,
            wait: None,
        }
    }

    pub fn with_context(mut self, context: MessageContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }
}

/// What happened to a sent message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// Slot the message was written to
    pub slot: SlotId,
    /// Channels that accepted it
    pub delivered: usize,
    /// Payload was cut to the pool's payload width
    pub truncated: bool,
}

/// Pool allocator plus routing table
///
/// Built once at bring-up and shared by reference (or `Arc`) with every
/// producer and module.
#[derive(Debug)]
pub struct MessageBus {
    allocator: PoolAllocator,
    router: Router,
}

impl MessageBus {
    pub fn new(config: &AllocatorConfig) -> Result<Self> {
        Ok(Self {
            allocator: PoolAllocator::init(config)?,
            router: Router::new(),
        })
    }

    /// Defaults overlaid with the document at `path`, if any
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            allocator: PoolAllocator::from_config_file(path)?,
            router: Router::new(),
        })
    }

    pub fn allocator(&self) -> &PoolAllocator {
        &self.allocator
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Allocate, fill and broadcast in one call
    ///
    /// Returns `None` when no slot could be allocated; the per-target queue
    /// depths are logged so the backlogged consumer can be found.
    pub fn send(
        &self,
        pool: PoolId,
        source: SourceId,
        targets: impl Into<TargetSet>,
        data: &[u8],
        context: MessageContext,
    ) -> Option<SendReceipt> {
        self.send_params(&SendParams::new(pool, source, targets, data).with_context(context))
    }

    pub fn send_params(&self, params: &SendParams<'_>) -> Option<SendReceipt> {
        let msg = match params.wait {
            None => self.allocator.try_alloc(params.pool),
            Some(wait) => self.allocator.alloc_blocking(params.pool, Some(wait)),
        };
        let Some(mut msg) = msg else {
            log::warn!(
                "send from {}: {} pool alloc failed; target queue depths:",
                params.source,
                params.pool
            );
            self.router.log_target_depths(params.targets);
            return None;
        };

        let written = msg.write(params.data);
        let truncated = written < params.data.len();
        if truncated {
            log::warn!(
                "send from {}: payload {} truncated to {} bytes",
                params.source,
                params.data.len(),
                written
            );
        }
        msg.set_source(params.source);
        msg.set_targets(params.targets);
        msg.set_context(params.context.clone());

        let slot = msg.id();
        let delivered = self.router.broadcast(msg.share(), params.targets);
        Some(SendReceipt {
            slot,
            delivered,
            truncated,
        })
    }

    /// [`send_params`](Self::send_params) with failures as errors
    ///
    /// A message that reached no channel at all is `DeliveryDropped`.
    pub fn send_checked(&self, params: &SendParams<'_>) -> Result<SendReceipt> {
        let receipt = self.send_params(params).ok_or_else(|| match params.wait {
            Some(wait) => BusError::alloc_timeout(params.pool.name(), wait),
            None => BusError::pool_exhausted(params.pool.name()),
        })?;
        if receipt.delivered == 0 {
            let target = params
                .targets
                .iter()
                .next()
                .map_or("none", |t| t.name());
            return Err(BusError::delivery_dropped(target));
        }
        Ok(receipt)
    }

    /// Hand a value message to the handler of every addressed target
    pub fn dispatch_value(&self, msg: &ValueMessage) -> usize {
        self.router.dispatch_value(msg)
    }

    pub fn start_module<H: ModuleHandler>(&self, desc: ModuleDescriptor<H>) -> Result<ModuleHandle> {
        module_start(&self.router, desc)
    }

    pub fn self_test(&self) -> SelfTestReport {
        self.allocator.self_test()
    }

    pub fn log_stats(&self) {
        self.allocator.log_stats()
    }

    /// Log pool statistics every `period` until the reporter is stopped
    pub fn spawn_stats_reporter(self: &Arc<Self>, period: Duration) -> Result<StatsReporter> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let bus = Arc::clone(self);
        let thread = thread::Builder::new()
            .name("pool_stats".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => bus.log_stats(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| BusError::spawn(e, "pool_stats"))?;

        Ok(StatsReporter {
            stop: stop_tx,
            thread,
        })
    }
}

/// Background statistics logger; dropping it stops the thread
#[derive(Debug)]
pub struct StatsReporter {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

impl StatsReporter {
    /// Stop logging and wait for the thread to exit
    pub fn stop(self) {
        let _ = self.stop.try_send(());
        if self.thread.join().is_err() {
            log::error!("stats reporter panicked");
        }
    }
}
