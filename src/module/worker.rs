//! Module worker: receive, copy, process, release, step

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{select, Receiver, Sender};

use crate::{
    error::{BusError, Result},
    ids::TargetId,
    pools::PoolMsg,
    routing::{PtrChannel, Router},
};

use super::{
    backpressure::BackpressureMonitor,
    descriptor::{ModuleDescriptor, ModuleHandler},
};

/// Counters for one running module
#[derive(Debug, Default)]
pub struct ModuleStats {
    processed: AtomicU64,
    steps: AtomicU64,
    backpressure_warnings: AtomicU64,
    panics: AtomicU64,
}

impl ModuleStats {
    /// Messages handed to `process`
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Completed periodic steps
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }

    pub fn backpressure_warnings(&self) -> u64 {
        self.backpressure_warnings.load(Ordering::Relaxed)
    }

    /// Panics caught from `process` or `step`
    pub fn panics(&self) -> u64 {
        self.panics.load(Ordering::Relaxed)
    }
}

/// Running module; dropping it leaves the worker running detached
#[derive(Debug)]
pub struct ModuleHandle {
    name: String,
    target: TargetId,
    channel: PtrChannel,
    stats: Arc<ModuleStats>,
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl ModuleHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    /// The channel the module consumes
    pub fn channel(&self) -> &PtrChannel {
        &self.channel
    }

    pub fn stats(&self) -> &ModuleStats {
        &self.stats
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the worker and wait for it to exit
    ///
    /// Messages still queued stay in the channel.
    pub fn shutdown(self) -> Result<()> {
        // Full means a stop request is already pending
        let _ = self.shutdown.try_send(());
        self.thread
            .join()
            .map_err(|_| BusError::setup(format!("module {} worker panicked", self.name)))
    }
}

/// Bring up a module on its own worker thread
///
/// Creates and registers the target's pointer channel when none exists yet.
/// A module with `queue_len == 0` and no registered channel is a
/// configuration error and is not started.
pub fn module_start<H: ModuleHandler>(
    router: &Router,
    desc: ModuleDescriptor<H>,
) -> Result<ModuleHandle> {
    let channel = match router.get_ptr_channel(desc.target) {
        Some(channel) => channel.clone(),
        None if desc.queue_len == 0 => {
            log::error!("module {}: no channel for {} and queue_len is 0", desc.name, desc.target);
            return Err(BusError::missing_channel(desc.name));
        }
        None => router.create_ptr_channel(desc.target, desc.queue_len)?,
    };

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
    let stats = Arc::new(ModuleStats::default());

    let worker = Worker {
        name: desc.name.clone(),
        channel: channel.clone(),
        handler: desc.handler,
        step_period: desc.step_period,
        stats: Arc::clone(&stats),
        monitor: BackpressureMonitor::new(),
        shutdown: shutdown_rx,
        _keepalive: shutdown_tx.clone(),
    };

    let mut builder = thread::Builder::new().name(format!("{}_ptr", desc.name));
    if let Some(stack_size) = desc.stack_size {
        builder = builder.stack_size(stack_size);
    }
    let thread = builder
        .spawn(move || worker.run())
        .map_err(|e| BusError::spawn(e, &desc.name))?;

    log::info!(
        "module {} started: target={} queue={} step={:?} priority={}",
        desc.name,
        desc.target,
        channel.capacity(),
        desc.step_period,
        desc.priority
    );

    Ok(ModuleHandle {
        name: desc.name,
        target: desc.target,
        channel,
        stats,
        shutdown: shutdown_tx,
        thread,
    })
}

struct Worker<H> {
    name: String,
    channel: PtrChannel,
    handler: H,
    step_period: Option<Duration>,
    stats: Arc<ModuleStats>,
    monitor: BackpressureMonitor,
    shutdown: Receiver<()>,
    // Keeps the shutdown channel connected after the handle is dropped
    _keepalive: Sender<()>,
}

impl<H: ModuleHandler> Worker<H> {
    fn run(mut self) {
        let inbox = self.channel.receiver().clone();
        let shutdown = self.shutdown.clone();
        // A period too long to schedule never fires
        let mut next_step = self
            .step_period
            .and_then(|period| Instant::now().checked_add(period));

        loop {
            let wake = match next_step {
                Some(deadline) => {
                    crossbeam_channel::after(deadline.saturating_duration_since(Instant::now()))
                }
                None => crossbeam_channel::never(),
            };

            self.check_backpressure();

            select! {
                recv(inbox) -> msg => {
                    if let Ok(msg) = msg {
                        self.handle(msg);
                    }
                }
                recv(shutdown) -> _ => break,
                recv(wake) -> _ => {}
            }

            if let (Some(period), Some(deadline)) = (self.step_period, next_step) {
                let now = Instant::now();
                if now >= deadline {
                    self.step();
                    // Resynchronise on the current time; missed periods are skipped
                    next_step = now.checked_add(period);
                }
            }
        }

        log::debug!("module {} stopped", self.name);
    }

    fn check_backpressure(&mut self) {
        let depth = self.channel.len();
        let capacity = self.channel.capacity();
        if self.monitor.observe(depth, capacity, Instant::now()) {
            self.stats.backpressure_warnings.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "module {}: queue backpressure {}/{} (consumer falling behind)",
                self.name,
                depth,
                capacity
            );
        }
    }

    fn handle(&mut self, msg: PoolMsg) {
        let value = msg.to_value();
        let handler = &mut self.handler;
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.process(&value)));
        drop(msg);

        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.stats.panics.fetch_add(1, Ordering::Relaxed);
            log::error!("module {}: process panicked; message released", self.name);
        }
    }

    fn step(&mut self) {
        let handler = &mut self.handler;
        if panic::catch_unwind(AssertUnwindSafe(|| handler.step())).is_err() {
            self.stats.panics.fetch_add(1, Ordering::Relaxed);
            log::error!("module {}: step panicked", self.name);
        }
        self.stats.steps.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::ValueMessage,
        module::FnHandler,
    };

    #[test]
    fn test_missing_channel_is_fatal() {
        let router = Router::new();
        let desc = ModuleDescriptor::new("usb", TargetId::Usb, FnHandler(|_: &ValueMessage| {}))
            .with_queue_len(0);
        let err = module_start(&router, desc).unwrap_err();
        assert!(matches!(err, BusError::MissingChannel { .. }));
        assert!(!router.has_ptr_channel(TargetId::Usb));
    }

    #[test]
    fn test_start_creates_channel() {
        let router = Router::new();
        let desc = ModuleDescriptor::new("rgb", TargetId::Rgb, FnHandler(|_: &ValueMessage| {}))
            .with_queue_len(3);
        let handle = module_start(&router, desc).unwrap();
        let registered = router.get_ptr_channel(TargetId::Rgb).unwrap();
        assert!(registered.same_channel(handle.channel()));
        assert_eq!(registered.capacity(), 3);
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_existing_channel_reused() {
        let router = Router::new();
        let existing = router.create_ptr_channel(TargetId::Uart, 5).unwrap();
        let desc = ModuleDescriptor::new("uart", TargetId::Uart, FnHandler(|_: &ValueMessage| {}))
            .with_queue_len(0);
        let handle = module_start(&router, desc).unwrap();
        assert!(existing.same_channel(handle.channel()));
        assert_eq!(handle.channel().capacity(), 5);
        handle.shutdown().unwrap();
    }

    #[test]
    fn test_unschedulable_step_period_keeps_worker_alive() {
        let router = Router::new();
        let handler = FnHandler(|_: &ValueMessage| {});
        let desc = ModuleDescriptor::new("oled", TargetId::OledIndev, handler)
            .with_step_period(Duration::MAX);
        let handle = module_start(&router, desc).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        assert_eq!(handle.stats().steps(), 0);
        handle.shutdown().unwrap();
    }
}
