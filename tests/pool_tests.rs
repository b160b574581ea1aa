//! Pool allocator behaviour: release, exhaustion, blocking and double release

use std::{
    collections::HashSet,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use switchboard::{
    AllocatorConfig, BusError, MessageBus, PoolAllocator, PoolConfig, PoolId, SendParams,
    SourceId, TargetId,
};

fn allocator(entries: usize) -> Arc<PoolAllocator> {
    let config = AllocatorConfig::new()
        .with_pool(PoolId::Streaming, PoolConfig::fixed(entries, 64))
        .with_pool(PoolId::Control, PoolConfig::fixed(entries, 32));
    Arc::new(PoolAllocator::init(&config).unwrap())
}

#[cfg(test)]
mod pool_tests {
    use super::*;

    #[test]
    fn test_alloc_release_never_exhausts() {
        let alloc = allocator(4);
        for _ in 0..3 * 4 {
            let msg = alloc.try_alloc(PoolId::Streaming).expect("slot should be free");
            drop(msg);
        }
        let stats = alloc.stats(PoolId::Streaming);
        assert_eq!(stats.free, 4);
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.alloc_failures, 0);
        assert_eq!(stats.max_in_use, 1);
    }

    #[test]
    fn test_writer_then_shared_reader() {
        let alloc = allocator(2);
        let mut msg = alloc.try_alloc(PoolId::Control).unwrap();
        msg.payload_mut()[..4].copy_from_slice(b"ping");
        msg.set_len(4).unwrap();
        msg.set_source(SourceId::Usb);
        msg.set_targets([TargetId::Uart, TargetId::Log]);
        assert!(msg.set_len(33).is_err());

        let shared = msg.share();
        let copy = shared.clone();
        assert_eq!(shared.ref_count(), 2);
        assert_eq!(copy.payload(), b"ping");
        assert_eq!(copy.source(), SourceId::Usb);
        assert_eq!(copy.targets().len(), 2);

        let value = copy.to_value();
        assert_eq!(value.payload(), b"ping");
        drop(copy);
        assert_eq!(shared.ref_count(), 1);
    }

    #[test]
    fn test_double_release_counted_and_free_list_intact() {
        let alloc = allocator(3);
        let id = alloc.try_alloc(PoolId::Control).unwrap().share().into_raw();
        unsafe { alloc.unref_slot(id) };
        assert_eq!(alloc.stats(PoolId::Control).double_free_count, 0);

        for spurious in 1..=3u64 {
            unsafe { alloc.unref_slot(id) };
            let stats = alloc.stats(PoolId::Control);
            assert_eq!(stats.double_free_count, spurious);
            assert_eq!(stats.free, 3);
        }

        let held: Vec<_> = (0..3)
            .map(|_| alloc.try_alloc(PoolId::Control).unwrap())
            .collect();
        let distinct: HashSet<_> = held.iter().map(|m| m.id()).collect();
        assert_eq!(distinct.len(), 3);
        assert!(alloc.try_alloc(PoolId::Control).is_none());
    }

    #[test]
    fn test_checked_unref_reports_double_release() {
        let alloc = allocator(2);
        let id = alloc.try_alloc(PoolId::Streaming).unwrap().share().into_raw();
        unsafe { alloc.unref_slot_checked(id) }.unwrap();

        let err = unsafe { alloc.unref_slot_checked(id) }.unwrap_err();
        assert!(matches!(err, BusError::DoubleRelease { slot, .. } if slot == id.index));
        let stats = alloc.stats(PoolId::Streaming);
        assert_eq!(stats.double_free_count, 1);
        assert_eq!(stats.free, 2);
        assert_eq!(stats.in_use, 0);
    }

    #[test]
    fn test_undersized_payload_raised_to_minimum() {
        let config = AllocatorConfig::new()
            .with_pool(PoolId::Streaming, PoolConfig::fixed(2, 0))
            .with_pool(PoolId::Control, PoolConfig::fixed(2, 4));
        let alloc = PoolAllocator::init(&config).unwrap();
        assert_eq!(alloc.payload_size(PoolId::Streaming), 16);
        assert_eq!(alloc.payload_size(PoolId::Control), 16);
        assert!(alloc.self_test().passed());
    }

    #[test]
    fn test_maximal_timeout_waits_for_release() {
        let alloc = allocator(1);
        let held = alloc.try_alloc(PoolId::Control).unwrap();

        let waiter = {
            let alloc = alloc.clone();
            thread::spawn(move || {
                alloc
                    .alloc_blocking(PoolId::Control, Some(Duration::MAX))
                    .is_some()
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_send_with_maximal_wait_delivers_after_release() {
        let config = AllocatorConfig::new()
            .with_pool(PoolId::Streaming, PoolConfig::fixed(1, 32))
            .with_pool(PoolId::Control, PoolConfig::fixed(1, 32));
        let bus = Arc::new(MessageBus::new(&config).unwrap());
        let channel = bus.router().create_ptr_channel(TargetId::Log, 2).unwrap();
        let held = bus.allocator().try_alloc(PoolId::Streaming).unwrap();

        let sender = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || {
                let params = SendParams::new(PoolId::Streaming, SourceId::Rest, TargetId::Log, b"late")
                    .with_wait(Duration::MAX);
                bus.send_params(&params).map(|receipt| receipt.delivered)
            })
        };
        thread::sleep(Duration::from_millis(30));
        drop(held);
        assert_eq!(sender.join().unwrap(), Some(1));
        assert_eq!(channel.try_recv().unwrap().payload(), b"late");
    }

    #[test]
    fn test_exhausted_try_alloc_fails_immediately() {
        let alloc = allocator(2);
        let _held: Vec<_> = (0..2)
            .map(|_| alloc.try_alloc(PoolId::Streaming).unwrap())
            .collect();

        let start = Instant::now();
        assert!(alloc.try_alloc(PoolId::Streaming).is_none());
        assert!(start.elapsed() < Duration::from_millis(50));
        assert_eq!(alloc.stats(PoolId::Streaming).alloc_failures, 1);
    }

    #[test]
    fn test_blocking_alloc_wakes_on_release() {
        let alloc = allocator(2);
        let mut held: Vec<_> = (0..2)
            .map(|_| alloc.try_alloc(PoolId::Streaming).unwrap())
            .collect();

        let waiter = {
            let alloc = alloc.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let msg = alloc.alloc_blocking(PoolId::Streaming, Some(Duration::from_millis(500)));
                (msg.is_some(), start.elapsed())
            })
        };

        thread::sleep(Duration::from_millis(50));
        held.pop();

        let (got, waited) = waiter.join().unwrap();
        assert!(got);
        assert!(waited < Duration::from_millis(500));
    }

    #[test]
    fn test_blocking_alloc_times_out() {
        let alloc = allocator(1);
        let _held = alloc.try_alloc(PoolId::Control).unwrap();

        let start = Instant::now();
        assert!(alloc
            .alloc_blocking(PoolId::Control, Some(Duration::from_millis(100)))
            .is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(alloc.stats(PoolId::Control).alloc_failures, 1);
    }

    #[test]
    fn test_millisecond_wait_variant() {
        let alloc = allocator(1);
        let held = alloc.alloc_blocking_ms(PoolId::Control, 10).unwrap();
        assert!(alloc.alloc_blocking_ms(PoolId::Control, 10).is_none());
        drop(held);
        assert!(alloc
            .alloc_blocking_ms(PoolId::Control, switchboard::pools::WAIT_FOREVER_MS)
            .is_some());
    }

    #[test]
    fn test_pools_are_independent() {
        let alloc = allocator(1);
        let _streaming = alloc.try_alloc(PoolId::Streaming).unwrap();
        assert!(alloc.try_alloc(PoolId::Streaming).is_none());
        assert!(alloc.try_alloc(PoolId::Control).is_some());
    }

    #[test]
    fn test_context_released_with_slot() {
        let alloc = allocator(1);
        let context: Arc<u32> = Arc::new(7);
        let mut msg = alloc.try_alloc(PoolId::Control).unwrap();
        msg.set_context(Some(context.clone()));
        let shared = msg.share();
        assert_eq!(shared.to_value().context_as::<u32>(), Some(&7));
        assert_eq!(Arc::strong_count(&context), 2);
        drop(shared);
        assert_eq!(Arc::strong_count(&context), 1);
    }
}
