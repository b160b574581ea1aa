use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use switchboard::{
    AllocatorConfig, MessageBus, PoolConfig, PoolId, SourceId, TargetId, TargetSet,
};

fn bench_bus(entries: usize, payload_size: usize) -> MessageBus {
    let config = AllocatorConfig::new()
        .with_pool(PoolId::Streaming, PoolConfig::fixed(entries, payload_size))
        .with_pool(PoolId::Control, PoolConfig::fixed(entries, payload_size));
    MessageBus::new(&config).unwrap()
}

fn benchmark_alloc_release(c: &mut Criterion) {
    let mut group = c.benchmark_group("PoolAllocator");

    for payload_size in [16, 128, 1024].iter() {
        group.bench_with_input(
            BenchmarkId::new("alloc_write_release", payload_size),
            payload_size,
            |b, &payload_size| {
                let bus = bench_bus(32, payload_size);
                let data = vec![0xA5u8; payload_size];

                b.iter(|| {
                    let mut msg = bus.allocator().try_alloc(PoolId::Streaming).unwrap();
                    msg.write(&data);
                    drop(msg);
                });
            },
        );
    }

    group.bench_function("drain_and_refill", |b| {
        let bus = bench_bus(64, 128);
        b.iter(|| {
            let held: Vec<_> = (0..64)
                .map(|_| bus.allocator().try_alloc(PoolId::Control).unwrap())
                .collect();
            drop(held);
        });
    });

    group.finish();
}

fn benchmark_broadcast(c: &mut Criterion) {
    let mut group = c.benchmark_group("Broadcast");

    let fanouts: [&[TargetId]; 3] = [
        &[TargetId::Log],
        &[TargetId::Log, TargetId::Rgb],
        &[TargetId::Log, TargetId::Rgb, TargetId::Sse, TargetId::Uart],
    ];

    for targets in fanouts {
        let set = TargetSet::from(targets);
        group.bench_with_input(BenchmarkId::new("send_and_drain", set.len()), &set, |b, &set| {
            let bus = bench_bus(16, 128);
            let channels: Vec<_> = set
                .iter()
                .map(|t| bus.router().create_ptr_channel(t, 8).unwrap())
                .collect();

            b.iter(|| {
                bus.send(PoolId::Streaming, SourceId::PoolTest, set, &[1, 2, 3, 4], None)
                    .unwrap();
                for channel in &channels {
                    drop(channel.try_recv());
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_alloc_release, benchmark_broadcast);
criterion_main!(benches);
