use clap::{App, Arg, ArgMatches, SubCommand};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use switchboard::{
    pools::DEFAULT_CONFIG_PATH, AllocatorConfig, BusError, FnHandler, MessageBus,
    ModuleDescriptor, PoolId, Result, SendParams, SourceId, TargetId, ValueMessage, TARGET_COUNT,
};

fn config_arg() -> Arg<'static, 'static> {
    Arg::with_name("config")
        .short("c")
        .long("config")
        .value_name("FILE")
        .help("Pool sizing document")
        .default_value(DEFAULT_CONFIG_PATH)
        .takes_value(true)
}

fn main() -> Result<()> {
    env_logger::init();

    let matches = App::new("switchboard-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Switchboard message pool and routing tool")
        .subcommand(
            SubCommand::with_name("sizing")
                .about("Show the pool sizes a configuration produces")
                .arg(config_arg()),
        )
        .subcommand(
            SubCommand::with_name("self-test")
                .about("Run the allocator self-test")
                .arg(config_arg()),
        )
        .subcommand(
            SubCommand::with_name("stress")
                .about("Drive the pool-test peripheral and report pool statistics")
                .arg(config_arg())
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("COUNT")
                        .help("Messages to send")
                        .default_value("1000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("interval")
                        .short("i")
                        .long("interval-ms")
                        .value_name("MS")
                        .help("Pause between sends")
                        .default_value("0")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("queue_len")
                        .short("q")
                        .long("queue-len")
                        .value_name("LEN")
                        .help("Receiver channel depth")
                        .default_value("8")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("control")
                        .long("control")
                        .help("Draw from the control pool instead of streaming"),
                ),
        )
        .subcommand(
            SubCommand::with_name("info")
                .about("Show version and build information"),
        )
        .get_matches();

    match matches.subcommand() {
        ("sizing", Some(sizing_matches)) => show_sizing(sizing_matches),
        ("self-test", Some(test_matches)) => run_self_test(test_matches),
        ("stress", Some(stress_matches)) => run_stress(stress_matches),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn load_config(matches: &ArgMatches) -> AllocatorConfig {
    AllocatorConfig::load_or_default(matches.value_of("config").unwrap_or(DEFAULT_CONFIG_PATH))
}

fn parse_arg<T: std::str::FromStr>(matches: &ArgMatches, name: &str, default: T) -> Result<T> {
    match matches.value_of(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| BusError::config_invalid(name, format!("Invalid value '{}'", raw))),
    }
}

fn show_sizing(matches: &ArgMatches) -> Result<()> {
    let config = load_config(matches);

    println!("Targets: {}", TARGET_COUNT);
    for id in PoolId::ALL {
        let pool = config.pool(id);
        println!("\n{} pool:", id);
        println!("  F: {:.3}", pool.fraction);
        println!("  C: {}", pool.credit);
        println!("  Payload size: {} bytes", pool.payload_size);
        println!("  Entries bounds: [{}, {}]", pool.min_entries, pool.max_entries);
        println!("  Entries: {}", pool.entries());
        println!("  Payload storage: {} bytes", pool.total_payload_bytes());
    }
    Ok(())
}

fn run_self_test(matches: &ArgMatches) -> Result<()> {
    let bus = MessageBus::new(&load_config(matches))?;
    let report = bus.self_test();

    println!("Self-test:");
    println!("  streaming: {}", pass_fail(report.streaming));
    println!("  control:   {}", pass_fail(report.control));
    println!("  broadcast: {}", pass_fail(report.broadcast));
    bus.log_stats();

    if report.passed() {
        Ok(())
    } else {
        Err(BusError::setup("pool self-test failed"))
    }
}

fn pass_fail(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "FAILED"
    }
}

fn run_stress(matches: &ArgMatches) -> Result<()> {
    let count: u64 = parse_arg(matches, "count", 1000)?;
    let interval = Duration::from_millis(parse_arg(matches, "interval", 0)?);
    let queue_len: usize = parse_arg(matches, "queue_len", 8)?;
    let pool = if matches.is_present("control") {
        PoolId::Control
    } else {
        PoolId::Streaming
    };

    let bus = Arc::new(MessageBus::new(&load_config(matches))?);
    let received = Arc::new(AtomicU64::new(0));
    let rx_counter = Arc::clone(&received);

    let rx = bus.start_module(
        ModuleDescriptor::new(
            "pool_test_rx",
            TargetId::PoolTest,
            FnHandler(move |msg: &ValueMessage| {
                let seq = msg
                    .payload()
                    .get(..8)
                    .and_then(|b| b.try_into().ok())
                    .map(u64::from_le_bytes);
                log::debug!("pool_test rx: seq={:?} len={}", seq, msg.len());
                rx_counter.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .with_queue_len(queue_len),
    )?;

    println!("Sending {} messages from the {} pool...", count, pool);
    let start = Instant::now();
    let mut sent = 0u64;
    let mut failed = 0u64;
    let mut dropped = 0u64;

    for seq in 0..count {
        let payload = seq.to_le_bytes();
        let params = SendParams::new(pool, SourceId::PoolTest, TargetId::PoolTest, &payload);
        match bus.send_params(&params) {
            Some(receipt) if receipt.delivered > 0 => sent += 1,
            Some(_) => dropped += 1,
            None => failed += 1,
        }
        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    // Let the receiver drain its queue
    let deadline = Instant::now() + Duration::from_secs(2);
    while received.load(Ordering::Relaxed) < sent && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    let elapsed = start.elapsed();
    rx.shutdown()?;

    let stats = bus.allocator().stats(pool);
    println!("\nResults:");
    println!("  Delivered: {}", sent);
    println!("  Received: {}", received.load(Ordering::Relaxed));
    println!("  Dropped (queue full): {}", dropped);
    println!("  Alloc failures: {}", failed);
    println!("  Total time: {:.2}ms", elapsed.as_secs_f64() * 1000.0);
    println!("  Peak in use: {}/{}", stats.max_in_use, stats.capacity);
    println!("  Failure rate: {:.2}%", stats.failure_rate() * 100.0);
    println!("  Double frees: {}", stats.double_free_count);
    bus.log_stats();
    Ok(())
}

fn show_info() -> Result<()> {
    println!("Switchboard Message Bus");
    println!("Version: {}", switchboard::VERSION);
    println!("Targets: {}", TARGET_COUNT);
    println!("Max message size: {} bytes", switchboard::MAX_MESSAGE_SIZE);
    println!("Pools: {}", PoolId::ALL.map(|p| p.name()).join(", "));
    Ok(())
}
