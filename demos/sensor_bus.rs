//! A battery monitor fanning readings out to the log and the OLED modules

use std::{
    sync::Arc,
    thread,
    time::Duration,
};

use switchboard::{
    AllocatorConfig, FnHandler, MessageBus, ModuleDescriptor, ModuleHandler, PoolId, Result,
    SourceId, TargetId, TargetSet, ValueMessage,
};

/// Prints readings and reports how many it saw on every step
struct Display {
    readings: u32,
}

impl ModuleHandler for Display {
    fn process(&mut self, msg: &ValueMessage) {
        if let Ok(raw) = <[u8; 2]>::try_from(msg.payload()) {
            println!("  [oled] battery {} mV (from {})", u16::from_le_bytes(raw), msg.source);
        }
        self.readings += 1;
    }

    fn step(&mut self) {
        println!("  [oled] refresh, {} readings so far", self.readings);
    }
}

fn main() -> Result<()> {
    env_logger::init();

    println!("Switchboard Sensor Bus Example");
    println!("==============================");

    let bus = Arc::new(MessageBus::new(&AllocatorConfig::default())?);
    println!(
        "Pools: streaming={} control={}",
        bus.allocator().pool(PoolId::Streaming).capacity(),
        bus.allocator().pool(PoolId::Control).capacity()
    );

    let report = bus.self_test();
    println!("Self-test passed: {}", report.passed());

    let log = bus.start_module(
        ModuleDescriptor::new(
            "log",
            TargetId::Log,
            FnHandler(|msg: &ValueMessage| println!("  [log] {:?}", msg)),
        )
        .with_queue_len(4),
    )?;
    let oled = bus.start_module(
        ModuleDescriptor::new("oled", TargetId::OledIndev, Display { readings: 0 })
            .with_queue_len(4)
            .with_step_period(Duration::from_millis(100)),
    )?;

    let targets = TargetSet::from([TargetId::Log, TargetId::OledIndev]);
    println!("\nSending readings...");
    for millivolts in [4100u16, 4050, 3990, 3920] {
        match bus.send(
            PoolId::Streaming,
            SourceId::Battery,
            targets,
            &millivolts.to_le_bytes(),
            None,
        ) {
            Some(receipt) => println!("sent {} mV to {} module(s)", millivolts, receipt.delivered),
            None => println!("streaming pool exhausted, reading dropped"),
        }
        thread::sleep(Duration::from_millis(60));
    }

    thread::sleep(Duration::from_millis(150));
    log.shutdown()?;
    oled.shutdown()?;

    println!("\nStatistics:");
    for id in PoolId::ALL {
        println!("  {}", bus.allocator().stats(id).summary());
    }
    Ok(())
}
