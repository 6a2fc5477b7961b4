//! A slow consumer, a fast producer and a five-slot channel between them.
//!
//! Run with: cargo run --bin queue_exercise [scenario.toml]

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use dining_monitors::pipeline::Pipeline;
use dining_monitors::telemetry::init_logging;
use dining_monitors::ScenarioConfig;

fn main() -> Result<(), Box<dyn Error>> {
    init_logging(tracing::Level::INFO);
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = ScenarioConfig::load(path.as_deref())?.pipeline;

    println!("=== Bounded Queue ===\n");
    println!(
        "capacity {}, values 1..={}, end marker {}\n",
        config.capacity, config.items, config.sentinel
    );

    let report = Pipeline::new(config.capacity, config.sentinel)
        .producer_pause(Duration::from_millis(config.producer_pause_ms))
        .consumer_pause(Duration::from_millis(config.consumer_pause_ms))
        .run(config.values(), config.patience())?;

    println!("Consumed: {:?}", report.consumed);
    println!(
        "Produced {} values, consumed {}, queue peaked at {}/{}",
        report.produced.to_string().bold(),
        report.consumed.len().to_string().bold(),
        report.peak_len,
        config.capacity
    );
    if report.consumed.iter().copied().eq(config.values()) {
        println!("{}", "every value arrived once, in order".green());
    } else {
        println!("{}", "values were lost or reordered".red());
    }

    println!("\n=== Key Points ===");
    println!("1. The producer parks on not_full, the consumer on not_empty");
    println!("2. The end marker is a value the producer never sends as data");
    println!("3. The queue never holds more than its capacity");
    Ok(())
}
