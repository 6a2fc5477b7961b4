//! Philosophers sharing one bowl through a single monitor.
//!
//! Run with: cargo run --bin monitor_dining [scenario.toml]

use std::error::Error;
use std::path::PathBuf;

use colored::Colorize;
use dining_monitors::telemetry::init_logging;
use dining_monitors::{CancelToken, MonitorTable, ScenarioConfig, Termination, WorkerExit};

fn main() -> Result<(), Box<dyn Error>> {
    init_logging(tracing::Level::INFO);
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = ScenarioConfig::load(path.as_deref())?.monitor;

    println!("=== Dining from One Bowl ===\n");
    println!(
        "{} philosophers, {} sweets, termination: {:?}\n",
        config.philosophers, config.sweets, config.termination
    );

    let mut table = MonitorTable::new(config.pool(), config.philosophers).think_time(config.think_time());
    if let Some(batch) = config.refill_batch {
        table = table.refill_batch(batch);
    }
    let tallies = table.run(&CancelToken::new())?;

    for tally in &tallies {
        let exit = match &tally.exit {
            WorkerExit::Finished => "finished".green(),
            WorkerExit::Cancelled => "cancelled".yellow(),
            WorkerExit::Failed(err) => format!("failed: {err}").red(),
            WorkerExit::Panicked(msg) => format!("panicked: {msg}").red(),
        };
        println!("  {:<16} ate {:>5}  ({exit})", tally.name, tally.consumed);
    }

    let eaten: u64 = tallies.iter().map(|t| t.consumed).sum();
    let snapshot = table.pool().snapshot();
    println!("\nTotal eaten: {}", eaten.to_string().bold());
    match config.termination {
        Termination::Exhaustion => {
            println!("Left in the bowl: {}", snapshot.remaining);
            assert_eq!(eaten + snapshot.remaining, snapshot.total);
        }
        Termination::ConsumptionTarget(target) => println!("Target: {target}"),
    }

    println!("\n=== Key Points ===");
    println!("1. One Mutex guards the count, one Condvar parks the hungry");
    println!("2. The guard is re-checked in a loop after every wakeup");
    println!("3. Each refill wakes one waiter per sweet, exhaustion wakes everyone");
    Ok(())
}
