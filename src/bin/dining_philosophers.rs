//! Three philosophers, three forks: deadlock and how to avoid it.
//!
//! Run with: cargo run --bin dining_philosophers [scenario.toml]
//!
//! Without a scenario file the demo runs three fixed tables. With one, it
//! runs the `[table]` section as configured.

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use colored::Colorize;
use dining_monitors::telemetry::init_logging;
use dining_monitors::{DiningReport, DiningTable, Outcome, ScenarioConfig, Strategy};

const PATIENCE: Duration = Duration::from_secs(2);

fn print_report(title: &str, report: &DiningReport) {
    println!("--- {title} ---");
    for tally in &report.tallies {
        println!(
            "  {:<10} ate {:>5}  backed off {:>5}  ({:?})",
            tally.name, tally.consumed, tally.backoffs, tally.exit
        );
    }
    let verdict = match &report.outcome {
        Outcome::Finished => "bowl emptied".green(),
        Outcome::Stalled { cycle: Some(cycle) } => format!("DEADLOCK: {}", cycle.join(" -> ")).red(),
        Outcome::Stalled { cycle: None } => "stalled without a circular wait".yellow(),
    };
    println!(
        "  eaten {} / {}, left {}, {:?}: {verdict}\n",
        report.total_consumed(),
        report.initial,
        report.remaining,
        report.elapsed
    );
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging(tracing::Level::WARN);

    if let Some(path) = std::env::args().nth(1).map(PathBuf::from) {
        let config = ScenarioConfig::from_file(&path)?.table;
        let report = config.build()?.run(config.patience());
        print_report(&path.display().to_string(), &report);
        return Ok(());
    }

    println!("=== Dining Philosophers ===\n");

    let cyclic = DiningTable::cyclic(5_000)
        .opening_hesitation(Duration::from_millis(100))
        .build()?;
    print_report("Kant reaches for C before A", &cyclic.run(PATIENCE));

    let ordered = DiningTable::ordered(5_000).build()?;
    print_report("Kant reaches for A before C", &ordered.run(PATIENCE));

    let polite = DiningTable::cyclic(5_000)
        .strategy(Strategy::BackOff { max_pause_ms: 2 })
        .opening_hesitation(Duration::from_millis(100))
        .build()?;
    print_report("Everyone puts the first fork back when the second is taken", &polite.run(PATIENCE * 5));

    println!("=== Key Points ===");
    println!("1. A deadlock needs a cycle of holders each waiting on the next");
    println!("2. Taking forks in one global order makes that cycle impossible");
    println!("3. Backing off breaks the wait but can spin without progress");
    Ok(())
}
