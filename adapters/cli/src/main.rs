#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that runs a population scenario headless.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

mod scenario;

use scenario::Scenario;

/// Runs a population scenario and prints what it spawned.
#[derive(Debug, Parser)]
#[command(name = "population-sim", version)]
struct Cli {
    /// Scenario file in TOML.
    #[arg(long)]
    scenario: PathBuf,
    /// Simulated seconds; overrides the scenario.
    #[arg(long)]
    seconds: Option<u64>,
    /// Length of one simulation step in milliseconds.
    #[arg(long, default_value_t = 500)]
    step_ms: u64,
    /// Seed of the population random streams; overrides the scenario.
    #[arg(long)]
    seed: Option<u64>,
}

/// Entry point for the population simulator.
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut scenario = Scenario::load(&cli.scenario)?;
    if let Some(seed) = cli.seed {
        scenario.population.rng_seed = seed;
    }
    let seconds = cli.seconds.unwrap_or_else(|| scenario.seconds());
    log::info!(
        "running {} for {seconds}s in {}ms steps",
        cli.scenario.display(),
        cli.step_ms
    );

    let summary = scenario::run(scenario, seconds, Duration::from_millis(cli.step_ms))?;
    println!("groups: {}", summary.groups);
    println!("live entities: {}", summary.live_entities);
    println!("events: {}", summary.events);
    for (marker, free) in &summary.free_reservations {
        println!("free reservations of marker {marker}: {free}");
    }
    Ok(())
}
