//! CLI Entry Point for isov
//!
//! Provides command-line access to:
//! - A simulated measurement run (pulse trains on every channel, polled readings)
//! - The configured counter source (tick values and deltas)
//!
//! # Usage
//!
//! ```bash
//! isov simulate --config config/isov.toml --interval-ms 500
//! isov counter --samples 5
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use isov::config::IsovConfig;
use isov::counter::open_counter;
use isov::edge_source::period_for_voltage;
use isov::{logging, IsovDevice, PulseTrain, SimulatedEdgeSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "isov")]
#[command(about = "Five-channel voltage-to-frequency measurement", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "config/isov.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive every channel from a simulated pulse train and print readings
    Simulate {
        /// Polling interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Stop after this many readings (runs until Ctrl+C if omitted)
        #[arg(long)]
        count: Option<u64>,
    },

    /// Sample the configured counter source
    Counter {
        /// Number of samples
        #[arg(long, default_value = "5")]
        samples: u32,

        /// Delay between samples in milliseconds
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli.config)?;
    logging::init_from_config(&config).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Simulate { interval_ms, count } => simulate(config, interval_ms, count).await,
        Commands::Counter {
            samples,
            interval_ms,
        } => sample_counter(config, samples, interval_ms).await,
    }
}

fn load_config(path: &Path) -> Result<IsovConfig> {
    let config = IsovConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn simulate(config: IsovConfig, interval_ms: u64, count: Option<u64>) -> Result<()> {
    let counter = open_counter(&config.counter).context("Failed to open counter source")?;
    let source = Arc::new(SimulatedEdgeSource::new(counter));
    let device = IsovDevice::start(&config, &source).context("Failed to start device")?;

    let coefficients = config.coefficients();
    let mut trains = Vec::new();
    for channel in device.wired_channels() {
        let target = config.simulation.voltages[channel.get()];
        match period_for_voltage(coefficients[channel.get()], target) {
            Some(period) => trains.push(PulseTrain::start(source.clone(), channel, period)?),
            None => info!(%channel, target, "Channel idle (no pulse train)"),
        }
    }

    println!("Device '{}' running, {} pulse trains", device.name(), trains.len());
    println!("Press Ctrl+C to stop");
    println!();

    let mut reader = device.open();
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut readings = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match reader.read_snapshot() {
                    Ok(text) => print!("{text}"),
                    Err(e) => warn!(error = %e, "Snapshot read failed"),
                }
                readings += 1;
                if count.is_some_and(|n| readings >= n) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("Interrupted");
                break;
            }
        }
    }

    for train in trains {
        train.stop();
    }
    device.stop();
    Ok(())
}

async fn sample_counter(config: IsovConfig, samples: u32, interval_ms: u64) -> Result<()> {
    let counter = open_counter(&config.counter).context("Failed to open counter source")?;
    println!("Counter: {:?}", config.counter.kind);

    let mut previous = counter.now();
    println!("{:>12} {:>12}", "ticks", "delta");
    println!("{:>12} {:>12}", previous, "-");

    for _ in 1..samples {
        tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        let now = counter.now();
        println!("{:>12} {:>12}", now, now.wrapping_sub(previous));
        previous = now;
    }

    Ok(())
}
