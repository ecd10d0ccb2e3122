//! Command-line entry point: load a grid-search config plus a price fixture,
//! run the full grid in parallel, and write the resulting Result Cube out as
//! JSON.

mod config;
mod grid;

use anyhow::{Context, Result};
use backtest_core::driver;
use backtest_core::history::{Granularity, InMemoryPriceSource, PriceCube, RawFrame};
use backtest_core::potential::DefaultOversoldPipeline;
use clap::{Parser, Subcommand};
use config::GridConfig;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "backtest", about = "Run crypto strategy backtest grid searches")]
struct Cli {
    /// Emit structured JSON logs instead of human-readable ones.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a grid config and its price fixture, reporting the resulting grid
    /// shape without running any simulations.
    Validate {
        /// Path to the grid-search TOML config.
        config: PathBuf,
    },
    /// Run the full grid search and write the Result Cube as JSON.
    Run {
        /// Path to the grid-search TOML config.
        config: PathBuf,
        /// Where to write the JSON result. Defaults to stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        backtest_core::logging::init_json_logging();
    } else {
        backtest_core::logging::init_logging();
    }

    match cli.command {
        Command::Validate { config } => validate(&config),
        Command::Run { config, output } => run(&config, output.as_deref()),
    }
}

fn validate(config_path: &std::path::Path) -> Result<()> {
    let config = GridConfig::load(config_path)?;
    let axes = grid::build_axes(&config).context("building grid axes")?;
    let shape: Vec<usize> = std::iter::once(axes.time_intervals.values.len())
        .chain(axes.extra.iter().map(|a| a.values.len()))
        .collect();
    let total: usize = shape.iter().product();
    println!(
        "grid shape {:?} ({total} coordinates), target metrics: {:?}",
        shape, config.target_metrics
    );
    Ok(())
}

fn run(config_path: &std::path::Path, output: Option<&std::path::Path>) -> Result<()> {
    let config = GridConfig::load(config_path)?;
    let cube = load_cube(&config)?;
    let axes = grid::build_axes(&config).context("building grid axes")?;
    let metric_names: Vec<String> = config.target_metrics.iter().map(|m| m.name().to_string()).collect();
    let enumerator = backtest_core::grid::GridEnumerator::new(axes, metric_names);
    let binder = grid::ConfigBinder::new(&config);
    let pipeline = DefaultOversoldPipeline::new(config.oversold_hourly_lookback_hours);

    let result_cube = driver::run(
        &cube,
        pipeline,
        &enumerator,
        &config.simulation,
        &config.target_metrics,
        &binder,
    )
    .map_err(|e| anyhow::anyhow!("grid search failed: {e}"))?;

    let mut out: HashMap<String, backtest_core::grid::DenseArray> = HashMap::new();
    for metric in &config.target_metrics {
        out.insert(metric.name().to_string(), result_cube.materialize(metric.name()));
    }

    let json = serde_json::to_string_pretty(&out).context("serializing result cube")?;
    match output {
        Some(path) => std::fs::write(path, json).with_context(|| format!("writing output to {}", path.display()))?,
        None => println!("{json}"),
    }

    Ok(())
}

/// Loads a price fixture `{ "<granularity>": { "timestamps_ms": [...], "columns": {...} } }`,
/// all under `config.simulation.ohlcv_field`, into an in-memory [`PriceCube`].
///
/// Every distinct granularity named by the fixture is loaded; the simulator's
/// own candle plus the `1d` fallback the reference oversold pipeline needs are
/// expected to both be present when relevant.
fn load_cube(config: &GridConfig) -> Result<PriceCube> {
    let raw = std::fs::read_to_string(&config.price_fixture)
        .with_context(|| format!("reading price fixture at {}", config.price_fixture.display()))?;
    let fixture: HashMap<String, RawFrame> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing price fixture at {}", config.price_fixture.display()))?;

    let ohlcv_field = config.simulation.ohlcv_field;
    let mut source = InMemoryPriceSource::new();
    let mut granularities = Vec::new();
    for (tag, frame) in fixture {
        let granularity = Granularity::new(tag);
        granularities.push(granularity.clone());
        source = source.with_frame(granularity, ohlcv_field, frame);
    }

    PriceCube::load(&granularities, &config.simulation.reference_coin, ohlcv_field, &source)
        .context("loading price cube from fixture")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_its_own_definition() {
        Cli::command().debug_assert();
    }
}
