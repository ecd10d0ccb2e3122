//! On-disk grid-search configuration (TOML).
//!
//! Reuses [`backtest_core::config::SimulationInputs`] and
//! [`backtest_core::config::StrategyParams`] directly rather than inventing a
//! parallel CLI-only schema; the grid axes are optional override lists layered
//! on top of a base strategy.

use anyhow::{Context, Result};
use backtest_core::config::{SimulationInputs, StrategyKind, StrategyParams};
use backtest_analytics::metric::TargetMetric;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Everything needed to run one grid search, as loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    pub simulation: SimulationInputs,
    pub base_strategy: StrategyParams,
    pub target_metrics: Vec<TargetMetric>,

    /// Path to a JSON price fixture: `{ "<granularity>": { "timestamps_ms": [...], "columns": {...} } }`,
    /// all under `simulation.ohlcv_field`. Relative to the config file's directory.
    pub price_fixture: PathBuf,

    /// Hours of hourly lookback the reference oversold pipeline uses (spec's
    /// documented default reference scoring model).
    #[serde(default = "default_lookback")]
    pub oversold_hourly_lookback_hours: i64,

    #[serde(default)]
    pub strategy_kinds: Vec<StrategyKind>,
    #[serde(default)]
    pub percentage_increase: Vec<Decimal>,
    #[serde(default)]
    pub percentage_reduction: Vec<Decimal>,
    #[serde(default)]
    pub days_to_run_days: Vec<i64>,
    #[serde(default)]
    pub max_coins_to_buy: Vec<usize>,
}

fn default_lookback() -> i64 {
    48
}

impl GridConfig {
    /// Load from `path`, resolving `price_fixture` relative to its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading grid config at {}", path.display()))?;
        let mut config: GridConfig =
            toml::from_str(&raw).with_context(|| format!("parsing grid config at {}", path.display()))?;

        if config.price_fixture.is_relative() {
            if let Some(dir) = path.parent() {
                config.price_fixture = dir.join(&config.price_fixture);
            }
        }

        Ok(config)
    }
}
