//! Turns a [`GridConfig`] into the [`GridAxes`]/[`CoordinateBinder`] pair the
//! driver needs: the override lists become extra axes, and the binder folds a
//! coordinate back onto the base strategy.

use crate::config::GridConfig;
use backtest_core::config::StrategyParams;
use backtest_core::driver::CoordinateBinder;
use backtest_core::grid::{Axis, AxisValue, GridAxes};
use backtest_core::history::Granularity;
use backtest_core::simulator::SimulationParams;
use chrono::TimeDelta;
use indexmap::IndexMap;
use smol_str::SmolStr;

use backtest_analytics::window::{Direction, WindowError, WindowIterator, WindowMode};

/// Enumerate the `time_intervals` axis from `simulation`'s master range
/// (`overall_start`/`overall_end`), stepped by `interval` in the configured
/// direction and mode.
pub fn time_intervals_axis(config: &GridConfig) -> Result<Axis, WindowError> {
    let direction = if config.simulation.forward_in_time {
        Direction::Forward
    } else {
        Direction::Backward
    };
    // `increasing_range` selects a window that grows how much history it
    // covers on each step (Shrinking anchors one bound and walks the other
    // toward it) rather than a fixed-width window sliding across the range.
    let mode = if config.simulation.increasing_range {
        WindowMode::Shrinking
    } else {
        WindowMode::Sliding
    };

    let windows: Vec<AxisValue> = WindowIterator::new(
        config.simulation.overall_start,
        config.simulation.overall_end,
        config.simulation.interval,
        direction,
        mode,
    )?
    .map(AxisValue::Window)
    .collect();

    Ok(Axis::new("time_intervals", windows))
}

/// Build every extra axis the config's override lists name. An empty or
/// absent list means that dimension stays pinned at `base_strategy`'s value.
pub fn extra_axes(config: &GridConfig) -> Vec<Axis> {
    let mut axes = Vec::new();

    if !config.strategy_kinds.is_empty() {
        axes.push(Axis::new(
            "strategy_kind",
            config.strategy_kinds.iter().copied().map(AxisValue::Strategy).collect(),
        ));
    }
    if !config.percentage_increase.is_empty() {
        axes.push(Axis::new(
            "percentage_increase",
            config.percentage_increase.iter().copied().map(AxisValue::Decimal).collect(),
        ));
    }
    if !config.percentage_reduction.is_empty() {
        axes.push(Axis::new(
            "percentage_reduction",
            config.percentage_reduction.iter().copied().map(AxisValue::Decimal).collect(),
        ));
    }
    if !config.days_to_run_days.is_empty() {
        axes.push(Axis::new(
            "days_to_run",
            config.days_to_run_days.iter().map(|&d| AxisValue::Duration(TimeDelta::days(d))).collect(),
        ));
    }
    if !config.max_coins_to_buy.is_empty() {
        axes.push(Axis::new(
            "max_coins_to_buy",
            config.max_coins_to_buy.iter().copied().map(AxisValue::Count).collect(),
        ));
    }

    axes
}

pub fn build_axes(config: &GridConfig) -> Result<GridAxes, WindowError> {
    Ok(GridAxes {
        time_intervals: time_intervals_axis(config)?,
        extra: extra_axes(config),
    })
}

/// Folds one grid coordinate back onto the config's base strategy, applying
/// whichever extra-axis overrides are present in that coordinate.
pub struct ConfigBinder {
    base_strategy: StrategyParams,
    reference_coin: SmolStr,
    ohlcv_field: backtest_core::history::OhlcvField,
    candle: Granularity,
}

impl ConfigBinder {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            base_strategy: config.base_strategy,
            reference_coin: SmolStr::new(&config.simulation.reference_coin),
            ohlcv_field: config.simulation.ohlcv_field,
            candle: config.simulation.candle.clone(),
        }
    }
}

impl CoordinateBinder for ConfigBinder {
    fn bind(&self, coordinate: &IndexMap<String, AxisValue>) -> SimulationParams {
        let mut strategy = self.base_strategy;
        let mut window = None;

        for (name, value) in coordinate {
            match (name.as_str(), value) {
                ("time_intervals", AxisValue::Window(w)) => window = Some(*w),
                ("strategy_kind", AxisValue::Strategy(k)) => strategy.strategy_kind = *k,
                ("percentage_increase", AxisValue::Decimal(d)) => strategy.percentage_increase = *d,
                ("percentage_reduction", AxisValue::Decimal(d)) => strategy.percentage_reduction = *d,
                ("days_to_run", AxisValue::Duration(d)) => strategy.days_to_run = *d,
                ("max_coins_to_buy", AxisValue::Count(c)) => strategy.max_coins_to_buy = *c,
                _ => {}
            }
        }

        SimulationParams {
            strategy,
            reference_coin: self.reference_coin.clone(),
            ohlcv_field: self.ohlcv_field,
            candle: self.candle.clone(),
            window: window.expect("every coordinate carries a time_intervals window"),
        }
    }
}
