//! # Parallel Driver (C6)
//!
//! Dispatches one simulator run per grid coordinate across a fixed-size
//! worker pool. A sequential warm-up pass resolves every distinct
//! `(window, cutoff)` pair the grid search needs up front, so the parallel
//! phase reads the potential-coin resolver without ever taking `&mut self`
//! (spec §4.6, §5 "Concurrency & resource model").

use crate::config::SimulationInputs;
use crate::error::{BacktestError, PotentialCoinError};
use crate::grid::{AxisValue, GridEnumerator, ResultCube};
use crate::history::PriceCube;
use crate::potential::{OversoldPipeline, PotentialCoinResolver, StrategyKey};
use crate::simulator::{self, SimulationParams};
use backtest_analytics::metric::TargetMetric;
use backtest_analytics::window::TimeWindow;
use indexmap::IndexMap;
use rayon::prelude::*;
use rust_decimal::prelude::ToPrimitive;
use std::collections::{HashMap, HashSet};

/// Builds the [`SimulationParams`] for one grid coordinate. A trait rather
/// than a bare closure type so callers (the CLI, tests) can implement it on
/// whatever state they need; the mapping from axis names to strategy fields
/// is a property of how the grid was assembled, not of the driver.
pub trait CoordinateBinder: Sync {
    fn bind(&self, coordinate: &IndexMap<String, AxisValue>) -> SimulationParams;
}

impl<F> CoordinateBinder for F
where
    F: Fn(&IndexMap<String, AxisValue>) -> SimulationParams + Sync,
{
    fn bind(&self, coordinate: &IndexMap<String, AxisValue>) -> SimulationParams {
        self(coordinate)
    }
}

/// Per-coordinate tracing span so worker-pool logs stay attributable to a
/// coordinate even though tasks run concurrently (spec §5).
pub fn task_span(coordinate_label: &str) -> tracing::Span {
    tracing::info_span!("backtest_task", coordinate = %coordinate_label)
}

fn coordinate_label(coordinate: &IndexMap<String, AxisValue>) -> String {
    coordinate
        .iter()
        .map(|(name, value)| format!("{name}={}", value.label()))
        .collect::<Vec<_>>()
        .join(",")
}

fn window_of(coordinate: &IndexMap<String, AxisValue>) -> Option<TimeWindow> {
    match coordinate.get("time_intervals") {
        Some(AxisValue::Window(w)) => Some(*w),
        _ => None,
    }
}

/// Run every grid coordinate gated by `[inputs.narrowed_start,
/// inputs.narrowed_end]` (spec §4.4, §6: the narrowed sub-range selects which
/// outer time-interval coordinates are actually simulated) across a
/// `inputs.pool_count`-sized worker pool, writing every requested target
/// metric into the returned [`ResultCube`].
///
/// A coordinate whose task fails with a [`BacktestError::is_recoverable`]
/// kind is left at `NaN` and the run continues; any other error is fatal and
/// aborts the whole run (spec §7).
pub fn run<P>(
    cube: &PriceCube,
    pipeline: P,
    enumerator: &GridEnumerator,
    inputs: &SimulationInputs,
    target_metrics: &[TargetMetric],
    binder: &dyn CoordinateBinder,
) -> Result<ResultCube, BacktestError>
where
    P: OversoldPipeline + Clone + Sync,
{
    let narrowed = TimeWindow::new(inputs.narrowed_start, inputs.narrowed_end)
        .map_err(|e| BacktestError::Fatal(e.to_string()))?;

    let coordinates: Vec<IndexMap<String, AxisValue>> = enumerator
        .coordinates()
        .into_iter()
        .filter(|c| matches!(window_of(c), Some(w) if w.start >= narrowed.start && w.end <= narrowed.end))
        .collect();

    let mut resolver = PotentialCoinResolver::new(pipeline);
    let mut warmed: HashSet<((i64, i64), StrategyKey)> = HashSet::new();
    for coordinate in &coordinates {
        let params = binder.bind(coordinate);
        let window_key = (
            params.window.start.timestamp_millis(),
            params.window.end.timestamp_millis(),
        );
        let strategy_key = StrategyKey::new(
            &params.strategy.cutoff,
            params.reference_coin.as_str(),
            params.ohlcv_field,
        );
        if warmed.insert((window_key, strategy_key)) {
            resolver.resolve(
                cube,
                params.window,
                &params.strategy.cutoff,
                params.reference_coin.as_str(),
                params.ohlcv_field,
            )?;
        }
    }
    let resolver = resolver;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(inputs.pool_count.max(1))
        .build()
        .map_err(|e| BacktestError::Fatal(e.to_string()))?;

    let outcomes: Vec<(IndexMap<String, AxisValue>, Result<HashMap<TargetMetric, rust_decimal::Decimal>, BacktestError>)> =
        pool.install(|| {
            coordinates
                .par_iter()
                .map(|coordinate| {
                    let params = binder.bind(coordinate);
                    let label = coordinate_label(coordinate);
                    let _entered = task_span(&label).entered();
                    let outcome = run_one(cube, &resolver, &params, &label, target_metrics);
                    (coordinate.clone(), outcome)
                })
                .collect()
        });

    let mut result_cube = enumerator.result_cube();
    for (coordinate, outcome) in outcomes {
        match outcome {
            Ok(metrics) => {
                for metric in target_metrics {
                    if let Some(value) = metrics.get(metric) {
                        result_cube.write(metric.name(), &coordinate, value.to_f64().unwrap_or(f64::NAN));
                    }
                }
            }
            Err(err) if err.is_recoverable() => {
                tracing::warn!(error = %err, "task failed with a recoverable error, leaving its cell at NaN");
            }
            Err(err) => return Err(err),
        }
    }

    Ok(result_cube)
}

fn run_one<P: OversoldPipeline>(
    cube: &PriceCube,
    resolver: &PotentialCoinResolver<P>,
    params: &SimulationParams,
    label: &str,
    target_metrics: &[TargetMetric],
) -> Result<HashMap<TargetMetric, rust_decimal::Decimal>, BacktestError> {
    let candidates = resolver
        .resolve_cached(
            params.window,
            &params.strategy.cutoff,
            params.reference_coin.as_str(),
            params.ohlcv_field,
        )
        .ok_or_else(|| BacktestError::PotentialCoin(PotentialCoinError::MissingTimeIndex(params.window)))?;

    simulator::run(cube, &candidates, params, label, target_metrics).map_err(BacktestError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CutoffSpec, StrategyKind, StrategyParams};
    use crate::grid::{Axis, GridAxes};
    use crate::history::{Granularity, GranularityFrame, OhlcvField, RawFrame};
    use crate::potential::DefaultOversoldPipeline;
    use chrono::{TimeDelta, TimeZone, Utc};
    use rust_decimal_macros::dec;
    use smol_str::SmolStr;

    fn at(hours: i64) -> chrono::DateTime<Utc> {
        Utc.timestamp_millis_opt(hours * 3_600_000).unwrap()
    }

    fn flat_cube(hours: usize) -> PriceCube {
        let timestamps_ms: Vec<i64> = (0..hours as i64).map(|i| i * 3_600_000).collect();
        let raw = RawFrame {
            timestamps_ms,
            columns: IndexMap::from([(SmolStr::new("X"), vec![100.0; hours])]),
        };
        let frame = GranularityFrame::from_raw(Granularity::new("1h"), raw);
        PriceCube::from_frames("BTC", OhlcvField::Close, vec![frame])
    }

    fn base_strategy() -> StrategyParams {
        StrategyParams {
            strategy_kind: StrategyKind::MarketBuyLimitSell,
            max_coins_to_buy: 1,
            percentage_increase: dec!(0.05),
            percentage_reduction: dec!(0.05),
            days_to_run: TimeDelta::days(1),
            stop_price_sell: None,
            limit_sell_adjust_trail: None,
            cutoff: CutoffSpec::Direct {
                low_cutoff: dec!(-10),
                high_cutoff: dec!(10),
            },
        }
    }

    fn inputs(narrowed_start: chrono::DateTime<Utc>, narrowed_end: chrono::DateTime<Utc>) -> SimulationInputs {
        SimulationInputs {
            reference_coin: "BTC".to_string(),
            ohlcv_field: OhlcvField::Close,
            candle: Granularity::new("1h"),
            overall_start: at(0),
            overall_end: at(48),
            narrowed_start,
            narrowed_end,
            interval: TimeDelta::hours(24),
            forward_in_time: true,
            increasing_range: false,
            pool_count: 2,
        }
    }

    struct FixedBinder {
        strategy: StrategyParams,
    }

    impl CoordinateBinder for FixedBinder {
        fn bind(&self, coordinate: &IndexMap<String, AxisValue>) -> SimulationParams {
            let window = match coordinate.get("time_intervals") {
                Some(AxisValue::Window(w)) => *w,
                _ => panic!("coordinate missing time_intervals"),
            };
            SimulationParams {
                strategy: self.strategy,
                reference_coin: SmolStr::new("BTC"),
                ohlcv_field: OhlcvField::Close,
                candle: Granularity::new("1h"),
                window,
            }
        }
    }

    #[test]
    fn every_in_range_coordinate_gets_a_written_cell() {
        let cube = flat_cube(49);
        let axes = GridAxes {
            time_intervals: Axis::new(
                "time_intervals",
                vec![
                    AxisValue::Window(TimeWindow::new(at(0), at(24)).unwrap()),
                    AxisValue::Window(TimeWindow::new(at(24), at(48)).unwrap()),
                ],
            ),
            extra: vec![],
        };
        let enumerator = GridEnumerator::new(axes, vec![TargetMetric::CalculateEndOfRunValue.name().to_string()]);
        let binder = FixedBinder { strategy: base_strategy() };

        let cube_result = run(
            &cube,
            DefaultOversoldPipeline::new(1),
            &enumerator,
            &inputs(at(0), at(48)),
            &[TargetMetric::CalculateEndOfRunValue],
            &binder,
        )
        .unwrap();

        let dense = cube_result.materialize(TargetMetric::CalculateEndOfRunValue.name());
        assert!(dense.data.iter().all(|v| !v.is_nan()));
    }

    #[test]
    fn narrowing_excludes_coordinates_outside_the_sub_range() {
        let cube = flat_cube(49);
        let axes = GridAxes {
            time_intervals: Axis::new(
                "time_intervals",
                vec![
                    AxisValue::Window(TimeWindow::new(at(0), at(24)).unwrap()),
                    AxisValue::Window(TimeWindow::new(at(24), at(48)).unwrap()),
                ],
            ),
            extra: vec![],
        };
        let enumerator = GridEnumerator::new(axes, vec![TargetMetric::CalculateEndOfRunValue.name().to_string()]);
        let binder = FixedBinder { strategy: base_strategy() };

        // Only the second window is inside the narrowed range.
        let cube_result = run(
            &cube,
            DefaultOversoldPipeline::new(1),
            &enumerator,
            &inputs(at(24), at(48)),
            &[TargetMetric::CalculateEndOfRunValue],
            &binder,
        )
        .unwrap();

        let dense = cube_result.materialize(TargetMetric::CalculateEndOfRunValue.name());
        assert!(dense.data[0].is_nan());
        assert!(!dense.data[1].is_nan());
    }
}
