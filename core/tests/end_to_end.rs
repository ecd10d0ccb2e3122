//! End-to-end coverage across the history store, potential-coin resolver,
//! grid enumerator, simulator core and parallel driver together, rather than
//! any one component in isolation.

use backtest_analytics::metric::TargetMetric;
use backtest_analytics::window::TimeWindow;
use backtest_core::config::{CutoffSpec, SimulationInputs, StrategyKind, StrategyParams};
use backtest_core::driver::{self, CoordinateBinder};
use backtest_core::grid::{Axis, AxisValue, GridAxes, GridEnumerator};
use backtest_core::history::{Granularity, GranularityFrame, InMemoryPriceSource, OhlcvField, PriceCube, PriceSource, RawFrame};
use backtest_core::potential::{DefaultOversoldPipeline, OversoldPipeline};
use backtest_core::simulator::{self, SimulationParams};
use chrono::{TimeDelta, TimeZone, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use smol_str::SmolStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn at(hours: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_millis_opt(hours * 3_600_000).unwrap()
}

fn hourly_raw(values: &[f64]) -> RawFrame {
    RawFrame {
        timestamps_ms: (0..values.len() as i64).map(|i| i * 3_600_000).collect(),
        columns: IndexMap::from([(SmolStr::new("X"), values.to_vec())]),
    }
}

fn flat_cube_via_source(hours: usize) -> PriceCube {
    let source = InMemoryPriceSource::new().with_frame(
        Granularity::new("1h"),
        OhlcvField::Close,
        hourly_raw(&vec![100.0; hours]),
    );
    PriceCube::load(&[Granularity::new("1h")], "BTC", OhlcvField::Close, &source).unwrap()
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

struct FixedBinder {
    strategy: StrategyParams,
}

impl CoordinateBinder for FixedBinder {
    fn bind(&self, coordinate: &IndexMap<String, AxisValue>) -> SimulationParams {
        let window = match coordinate.get("time_intervals") {
            Some(AxisValue::Window(w)) => *w,
            _ => panic!("coordinate missing time_intervals"),
        };
        let mut strategy = self.strategy;
        if let Some(AxisValue::Decimal(d)) = coordinate.get("percentage_increase") {
            strategy.percentage_increase = *d;
        }
        SimulationParams {
            strategy,
            reference_coin: SmolStr::new("BTC"),
            ohlcv_field: OhlcvField::Close,
            candle: Granularity::new("1h"),
            window,
        }
    }
}

/// Loading through the external [`PriceSource`] contract, enumerating a
/// two-dimensional grid (time windows x percentage_increase) and running it
/// through the full parallel driver should populate every cell.
#[test]
fn full_grid_through_the_driver_populates_every_cell() {
    let cube = flat_cube_via_source(49);
    let axes = GridAxes {
        time_intervals: Axis::new(
            "time_intervals",
            vec![
                AxisValue::Window(TimeWindow::new(at(0), at(24)).unwrap()),
                AxisValue::Window(TimeWindow::new(at(24), at(48)).unwrap()),
            ],
        ),
        extra: vec![Axis::new(
            "percentage_increase",
            vec![AxisValue::Decimal(dec!(0.05)), AxisValue::Decimal(dec!(0.10))],
        )],
    };
    let enumerator = GridEnumerator::new(axes, vec![TargetMetric::CalculateEndOfRunValue.name().to_string()]);
    let binder = FixedBinder { strategy: base_strategy() };
    let inputs = SimulationInputs {
        reference_coin: "BTC".to_string(),
        ohlcv_field: OhlcvField::Close,
        candle: Granularity::new("1h"),
        overall_start: at(0),
        overall_end: at(48),
        narrowed_start: at(0),
        narrowed_end: at(48),
        interval: TimeDelta::hours(24),
        forward_in_time: true,
        increasing_range: false,
        pool_count: 2,
    };

    let result = driver::run(
        &cube,
        DefaultOversoldPipeline::new(1),
        &enumerator,
        &inputs,
        &[TargetMetric::CalculateEndOfRunValue],
        &binder,
    )
    .unwrap();

    let dense = result.materialize(TargetMetric::CalculateEndOfRunValue.name());
    assert_eq!(dense.shape, vec![2, 2]);
    assert!(dense.data.iter().all(|v| !v.is_nan()));
}

/// A counting wrapper pipeline, used to check that the driver's warm-up pass
/// resolves each distinct window exactly once no matter how many non-window
/// axis values share it.
#[derive(Clone)]
struct CountingPipeline {
    calls: Arc<AtomicUsize>,
}

impl OversoldPipeline for CountingPipeline {
    fn compute_scores(
        &self,
        cube: &PriceCube,
        window: TimeWindow,
        reference_coin: &str,
        ohlcv_field: OhlcvField,
    ) -> Result<IndexMap<SmolStr, Decimal>, backtest_core::error::HistoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        DefaultOversoldPipeline::new(1).compute_scores(cube, window, reference_coin, ohlcv_field)
    }
}

#[test]
fn warm_up_resolves_each_window_once_across_many_coordinates() {
    let cube = flat_cube_via_source(49);
    let axes = GridAxes {
        time_intervals: Axis::new(
            "time_intervals",
            vec![AxisValue::Window(TimeWindow::new(at(0), at(48)).unwrap())],
        ),
        extra: vec![Axis::new(
            "percentage_increase",
            (1i64..=5).map(|n| AxisValue::Decimal(Decimal::new(n, 2))).collect(),
        )],
    };
    let enumerator = GridEnumerator::new(axes, vec![TargetMetric::CalculateEndOfRunValue.name().to_string()]);
    let binder = FixedBinder { strategy: base_strategy() };
    let inputs = SimulationInputs {
        reference_coin: "BTC".to_string(),
        ohlcv_field: OhlcvField::Close,
        candle: Granularity::new("1h"),
        overall_start: at(0),
        overall_end: at(48),
        narrowed_start: at(0),
        narrowed_end: at(48),
        interval: TimeDelta::hours(48),
        forward_in_time: true,
        increasing_range: false,
        pool_count: 4,
    };

    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = CountingPipeline { calls: calls.clone() };

    driver::run(
        &cube,
        pipeline,
        &enumerator,
        &inputs,
        &[TargetMetric::CalculateEndOfRunValue],
        &binder,
    )
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// A position bought and then crashed to near-zero never recovers to its
/// sell target within the run, leaving the portfolio strictly worse off than
/// a flat hold of the reference asset.
#[test]
fn a_crashing_asset_never_hits_target_and_loses_value() {
    let mut values = vec![100.0; 6];
    values[5] = 0.00001;
    let raw = hourly_raw(&values);
    let frame = GranularityFrame::from_raw(Granularity::new("1h"), raw);
    let cube = PriceCube::from_frames("BTC", OhlcvField::Close, vec![frame]);

    let mut candidates = IndexMap::new();
    candidates.insert(SmolStr::new("X"), dec!(5));

    let mut strategy = base_strategy();
    strategy.days_to_run = TimeDelta::hours(5);
    let params = SimulationParams {
        strategy,
        reference_coin: SmolStr::new("BTC"),
        ohlcv_field: OhlcvField::Close,
        candle: Granularity::new("1h"),
        window: TimeWindow::new(at(0), at(5)).unwrap(),
    };

    let results = simulator::run(
        &cube,
        &candidates,
        &params,
        "seed",
        &[TargetMetric::CalculateEndOfRunValue, TargetMetric::PercentageOfBoughtCoinsHitTarget],
    )
    .unwrap();

    assert_eq!(results[&TargetMetric::PercentageOfBoughtCoinsHitTarget], Decimal::ZERO);
    assert!(results[&TargetMetric::CalculateEndOfRunValue] < Decimal::ONE);
}

/// A buy order that never triggers its limit before `days_to_run` elapses
/// still market-fills on timeout rather than stranding the reserved cash
/// forever (spec's resolved Open Question on buy-timeout semantics).
#[test]
fn an_unfilled_buy_still_fills_on_timeout() {
    let values = vec![100.0; 30];
    let raw = hourly_raw(&values);
    let frame = GranularityFrame::from_raw(Granularity::new("1h"), raw);
    let cube = PriceCube::from_frames("BTC", OhlcvField::Close, vec![frame]);

    let mut candidates = IndexMap::new();
    candidates.insert(SmolStr::new("X"), dec!(5));

    let mut strategy = base_strategy();
    strategy.strategy_kind = StrategyKind::LimitBuyLimitSell;
    // A limit far below market never triggers on its own; timeout must still
    // market-fill it rather than leaving the reservation open forever.
    strategy.percentage_reduction = dec!(0.9999);
    strategy.days_to_run = TimeDelta::hours(5);
    let params = SimulationParams {
        strategy,
        reference_coin: SmolStr::new("BTC"),
        ohlcv_field: OhlcvField::Close,
        candle: Granularity::new("1h"),
        window: TimeWindow::new(at(0), at(29)).unwrap(),
    };

    let results = simulator::run(&cube, &candidates, &params, "seed", &[TargetMetric::PercentageOfBoughtCoinsHitTarget])
        .unwrap();

    // Flat prices never hit the target either way; the meaningful assertion
    // is that `run` completes without stranding the order (no panic, no
    // InsufficientBalance on a later coordinate reusing the same portfolio
    // type would surface as an Err here).
    assert_eq!(results[&TargetMetric::PercentageOfBoughtCoinsHitTarget], Decimal::ZERO);
}
