//! # Grid Enumerator (C4)
//!
//! Builds the Result Cube skeleton from a set of named axes and yields the
//! Cartesian product of their values in deterministic order, `time_intervals`
//! outermost so the driver's C1 reads stay time-local (spec §4.4).

use crate::config::StrategyKind;
use backtest_analytics::window::TimeWindow;
use chrono::TimeDelta;
use indexmap::IndexMap;
use itertools::Itertools;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// One value a grid axis can take. Covers every axis kind spec §4.4/§6 names:
/// the time-interval axis, the strategy-kind axis, the numeric success/source
/// axes, the `days_to_run` duration axis, and `max_coins_to_buy`.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisValue {
    Window(TimeWindow),
    Strategy(StrategyKind),
    Decimal(Decimal),
    Count(usize),
    Duration(TimeDelta),
}

impl AxisValue {
    /// Canonical label used both for lexicographic axis sorting and as the
    /// coordinate key inside the Result Cube's sparse accumulator.
    pub fn label(&self) -> String {
        match self {
            AxisValue::Window(w) => w.encode(),
            AxisValue::Strategy(s) => format!("{s:?}"),
            AxisValue::Decimal(d) => d.to_string(),
            AxisValue::Count(n) => n.to_string(),
            AxisValue::Duration(d) => d.num_milliseconds().to_string(),
        }
    }
}

/// A named grid axis. Values are sorted lexicographically by [`AxisValue::label`]
/// at construction, except `days_to_run`, whose producer order is preserved
/// per spec §4.4 (timedeltas must not be silently reordered).
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub values: Vec<AxisValue>,
}

impl Axis {
    pub fn new(name: impl Into<String>, mut values: Vec<AxisValue>) -> Self {
        let name = name.into();
        if name != "days_to_run" {
            values.sort_by_key(|v| v.label());
        }
        Self { name, values }
    }

    fn index_of(&self, value: &AxisValue) -> Option<usize> {
        self.values.iter().position(|v| v == value)
    }
}

/// The complete set of axes for a grid search: the outermost `time_intervals`
/// axis plus every other axis (strategy, success, source) in the order the
/// caller assembled them.
#[derive(Debug, Clone)]
pub struct GridAxes {
    pub time_intervals: Axis,
    pub extra: Vec<Axis>,
}

impl GridAxes {
    /// All axes in cube-dimension order: `time_intervals` first, then `extra`.
    fn all(&self) -> Vec<&Axis> {
        std::iter::once(&self.time_intervals)
            .chain(self.extra.iter())
            .collect()
    }

    fn shape(&self) -> Vec<usize> {
        self.all().iter().map(|axis| axis.values.len()).collect()
    }
}

/// Enumerates the Cartesian product of [`GridAxes`] and builds the matching
/// [`ResultCube`] skeleton.
#[derive(Debug, Clone)]
pub struct GridEnumerator {
    axes: GridAxes,
    target_metrics: Vec<String>,
}

impl GridEnumerator {
    pub fn new(axes: GridAxes, target_metrics: Vec<String>) -> Self {
        Self { axes, target_metrics }
    }

    pub fn result_cube(&self) -> ResultCube {
        ResultCube::new(self.axes.clone(), self.target_metrics.clone())
    }

    /// One coordinate dict per grid point, `time_intervals` varying slowest
    /// (spec §4.4: "keeps time-adjacent work together"), in deterministic
    /// Cartesian-product order.
    pub fn coordinates(&self) -> Vec<IndexMap<String, AxisValue>> {
        let extra_names: Vec<String> = self.axes.extra.iter().map(|a| a.name.clone()).collect();
        let extra_product: Vec<Vec<AxisValue>> = if self.axes.extra.is_empty() {
            vec![Vec::new()]
        } else {
            self.axes
                .extra
                .iter()
                .map(|axis| axis.values.clone())
                .multi_cartesian_product()
                .collect()
        };

        let mut coordinates = Vec::with_capacity(self.axes.time_intervals.values.len() * extra_product.len());
        for window in &self.axes.time_intervals.values {
            for combo in &extra_product {
                let mut coordinate = IndexMap::new();
                coordinate.insert("time_intervals".to_string(), window.clone());
                for (name, value) in extra_names.iter().zip(combo) {
                    coordinate.insert(name.clone(), value.clone());
                }
                coordinates.push(coordinate);
            }
        }
        coordinates
    }
}

/// One N-dimensional labelled array per target metric, populated sparsely
/// during the run and materialised dense (NaN-filled) at write-out (spec §9:
/// "keep the dense Result Cube... but populate via a sparse accumulator").
#[derive(Debug, Clone)]
pub struct ResultCube {
    axes: GridAxes,
    sparse: HashMap<String, HashMap<Vec<usize>, f64>>,
}

impl ResultCube {
    fn new(axes: GridAxes, target_metrics: Vec<String>) -> Self {
        let sparse = target_metrics.into_iter().map(|m| (m, HashMap::new())).collect();
        Self { axes, sparse }
    }

    pub fn axis_names(&self) -> Vec<String> {
        self.axes.all().iter().map(|a| a.name.clone()).collect()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.axes.shape()
    }

    /// Record one result. Silently does nothing if `metric` was not declared
    /// at construction, or if `coordinate` does not resolve against every axis
    /// (a caller bug, not a recoverable runtime condition).
    pub fn write(&mut self, metric: &str, coordinate: &IndexMap<String, AxisValue>, value: f64) {
        let Some(index) = self.flat_coordinate(coordinate) else {
            return;
        };
        if let Some(cells) = self.sparse.get_mut(metric) {
            cells.insert(index, value);
        }
    }

    fn flat_coordinate(&self, coordinate: &IndexMap<String, AxisValue>) -> Option<Vec<usize>> {
        self.axes
            .all()
            .iter()
            .map(|axis| coordinate.get(&axis.name).and_then(|v| axis.index_of(v)))
            .collect()
    }

    /// Materialise one metric's dense array, NaN where no result was written.
    pub fn materialize(&self, metric: &str) -> DenseArray {
        let shape = self.shape();
        let total: usize = shape.iter().product();
        let mut data = vec![f64::NAN; total];

        if let Some(cells) = self.sparse.get(metric) {
            let strides = Self::strides(&shape);
            for (coordinate, value) in cells {
                let flat = coordinate
                    .iter()
                    .zip(strides.iter())
                    .map(|(c, s)| c * s)
                    .sum::<usize>();
                data[flat] = *value;
            }
        }

        DenseArray {
            axis_names: self.axis_names(),
            shape,
            data,
        }
    }

    fn strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1usize; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }
}

/// A materialised dense N-D array: row-major `data` of length `shape.product()`.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DenseArray {
    pub axis_names: Vec<String>,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn window(start: i64, end: i64) -> TimeWindow {
        TimeWindow::new(
            Utc.timestamp_millis_opt(start).unwrap(),
            Utc.timestamp_millis_opt(end).unwrap(),
        )
        .unwrap()
    }

    fn axes() -> GridAxes {
        GridAxes {
            time_intervals: Axis::new(
                "time_intervals",
                vec![AxisValue::Window(window(0, 10)), AxisValue::Window(window(10, 20))],
            ),
            extra: vec![Axis::new(
                "percentage_increase",
                vec![AxisValue::Decimal(dec!(0.05)), AxisValue::Decimal(dec!(0.10))],
            )],
        }
    }

    #[test]
    fn cube_shape_is_product_of_axis_lengths() {
        let enumerator = GridEnumerator::new(axes(), vec!["calculate_end_of_run_value".to_string()]);
        let cube = enumerator.result_cube();
        assert_eq!(cube.shape(), vec![2, 2]);
    }

    #[test]
    fn coordinate_count_matches_cartesian_product_size() {
        let enumerator = GridEnumerator::new(axes(), vec![]);
        let coords = enumerator.coordinates();
        assert_eq!(coords.len(), 4);
    }

    #[test]
    fn time_intervals_varies_slowest() {
        let enumerator = GridEnumerator::new(axes(), vec![]);
        let coords = enumerator.coordinates();
        let windows: Vec<_> = coords.iter().map(|c| c["time_intervals"].clone()).collect();
        assert_eq!(
            windows,
            vec![
                AxisValue::Window(window(0, 10)),
                AxisValue::Window(window(0, 10)),
                AxisValue::Window(window(10, 20)),
                AxisValue::Window(window(10, 20)),
            ]
        );
    }

    #[test]
    fn write_then_materialize_round_trips_the_value() {
        let enumerator = GridEnumerator::new(axes(), vec!["metric".to_string()]);
        let mut cube = enumerator.result_cube();
        let coordinate = enumerator.coordinates().into_iter().next().unwrap();
        cube.write("metric", &coordinate, 1.5);

        let dense = cube.materialize("metric");
        assert_eq!(dense.data[0], 1.5);
        assert!(dense.data[1..].iter().all(|v| v.is_nan()));
    }

    #[test]
    fn axis_names_are_exactly_the_union_provided() {
        let enumerator = GridEnumerator::new(axes(), vec![]);
        let cube = enumerator.result_cube();
        assert_eq!(cube.axis_names(), vec!["time_intervals", "percentage_increase"]);
    }

    #[test]
    fn days_to_run_axis_preserves_producer_order() {
        let axis = Axis::new(
            "days_to_run",
            vec![
                AxisValue::Duration(TimeDelta::days(30)),
                AxisValue::Duration(TimeDelta::days(1)),
            ],
        );
        assert_eq!(
            axis.values,
            vec![
                AxisValue::Duration(TimeDelta::days(30)),
                AxisValue::Duration(TimeDelta::days(1)),
            ]
        );
    }
}
