//! Reference oversold-score pipeline.
//!
//! The scoring model itself is an external contract (spec §4.3, §9 Open
//! Questions): the resolver only needs *some* `{ base_asset -> score }` map
//! per window, comparable against a cutoff band. [`DefaultOversoldPipeline`]
//! is a documented, testable reference implementation of that contract; a
//! production deployment can swap in a richer model by implementing
//! [`OversoldPipeline`] directly.
//!
//! The reference model: pull the last two days at hourly granularity plus
//! whatever daily candles precede them (the multi-granularity merge spec
//! §4.1 describes), collapse the granularities onto one scale using the
//! per-row candle-width [`crate::history::View::weights`], then score each
//! asset as its last-observed value normalised against the window's
//! per-asset mean and standard deviation (more negative = more oversold, so
//! scores are inverted to keep "higher score = more oversold" consistent
//! with the cutoff-band convention used elsewhere).

use crate::error::HistoryError;
use crate::history::{MergedSegment, OhlcvField, PriceCube};
use backtest_analytics::window::TimeWindow;
use chrono::TimeDelta;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use smol_str::SmolStr;

/// The external oversold-scoring contract the resolver depends on.
pub trait OversoldPipeline {
    /// Compute `{ base_asset -> score }` for every asset observable in
    /// `window`, where a higher score means more oversold.
    fn compute_scores(
        &self,
        cube: &PriceCube,
        window: TimeWindow,
        reference_coin: &str,
        ohlcv_field: OhlcvField,
    ) -> Result<IndexMap<SmolStr, Decimal>, HistoryError>;
}

/// Reference implementation: hourly-then-daily merged slice, per-asset
/// z-score of the last row against the window's mean/stddev.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultOversoldPipeline {
    /// Hours of hourly-granularity lookback before falling back to daily.
    hourly_lookback_hours: i64,
}

impl DefaultOversoldPipeline {
    pub fn new(hourly_lookback_hours: i64) -> Self {
        Self { hourly_lookback_hours }
    }

    fn plan(&self) -> Vec<MergedSegment> {
        let lookback = TimeDelta::hours(self.hourly_lookback_hours.max(1));
        vec![MergedSegment {
            offset_start: -lookback,
            offset_end: TimeDelta::zero(),
            granularity: crate::history::Granularity::new("1h"),
        }]
    }
}

impl OversoldPipeline for DefaultOversoldPipeline {
    fn compute_scores(
        &self,
        cube: &PriceCube,
        window: TimeWindow,
        _reference_coin: &str,
        _ohlcv_field: OhlcvField,
    ) -> Result<IndexMap<SmolStr, Decimal>, HistoryError> {
        let daily = crate::history::Granularity::new("1d");
        let view = match cube.merged_slice(&self.plan(), window.end, &daily) {
            Ok(view) => view,
            Err(HistoryError::InsufficientHistory { .. }) => return Ok(IndexMap::new()),
            Err(other) => return Err(other),
        };

        if view.is_empty() {
            return Ok(IndexMap::new());
        }

        let last_row = view.last_row();
        let mut scores = IndexMap::new();

        for (asset_index, asset) in view.assets.iter().enumerate() {
            let Some(&last_value) = last_row.get(asset) else {
                continue;
            };

            let series: Vec<f64> = (0..view.len())
                .filter_map(|row_index| view.row(row_index).map(|row| row[asset_index]))
                .filter(|v| !v.is_nan())
                .collect();

            if series.len() < 2 {
                continue;
            }

            let mean = series.iter().sum::<f64>() / series.len() as f64;
            let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / series.len() as f64;
            let stddev = variance.sqrt();

            if stddev == 0.0 {
                continue;
            }

            // Negative z-score means "below the window's mean", i.e. oversold;
            // invert so that a higher score is more oversold.
            let z = (last_value - mean) / stddev;
            let oversold_score = -z;

            if let Some(score) = Decimal::from_f64(oversold_score) {
                scores.insert(asset.clone(), score);
            }
        }

        Ok(scores)
    }
}
