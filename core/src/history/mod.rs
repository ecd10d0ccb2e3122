//! # History Store (C1)
//!
//! An in-memory columnar cube of OHLCV prices, loaded once and shared
//! read-only across every worker. See spec §3 and §4.1.
//!
//! The on-disk/network candle archive loader is explicitly out of scope (spec
//! §1); [`PriceSource`] is the narrow contract this store needs from it, and
//! [`InMemoryPriceSource`] is a small reference implementation used by tests
//! and the CLI's fixture mode.

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use smol_str::SmolStr;
use std::fmt;

use crate::error::HistoryError;

/// A candle-width tag, e.g. `"1h"`, `"1d"`, `"3d"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Granularity(SmolStr);

impl Granularity {
    pub fn new(tag: impl Into<SmolStr>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Numeric width of this candle in hours. This is the value the loaded
    /// `weight` plane carries (spec §3: "the weight plane carries the
    /// candle-granularity tag itself"): the tag is not itself a price, so we
    /// decode it to the scalar the oversold pipeline's candle-independence
    /// step (spec §4.3) actually needs to collapse multiple granularities
    /// onto one scale.
    pub fn hours(&self) -> Result<f64, HistoryError> {
        let s = self.0.as_str();
        let (digits, unit) = s.split_at(s.len().saturating_sub(1));
        let n: f64 = digits
            .parse()
            .map_err(|_| HistoryError::MissingGranularity(s.to_string()))?;
        match unit {
            "h" => Ok(n),
            "d" => Ok(n * 24.0),
            "w" => Ok(n * 24.0 * 7.0),
            _ => Err(HistoryError::MissingGranularity(s.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl serde::Serialize for Granularity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for Granularity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Granularity::new(s))
    }
}

/// The enumerated OHLCV planes, plus the synthetic `weight` plane (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OhlcvField {
    Open,
    High,
    Low,
    Close,
    Volume,
    Weight,
}

impl fmt::Display for OhlcvField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OhlcvField::Open => "open",
            OhlcvField::High => "high",
            OhlcvField::Low => "low",
            OhlcvField::Close => "close",
            OhlcvField::Volume => "volume",
            OhlcvField::Weight => "weight",
        };
        write!(f, "{s}")
    }
}

/// A raw per-granularity table as it comes out of the external archive: rows
/// indexed by timestamp (ms), columns are base-asset tickers (spec §6).
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RawFrame {
    pub timestamps_ms: Vec<i64>,
    pub columns: IndexMap<SmolStr, Vec<f64>>,
}

/// The narrow external contract for pulling one candle table out of the
/// archive. Implementations of the real loader live outside this crate.
pub trait PriceSource {
    fn load_rows(
        &self,
        granularity: &Granularity,
        reference_coin: &str,
        ohlcv_field: OhlcvField,
    ) -> Result<RawFrame, HistoryError>;
}

/// Table-name convention for the external archive (spec §6).
pub fn table_name(ohlcv_field: OhlcvField, reference_coin: &str, granularity: &Granularity) -> String {
    format!(
        "COIN_HISTORY_{}_{}_{}",
        ohlcv_field, reference_coin, granularity
    )
}

/// A dense per-granularity frame: one row per unique timestamp, one column per
/// base asset. The `weight` plane is not stored densely (every cell within a
/// frame carries the same value); see [`Granularity::hours`].
#[derive(Debug, Clone, PartialEq)]
pub struct GranularityFrame {
    pub granularity: Granularity,
    /// Strictly increasing, unique (duplicates removed by keeping the first).
    pub timestamps: Vec<i64>,
    pub assets: Vec<SmolStr>,
    /// Row-major `[timestamp][asset]`.
    rows: Vec<Vec<f64>>,
}

impl GranularityFrame {
    pub(crate) fn from_raw(granularity: Granularity, raw: RawFrame) -> Self {
        let assets: Vec<SmolStr> = raw.columns.keys().cloned().collect();

        // Dedupe by timestamp keeping the first occurrence, and sort.
        let mut seen = std::collections::HashSet::new();
        let mut order: Vec<usize> = (0..raw.timestamps_ms.len())
            .filter(|&i| seen.insert(raw.timestamps_ms[i]))
            .collect();
        order.sort_by_key(|&i| raw.timestamps_ms[i]);

        let timestamps: Vec<i64> = order.iter().map(|&i| raw.timestamps_ms[i]).collect();
        let rows: Vec<Vec<f64>> = order
            .iter()
            .map(|&i| assets.iter().map(|a| raw.columns[a][i]).collect())
            .collect();

        Self {
            granularity,
            timestamps,
            assets,
            rows,
        }
    }

    fn asset_index(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a.as_str() == asset)
    }
}

/// A (possibly merged/concatenated) read-only slice of history, sorted by
/// timestamp ascending.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct View {
    pub timestamps: Vec<i64>,
    pub assets: Vec<SmolStr>,
    rows: Vec<Vec<f64>>,
    /// Candle width (hours) of the granularity each row was drawn from. Used
    /// by the oversold pipeline to collapse a multi-granularity slice onto
    /// one scale; ignored by callers that only care about prices.
    pub weights: Vec<f64>,
}

impl View {
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// The last (most recent) row, as `{ asset -> value }`, dropping NaNs.
    pub fn last_row(&self) -> IndexMap<SmolStr, f64> {
        match self.rows.last() {
            None => IndexMap::new(),
            Some(row) => self
                .assets
                .iter()
                .zip(row.iter())
                .filter(|(_, v)| !v.is_nan())
                .map(|(a, v)| (a.clone(), *v))
                .collect(),
        }
    }

    pub fn row(&self, index: usize) -> Option<&[f64]> {
        self.rows.get(index).map(|r| r.as_slice())
    }
}

/// One segment of a [`merged_slice`](PriceCube::merged_slice) plan: a
/// `(offset_start, offset_end)` window relative to the plan's `end_time`, read
/// from `granularity`.
#[derive(Debug, Clone)]
pub struct MergedSegment {
    pub offset_start: TimeDelta,
    pub offset_end: TimeDelta,
    pub granularity: Granularity,
}

/// Immutable multi-dimensional price cube, shared read-only across workers
/// (spec §3, §5).
#[derive(Debug, Clone)]
pub struct PriceCube {
    pub reference_coin: SmolStr,
    pub ohlcv_field: OhlcvField,
    frames: IndexMap<Granularity, GranularityFrame>,
}

impl PriceCube {
    /// Load every requested granularity once from `source` (spec §4.1).
    pub fn load(
        granularities: &[Granularity],
        reference_coin: &str,
        ohlcv_field: OhlcvField,
        source: &dyn PriceSource,
    ) -> Result<Self, HistoryError> {
        let mut frames = IndexMap::new();
        for granularity in granularities {
            let raw = source.load_rows(granularity, reference_coin, ohlcv_field)?;
            frames.insert(
                granularity.clone(),
                GranularityFrame::from_raw(granularity.clone(), raw),
            );
        }
        Ok(Self {
            reference_coin: SmolStr::new(reference_coin),
            ohlcv_field,
            frames,
        })
    }

    /// Build a cube directly from already-loaded frames — the path tests and
    /// the scenario fixtures use, bypassing the external archive entirely.
    pub fn from_frames(reference_coin: &str, ohlcv_field: OhlcvField, frames: Vec<GranularityFrame>) -> Self {
        Self {
            reference_coin: SmolStr::new(reference_coin),
            ohlcv_field,
            frames: frames.into_iter().map(|f| (f.granularity.clone(), f)).collect(),
        }
    }

    fn frame(&self, granularity: &Granularity) -> Result<&GranularityFrame, HistoryError> {
        self.frames
            .get(granularity)
            .ok_or_else(|| HistoryError::MissingGranularity(granularity.as_str().to_string()))
    }

    fn plane_row(&self, frame: &GranularityFrame, row_index: usize) -> Vec<f64> {
        if self.ohlcv_field == OhlcvField::Weight {
            let w = frame.granularity.hours().unwrap_or(f64::NAN);
            vec![w; frame.assets.len()]
        } else {
            frame.rows[row_index].clone()
        }
    }

    /// Strict-bounds slice: `start_ms < ts < end_ms` (spec §9 pins strict
    /// bounds). If `start > end` the bounds are swapped and a warning logged.
    pub fn range_slice(
        &self,
        granularity: &Granularity,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<View, HistoryError> {
        let (start, end) = if start > end {
            tracing::warn!(%start, %end, "range_slice called with start after end, swapping");
            (end, start)
        } else {
            (start, end)
        };
        let frame = self.frame(granularity)?;
        let start_ms = start.timestamp_millis();
        let end_ms = end.timestamp_millis();

        let mut timestamps = Vec::new();
        let mut rows = Vec::new();
        for (i, &ts) in frame.timestamps.iter().enumerate() {
            if ts > start_ms && ts < end_ms {
                timestamps.push(ts);
                rows.push(self.plane_row(frame, i));
            }
        }

        if timestamps.is_empty() {
            return Err(HistoryError::InsufficientHistory {
                granularity: granularity.as_str().to_string(),
                end,
            });
        }

        let weight = frame.granularity.hours().unwrap_or(f64::NAN);
        let weights = vec![weight; timestamps.len()];

        Ok(View {
            timestamps,
            assets: frame.assets.clone(),
            rows,
            weights,
        })
    }

    /// Exact-timestamp lookup; NaNs are dropped from the returned mapping.
    pub fn point_lookup(
        &self,
        granularity: &Granularity,
        current_time: DateTime<Utc>,
    ) -> Result<IndexMap<SmolStr, f64>, HistoryError> {
        let frame = self.frame(granularity)?;
        let target_ms = current_time.timestamp_millis();
        let idx = frame
            .timestamps
            .binary_search(&target_ms)
            .map_err(|_| HistoryError::InsufficientHistory {
                granularity: granularity.as_str().to_string(),
                end: current_time,
            })?;

        let row = self.plane_row(frame, idx);
        Ok(frame
            .assets
            .iter()
            .zip(row.iter())
            .filter(|(_, v)| !v.is_nan())
            .map(|(a, v)| (a.clone(), *v))
            .collect())
    }

    /// Point-lookup a single asset's price, for the simulator's tick loop.
    pub fn price_of(
        &self,
        granularity: &Granularity,
        asset: &str,
        current_time: DateTime<Utc>,
    ) -> Result<f64, HistoryError> {
        let frame = self.frame(granularity)?;
        let col = frame.asset_index(asset).ok_or_else(|| HistoryError::InsufficientHistory {
            granularity: granularity.as_str().to_string(),
            end: current_time,
        })?;
        let target_ms = current_time.timestamp_millis();
        let idx = frame
            .timestamps
            .binary_search(&target_ms)
            .map_err(|_| HistoryError::InsufficientHistory {
                granularity: granularity.as_str().to_string(),
                end: current_time,
            })?;
        let value = frame.rows[idx][col];
        if value.is_nan() {
            Err(HistoryError::InsufficientHistory {
                granularity: granularity.as_str().to_string(),
                end: current_time,
            })
        } else {
            Ok(value)
        }
    }

    /// Concatenate several [`range_slice`](Self::range_slice)s drawn from a
    /// plan of `(offset_start, offset_end, granularity)` segments relative to
    /// `end_time`, plus a fallback granularity for any remainder, sorted by
    /// timestamp (spec §4.1, used by the oversold pipeline).
    pub fn merged_slice(
        &self,
        plan: &[MergedSegment],
        end_time: DateTime<Utc>,
        fallback: &Granularity,
    ) -> Result<View, HistoryError> {
        let mut timestamps = Vec::new();
        let mut rows = Vec::new();
        let mut weights = Vec::new();
        let mut assets: Option<Vec<SmolStr>> = None;

        let mut segments: Vec<(DateTime<Utc>, DateTime<Utc>, Granularity)> = plan
            .iter()
            .map(|seg| {
                (
                    end_time + seg.offset_start,
                    end_time + seg.offset_end,
                    seg.granularity.clone(),
                )
            })
            .collect();

        if segments.is_empty() {
            segments.push((self.earliest(fallback)?, end_time, fallback.clone()));
        }

        for (start, end, granularity) in segments {
            match self.range_slice(&granularity, start, end) {
                Ok(view) => {
                    assets.get_or_insert_with(|| view.assets.clone());
                    timestamps.extend(view.timestamps.iter().copied());
                    weights.extend(view.weights.iter().copied());
                    rows.extend(view.rows.into_iter());
                }
                Err(HistoryError::InsufficientHistory { .. }) => continue,
                Err(other) => return Err(other),
            }
        }

        if timestamps.is_empty() {
            return Err(HistoryError::InsufficientHistory {
                granularity: fallback.as_str().to_string(),
                end: end_time,
            });
        }

        let mut order: Vec<usize> = (0..timestamps.len()).collect();
        order.sort_by_key(|&i| timestamps[i]);

        Ok(View {
            timestamps: order.iter().map(|&i| timestamps[i]).collect(),
            weights: order.iter().map(|&i| weights[i]).collect(),
            assets: assets.unwrap_or_default(),
            rows: order.iter().map(|&i| rows[i].clone()).collect(),
        })
    }

    fn earliest(&self, granularity: &Granularity) -> Result<DateTime<Utc>, HistoryError> {
        let frame = self.frame(granularity)?;
        frame
            .timestamps
            .first()
            .and_then(|&ms| DateTime::from_timestamp_millis(ms))
            .ok_or_else(|| HistoryError::InsufficientHistory {
                granularity: granularity.as_str().to_string(),
                end: Utc::now(),
            })
    }
}

/// A simple in-memory [`PriceSource`] used by tests and fixtures: rows are
/// supplied directly rather than read off disk.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPriceSource {
    frames: std::collections::HashMap<(Granularity, OhlcvField), RawFrame>,
}

impl InMemoryPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frame(mut self, granularity: Granularity, ohlcv_field: OhlcvField, raw: RawFrame) -> Self {
        self.frames.insert((granularity, ohlcv_field), raw);
        self
    }
}

impl PriceSource for InMemoryPriceSource {
    fn load_rows(
        &self,
        granularity: &Granularity,
        _reference_coin: &str,
        ohlcv_field: OhlcvField,
    ) -> Result<RawFrame, HistoryError> {
        self.frames
            .get(&(granularity.clone(), ohlcv_field))
            .cloned()
            .ok_or_else(|| HistoryError::SourceLoad(format!("no fixture for {granularity}/{ohlcv_field}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(tag: &str, timestamps: &[i64], asset: &str, values: &[f64]) -> GranularityFrame {
        let raw = RawFrame {
            timestamps_ms: timestamps.to_vec(),
            columns: IndexMap::from([(SmolStr::new(asset), values.to_vec())]),
        };
        GranularityFrame::from_raw(Granularity::new(tag), raw)
    }

    fn cube(tag: &str, timestamps: &[i64], asset: &str, values: &[f64]) -> PriceCube {
        PriceCube::from_frames("BTC", OhlcvField::Close, vec![frame(tag, timestamps, asset, values)])
    }

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn range_slice_is_strict_on_both_ends() {
        let cube = cube("1h", &[0, 1000, 2000, 3000], "X", &[1.0, 2.0, 3.0, 4.0]);
        let view = cube.range_slice(&Granularity::new("1h"), at(0), at(3000)).unwrap();
        assert_eq!(view.timestamps, vec![1000, 2000]);
    }

    #[test]
    fn range_slice_swaps_inverted_bounds() {
        let cube = cube("1h", &[0, 1000, 2000, 3000], "X", &[1.0, 2.0, 3.0, 4.0]);
        let view = cube.range_slice(&Granularity::new("1h"), at(3000), at(0)).unwrap();
        assert_eq!(view.timestamps, vec![1000, 2000]);
    }

    #[test]
    fn range_slice_is_idempotent() {
        let cube = cube("1h", &[0, 1000, 2000], "X", &[1.0, 2.0, 3.0]);
        let a = cube.range_slice(&Granularity::new("1h"), at(-1), at(3000)).unwrap();
        let b = cube.range_slice(&Granularity::new("1h"), at(-1), at(3000)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn point_lookup_misses_fail_with_insufficient_history() {
        let cube = cube("1h", &[0, 1000], "X", &[1.0, 2.0]);
        let err = cube.point_lookup(&Granularity::new("1h"), at(500)).unwrap_err();
        assert!(matches!(err, HistoryError::InsufficientHistory { .. }));
    }

    #[test]
    fn point_lookup_drops_nans() {
        let cube = cube("1h", &[0], "X", &[f64::NAN]);
        let row = cube.point_lookup(&Granularity::new("1h"), at(0)).unwrap();
        assert!(row.is_empty());
    }

    #[test]
    fn duplicate_timestamps_keep_the_first() {
        let raw = RawFrame {
            timestamps_ms: vec![0, 0, 1000],
            columns: IndexMap::from([(SmolStr::new("X"), vec![1.0, 99.0, 2.0])]),
        };
        let frame = GranularityFrame::from_raw(Granularity::new("1h"), raw);
        assert_eq!(frame.timestamps, vec![0, 1000]);
        assert_eq!(frame.rows, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn weight_plane_carries_candle_width() {
        let mut cube = cube("1d", &[0], "X", &[1.0]);
        cube.ohlcv_field = OhlcvField::Weight;
        let row = cube.point_lookup(&Granularity::new("1d"), at(0)).unwrap();
        assert_eq!(row["X"], 24.0);
    }
}
