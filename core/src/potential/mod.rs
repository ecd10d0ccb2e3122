//! # Potential-Coin Resolver (C3)
//!
//! For a given history window and strategy cutoff, returns the subset of base
//! assets whose oversold score falls strictly inside the cutoff band, memoised
//! in a two-level cache so repeated windows/strategies are cheap (spec §4.3).

pub mod pipeline;

use crate::config::CutoffSpec;
use crate::error::PotentialCoinError;
use crate::history::{OhlcvField, PriceCube};
use backtest_analytics::window::TimeWindow;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use smol_str::SmolStr;
use std::collections::HashMap;

pub use pipeline::{DefaultOversoldPipeline, OversoldPipeline};

/// Immutable, hashable strategy key: `(low_cutoff, high_cutoff, reference_coin,
/// ohlcv_field)` (spec §3). Two equivalent cutoff parameterisations collapse to
/// the same key once resolved via [`CutoffSpec::bounds`].
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyKey {
    pub low_cutoff: Decimal,
    pub high_cutoff: Decimal,
    pub reference_coin: SmolStr,
    pub ohlcv_field: OhlcvField,
}

impl Eq for StrategyKey {}

impl std::hash::Hash for StrategyKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.low_cutoff.hash(state);
        self.high_cutoff.hash(state);
        self.reference_coin.hash(state);
        std::mem::discriminant(&self.ohlcv_field).hash(state);
    }
}

impl StrategyKey {
    pub fn new(cutoff: &CutoffSpec, reference_coin: &str, ohlcv_field: OhlcvField) -> Self {
        let (low, high) = cutoff.bounds();
        Self {
            low_cutoff: low,
            high_cutoff: high,
            reference_coin: SmolStr::new(reference_coin),
            ohlcv_field,
        }
    }
}

/// One window's worth of cached results: the expensive full `all` map, and the
/// cheap cutoff-filtered views derived from it.
#[derive(Debug, Clone, Default)]
struct WindowEntry {
    all: IndexMap<SmolStr, Decimal>,
    potential: HashMap<StrategyKey, IndexMap<SmolStr, Decimal>>,
}

/// The memoised two-level potential-coin cache and resolution pipeline.
#[derive(Clone)]
pub struct PotentialCoinResolver<P: OversoldPipeline = DefaultOversoldPipeline> {
    pipeline: P,
    table: HashMap<(i64, i64), WindowEntry>,
}

impl Default for PotentialCoinResolver<DefaultOversoldPipeline> {
    fn default() -> Self {
        Self::new(DefaultOversoldPipeline::default())
    }
}

impl<P: OversoldPipeline> PotentialCoinResolver<P> {
    pub fn new(pipeline: P) -> Self {
        Self {
            pipeline,
            table: HashMap::new(),
        }
    }

    fn key(window: TimeWindow) -> (i64, i64) {
        (window.start.timestamp_millis(), window.end.timestamp_millis())
    }

    /// Resolve the cutoff-filtered `{ base_asset -> score }` map for `window`
    /// and `cutoff`, computing and caching the underlying `all` map on first
    /// use (spec §4.3 algorithm, steps 1-4).
    pub fn resolve(
        &mut self,
        cube: &PriceCube,
        window: TimeWindow,
        cutoff: &CutoffSpec,
        reference_coin: &str,
        ohlcv_field: OhlcvField,
    ) -> Result<IndexMap<SmolStr, Decimal>, PotentialCoinError> {
        let key = Self::key(window);

        if !self.table.contains_key(&key) {
            let all = self.pipeline.compute_scores(cube, window, reference_coin, ohlcv_field)?;
            self.table.insert(key, WindowEntry { all, potential: HashMap::new() });
        }

        let entry = self.table.get_mut(&key).expect("just inserted");
        let strategy_key = StrategyKey::new(cutoff, reference_coin, ohlcv_field);

        if let Some(cached) = entry.potential.get(&strategy_key) {
            return Ok(cached.clone());
        }

        let (low, high) = cutoff.bounds();
        let filtered: IndexMap<SmolStr, Decimal> = entry
            .all
            .iter()
            .filter(|(_, score)| **score > low && **score < high)
            .map(|(asset, score)| (asset.clone(), *score))
            .collect();

        entry.potential.insert(strategy_key, filtered.clone());
        Ok(filtered)
    }

    /// Read the cutoff-filtered map for `window`/`cutoff` without computing
    /// it, `None` on a cache miss. Used by the parallel driver (spec §4.6)
    /// after a sequential warm-up pass over every distinct `(window, cutoff)`
    /// pair the grid search needs, so worker threads can read a shared
    /// resolver without ever taking `&mut self`.
    pub fn resolve_cached(
        &self,
        window: TimeWindow,
        cutoff: &CutoffSpec,
        reference_coin: &str,
        ohlcv_field: OhlcvField,
    ) -> Option<IndexMap<SmolStr, Decimal>> {
        let entry = self.table.get(&Self::key(window))?;
        let strategy_key = StrategyKey::new(cutoff, reference_coin, ohlcv_field);
        entry.potential.get(&strategy_key).cloned()
    }

    /// Read `all[window]` without computing it, failing with
    /// [`PotentialCoinError::MissingTimeIndex`] if the window was never
    /// resolved or loaded (spec §4.3 "missing-index failure").
    pub fn all_for_window(&self, window: TimeWindow) -> Result<&IndexMap<SmolStr, Decimal>, PotentialCoinError> {
        self.table
            .get(&Self::key(window))
            .map(|entry| &entry.all)
            .ok_or(PotentialCoinError::MissingTimeIndex(window))
    }

    /// Serialise only the `all` column to JSON (spec §4.3, §6: persistence is
    /// additive and the `potential` derived views are never written).
    pub fn save_all(&self) -> String {
        let serialisable: HashMap<String, HashMap<String, f64>> = self
            .table
            .iter()
            .map(|((start, end), entry)| {
                let scores = entry
                    .all
                    .iter()
                    .map(|(asset, score)| (asset.to_string(), score.to_f64().unwrap_or(f64::NAN)))
                    .collect();
                (format!("{start}_{end}"), scores)
            })
            .collect();
        serde_json::to_string(&serialisable).expect("in-memory maps always serialise")
    }

    /// Load a persisted `all` column. Loading is additive: existing entries
    /// are preserved, and loaded entries fill only the assets missing from an
    /// already-present window (spec §4.3, §6).
    pub fn load_all(&mut self, json: &str) -> Result<(), PotentialCoinError> {
        let loaded: HashMap<String, HashMap<String, f64>> = serde_json::from_str(json)
            .map_err(|_| PotentialCoinError::Configuration("malformed persisted potential-coin cache"))?;

        for (window_key, scores) in loaded {
            let (start_raw, end_raw) = window_key.split_once('_').ok_or(PotentialCoinError::Configuration(
                "malformed persisted window key",
            ))?;
            let start: i64 = start_raw.parse().map_err(|_| {
                PotentialCoinError::Configuration("malformed persisted window key")
            })?;
            let end: i64 = end_raw
                .parse()
                .map_err(|_| PotentialCoinError::Configuration("malformed persisted window key"))?;

            let entry = self.table.entry((start, end)).or_default();
            for (asset, score) in scores {
                let asset = SmolStr::new(asset);
                if !entry.all.contains_key(&asset) {
                    if let Some(score) = Decimal::from_f64_retain(score) {
                        entry.all.insert(asset, score);
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Granularity, GranularityFrame, RawFrame};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    struct CountingPipeline {
        calls: std::cell::RefCell<usize>,
        fixed: IndexMap<SmolStr, Decimal>,
    }

    impl OversoldPipeline for CountingPipeline {
        fn compute_scores(
            &self,
            _cube: &PriceCube,
            _window: TimeWindow,
            _reference_coin: &str,
            _ohlcv_field: OhlcvField,
        ) -> Result<IndexMap<SmolStr, Decimal>, crate::error::HistoryError> {
            *self.calls.borrow_mut() += 1;
            Ok(self.fixed.clone())
        }
    }

    fn cube() -> PriceCube {
        let raw = RawFrame {
            timestamps_ms: vec![0],
            columns: IndexMap::from([(SmolStr::new("X"), vec![1.0])]),
        };
        let frame = GranularityFrame::from_raw(Granularity::new("1h"), raw);
        PriceCube::from_frames("BTC", OhlcvField::Close, vec![frame])
    }

    fn window() -> TimeWindow {
        TimeWindow::new(
            Utc.timestamp_opt(0, 0).unwrap(),
            Utc.timestamp_opt(100, 0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn cache_idempotence_does_not_recompute_all() {
        let pipeline = CountingPipeline {
            calls: std::cell::RefCell::new(0),
            fixed: IndexMap::from([(SmolStr::new("X"), dec!(0.5))]),
        };
        let mut resolver = PotentialCoinResolver::new(pipeline);
        let cube = cube();
        let cutoff = CutoffSpec::Direct {
            low_cutoff: dec!(0.1),
            high_cutoff: dec!(0.9),
        };

        let first = resolver.resolve(&cube, window(), &cutoff, "BTC", OhlcvField::Close).unwrap();
        let second = resolver.resolve(&cube, window(), &cutoff, "BTC", OhlcvField::Close).unwrap();

        assert_eq!(first, second);
        assert_eq!(*resolver.pipeline.calls.borrow(), 1);
    }

    #[test]
    fn potential_is_subset_of_all_by_predicate() {
        let pipeline = CountingPipeline {
            calls: std::cell::RefCell::new(0),
            fixed: IndexMap::from([
                (SmolStr::new("X"), dec!(0.5)),
                (SmolStr::new("Y"), dec!(5.0)),
            ]),
        };
        let mut resolver = PotentialCoinResolver::new(pipeline);
        let cube = cube();
        let cutoff = CutoffSpec::Direct {
            low_cutoff: dec!(0.1),
            high_cutoff: dec!(0.9),
        };

        let filtered = resolver.resolve(&cube, window(), &cutoff, "BTC", OhlcvField::Close).unwrap();
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("X"));

        let all = resolver.all_for_window(window()).unwrap();
        for (asset, score) in &filtered {
            assert_eq!(all[asset], *score);
        }
    }

    #[test]
    fn missing_window_fails_with_missing_time_index() {
        let resolver: PotentialCoinResolver<CountingPipeline> = PotentialCoinResolver::new(CountingPipeline {
            calls: std::cell::RefCell::new(0),
            fixed: IndexMap::new(),
        });
        let err = resolver.all_for_window(window()).unwrap_err();
        assert!(matches!(err, PotentialCoinError::MissingTimeIndex(_)));
    }

    #[test]
    fn empty_candidate_set_is_not_an_error() {
        let pipeline = CountingPipeline {
            calls: std::cell::RefCell::new(0),
            fixed: IndexMap::new(),
        };
        let mut resolver = PotentialCoinResolver::new(pipeline);
        let cube = cube();
        let cutoff = CutoffSpec::Direct {
            low_cutoff: dec!(0.9),
            high_cutoff: dec!(1.1),
        };
        let filtered = resolver.resolve(&cube, window(), &cutoff, "BTC", OhlcvField::Close).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn persisted_all_fills_only_missing_assets() {
        let pipeline = CountingPipeline {
            calls: std::cell::RefCell::new(0),
            fixed: IndexMap::from([(SmolStr::new("X"), dec!(0.5))]),
        };
        let mut resolver = PotentialCoinResolver::new(pipeline);
        let cube = cube();
        let cutoff = CutoffSpec::Direct {
            low_cutoff: dec!(0.1),
            high_cutoff: dec!(0.9),
        };
        resolver.resolve(&cube, window(), &cutoff, "BTC", OhlcvField::Close).unwrap();

        let key = format!("{}_{}", window().start.timestamp_millis(), window().end.timestamp_millis());
        let payload = format!(r#"{{"{key}": {{"X": 0.99, "Y": 0.2}}}}"#);
        resolver.load_all(&payload).unwrap();

        let all = resolver.all_for_window(window()).unwrap();
        assert_eq!(all["X"], dec!(0.5)); // untouched: already present
        assert_eq!(all["Y"].to_f64().unwrap(), 0.2); // filled in from the loaded file
    }
}
