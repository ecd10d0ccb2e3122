//! Configuration for a simulation batch.
//!
//! Replaces the kwargs fan-out of the system this engine replaces (spec §9) with
//! a single [`SimulationInputs`] record holding exactly the options enumerated
//! in spec §6.

use crate::history::Granularity;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The two equivalent ways of specifying a potential-coin cutoff band (spec §4.3).
///
/// `#[serde(untagged)]` tries each variant in order and accepts the first one
/// that deserialises; on its own that would let a payload supplying all four
/// fields silently parse as `Direct`, ignoring `cutoff_mean`/`cutoff_deviation`.
/// `#[serde(deny_unknown_fields)]` on both variants closes that gap: a form
/// carrying fields from the other one no longer matches either variant, so
/// "exactly one form" becomes a structural guarantee and a payload supplying
/// both, or neither, fails to deserialise (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CutoffSpec {
    #[serde(deny_unknown_fields)]
    Direct {
        low_cutoff: Decimal,
        high_cutoff: Decimal,
    },
    #[serde(deny_unknown_fields)]
    Mean {
        cutoff_mean: Decimal,
        cutoff_deviation: Decimal,
    },
}

impl CutoffSpec {
    /// Resolve to the `(low, high)` bounds used by the resolver's cutoff predicate.
    pub fn bounds(&self) -> (Decimal, Decimal) {
        match self {
            CutoffSpec::Direct {
                low_cutoff,
                high_cutoff,
            } => (*low_cutoff, *high_cutoff),
            CutoffSpec::Mean {
                cutoff_mean,
                cutoff_deviation,
            } => (cutoff_mean - cutoff_deviation, cutoff_mean + cutoff_deviation),
        }
    }
}

/// The strategy kind (sum type replacing the source's factory-of-factories, spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum StrategyKind {
    MarketBuyLimitSell,
    LimitBuyLimitSell,
    MarketBuyTrailingSell,
}

/// Parameters dynamic across a grid search, the "source" and "success" axes of
/// spec §4.4 combined with the strategy kind (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct StrategyParams {
    pub strategy_kind: StrategyKind,
    pub max_coins_to_buy: usize,
    pub percentage_increase: Decimal,
    pub percentage_reduction: Decimal,
    pub days_to_run: TimeDelta,
    pub stop_price_sell: Option<Decimal>,
    pub limit_sell_adjust_trail: Option<Decimal>,
    pub cutoff: CutoffSpec,
}

/// Options constant across an entire simulation batch (spec §6, exhaustive).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SimulationInputs {
    pub reference_coin: String,
    pub ohlcv_field: crate::history::OhlcvField,
    #[serde(default = "default_candle")]
    pub candle: Granularity,
    pub overall_start: DateTime<Utc>,
    pub overall_end: DateTime<Utc>,
    pub narrowed_start: DateTime<Utc>,
    pub narrowed_end: DateTime<Utc>,
    pub interval: TimeDelta,
    #[serde(default = "default_true")]
    pub forward_in_time: bool,
    #[serde(default)]
    pub increasing_range: bool,
    #[serde(default = "default_pool_count")]
    pub pool_count: usize,
}

fn default_candle() -> Granularity {
    Granularity::new("1h")
}

fn default_true() -> bool {
    true
}

fn default_pool_count() -> usize {
    8
}
