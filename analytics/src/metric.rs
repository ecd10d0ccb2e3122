//! Target metrics computed at the end of a simulated run.
//!
//! Replaces the dynamic `getattr(instance, metric_name)` dispatch of the system
//! this engine replaces with a closed enum and a single [`compute`] entry point.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One of the metrics a backtest task may be asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    /// Fraction of candidate coins whose max price over the run horizon exceeded
    /// their target (entry * (1 + percentage_increase)).
    PercentageOfBoughtCoinsHitTarget,
    /// Mean of `last_price / entry_price` over candidates, as if none were sold.
    EndOfRunValueOfBoughtCoinsIfNotSold,
    /// Mean of `target_price / entry_price` for coins that hit target, and
    /// `last_price / entry_price` for the rest.
    EndOfRunValueOfBoughtCoinsIfSoldOnTarget,
    /// Terminal total portfolio worth, valued in the reference asset.
    CalculateEndOfRunValue,
}

impl TargetMetric {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PercentageOfBoughtCoinsHitTarget => "percentage_of_bought_coins_hit_target",
            Self::EndOfRunValueOfBoughtCoinsIfNotSold => {
                "end_of_run_value_of_bought_coins_if_not_sold"
            }
            Self::EndOfRunValueOfBoughtCoinsIfSoldOnTarget => {
                "end_of_run_value_of_bought_coins_if_sold_on_target"
            }
            Self::CalculateEndOfRunValue => "calculate_end_of_run_value",
        }
    }
}

/// Per-candidate-coin facts needed by the candidate-based target metrics.
///
/// `entry_price` of zero marks a candidate that never actually received a fill
/// (e.g. the buy order was cancelled before execution); such candidates are
/// excluded from the mean-based metrics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateOutcome {
    pub entry_price: Decimal,
    pub last_price: Decimal,
    pub target_price: Decimal,
    pub hit_target: bool,
}

/// Compute `metric` from the per-candidate outcomes of a run plus the terminal
/// portfolio value. Returns `None` when the metric is undefined for the given
/// inputs (e.g. no candidates were ever bought).
pub fn compute(
    metric: TargetMetric,
    candidates: &[CandidateOutcome],
    terminal_portfolio_value: Decimal,
) -> Option<Decimal> {
    match metric {
        TargetMetric::PercentageOfBoughtCoinsHitTarget => {
            if candidates.is_empty() {
                return None;
            }
            let hit = candidates.iter().filter(|c| c.hit_target).count();
            Some(Decimal::from(hit) / Decimal::from(candidates.len()))
        }
        TargetMetric::EndOfRunValueOfBoughtCoinsIfNotSold => {
            mean_relative_value(candidates, |c| c.last_price)
        }
        TargetMetric::EndOfRunValueOfBoughtCoinsIfSoldOnTarget => {
            mean_relative_value(candidates, |c| {
                if c.hit_target {
                    c.target_price
                } else {
                    c.last_price
                }
            })
        }
        TargetMetric::CalculateEndOfRunValue => Some(terminal_portfolio_value),
    }
}

fn mean_relative_value(
    candidates: &[CandidateOutcome],
    value_at: impl Fn(&CandidateOutcome) -> Decimal,
) -> Option<Decimal> {
    let relative: Vec<Decimal> = candidates
        .iter()
        .filter(|c| !c.entry_price.is_zero())
        .map(|c| value_at(c) / c.entry_price)
        .collect();

    if relative.is_empty() {
        return None;
    }

    let sum: Decimal = relative.iter().sum();
    Some(sum / Decimal::from(relative.len()))
}
