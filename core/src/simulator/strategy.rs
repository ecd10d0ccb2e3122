//! Strategy-kind dispatch: the buy/sell order each strategy places for a
//! given market price (spec §4.5 "Strategy kinds").
//!
//! Replaces the abstract/concrete factory pairs of the system this engine
//! replaces with one sum type and a match per call site (spec §9).

use super::order::OrderKind;
use crate::config::StrategyKind;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;

/// What to place when opening a new altcoin position.
pub struct BuyPlan {
    pub kind: OrderKind,
    /// Meaningful only for `Limit` kind; ignored for `Market` (which fills
    /// unconditionally at the next tick).
    pub limit_price: Decimal,
}

/// What to place once a position is held and unlocked.
pub struct SellPlan {
    pub kind: OrderKind,
    pub limit_price: Decimal,
    pub stop_price: Option<Decimal>,
    pub timeout: DateTime<Utc>,
}

pub fn plan_buy(strategy: StrategyKind, current_price: Decimal, percentage_reduction: Decimal) -> BuyPlan {
    match strategy {
        StrategyKind::MarketBuyLimitSell | StrategyKind::MarketBuyTrailingSell => BuyPlan {
            kind: OrderKind::Market,
            limit_price: current_price,
        },
        StrategyKind::LimitBuyLimitSell => BuyPlan {
            kind: OrderKind::Limit,
            limit_price: current_price * (Decimal::ONE - percentage_reduction),
        },
    }
}

pub fn plan_sell(
    strategy: StrategyKind,
    current_price: Decimal,
    current_time: DateTime<Utc>,
    percentage_increase: Decimal,
    days_to_run: TimeDelta,
    stop_price_sell: Option<Decimal>,
) -> SellPlan {
    let timeout = current_time + days_to_run;
    match strategy {
        StrategyKind::MarketBuyLimitSell | StrategyKind::LimitBuyLimitSell => SellPlan {
            kind: OrderKind::Limit,
            limit_price: current_price * (Decimal::ONE + percentage_increase),
            stop_price: None,
            timeout,
        },
        StrategyKind::MarketBuyTrailingSell => SellPlan {
            kind: OrderKind::StopLimit,
            limit_price: current_price * (Decimal::ONE + percentage_increase),
            stop_price: Some(stop_price_sell.unwrap_or(current_price)),
            timeout,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn limit_buy_discounts_from_current_price() {
        let plan = plan_buy(StrategyKind::LimitBuyLimitSell, dec!(100), dec!(0.1));
        assert_eq!(plan.limit_price, dec!(90));
        assert_eq!(plan.kind, OrderKind::Limit);
    }

    #[test]
    fn market_buy_tracks_current_price() {
        let plan = plan_buy(StrategyKind::MarketBuyLimitSell, dec!(100), dec!(0.1));
        assert_eq!(plan.kind, OrderKind::Market);
        assert_eq!(plan.limit_price, dec!(100));
    }

    #[test]
    fn trailing_sell_carries_a_stop_price() {
        let plan = plan_sell(
            StrategyKind::MarketBuyTrailingSell,
            dec!(100),
            Utc::now(),
            dec!(0.05),
            TimeDelta::days(1),
            Some(dec!(95)),
        );
        assert_eq!(plan.stop_price, Some(dec!(95)));
    }
}
