//! Order value type and its fill-state machine (spec §3, §4.5).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use smol_str::SmolStr;

/// Identity of an open order, assigned by the [`super::portfolio::Portfolio`]
/// that placed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderId(pub(crate) u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Market,
    Limit,
    StopLimit,
}

/// `fresh -> filled` on trigger; `fresh -> cancelled` on timeout has no state
/// of its own, the order is simply removed from the open list (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Fresh,
    Partial,
    Filled,
}

/// An open order. Immutable except for the `fill` transition (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: OrderId,
    pub side: Side,
    pub kind: OrderKind,
    pub base_asset: SmolStr,
    pub reference_asset: SmolStr,
    pub quantity: Decimal,
    pub limit_price: Decimal,
    pub stop_price: Option<Decimal>,
    pub timeout: DateTime<Utc>,
    pub fill: FillState,
}

impl Order {
    /// Whether this order's limit trigger is satisfied at `current_price`
    /// (spec §4.5: "Buy-limit fills when limit_price >= current_price;
    /// Sell-limit fills when limit_price <= current_price").
    pub fn limit_triggered(&self, current_price: Decimal) -> bool {
        match self.side {
            Side::Buy => self.limit_price >= current_price,
            Side::Sell => self.limit_price <= current_price,
        }
    }

    /// Whether a trailing stop-sell's trigger is satisfied.
    pub fn stop_triggered(&self, current_price: Decimal) -> bool {
        matches!(self.stop_price, Some(stop) if current_price <= stop)
    }

    pub fn is_timed_out(&self, current_time: DateTime<Utc>) -> bool {
        self.timeout < current_time
    }
}
