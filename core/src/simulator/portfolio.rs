//! Portfolio state: holdings, open orders, and the reservation discipline
//! that keeps locked quantities exactly equal to open-order reservations
//! (spec §3, §4.5, §8).

use super::order::{FillState, Order, OrderId, OrderKind, Side};
use crate::error::SimulatorError;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use smol_str::SmolStr;

/// A holding, locked when reserved against an open order (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct HoldingCoin {
    pub coin_name: SmolStr,
    pub quantity: Decimal,
    pub order_instance: Option<OrderId>,
}

impl HoldingCoin {
    pub fn is_locked(&self) -> bool {
        self.order_instance.is_some()
    }
}

/// An ordered sequence of holdings plus the list of open orders (spec §3).
/// The reference asset starts with quantity `1.0`; the whole simulation is
/// value-normalised against it.
#[derive(Debug, Clone)]
pub struct Portfolio {
    reference_asset: SmolStr,
    holdings: Vec<HoldingCoin>,
    open_orders: Vec<Order>,
    next_order_id: u64,
}

impl Portfolio {
    pub fn new(reference_asset: impl Into<SmolStr>) -> Self {
        let reference_asset = reference_asset.into();
        Self {
            holdings: vec![HoldingCoin {
                coin_name: reference_asset.clone(),
                quantity: Decimal::ONE,
                order_instance: None,
            }],
            reference_asset,
            open_orders: Vec::new(),
            next_order_id: 0,
        }
    }

    pub fn reference_asset(&self) -> &str {
        self.reference_asset.as_str()
    }

    pub fn open_orders(&self) -> &[Order] {
        &self.open_orders
    }

    pub fn holdings(&self) -> &[HoldingCoin] {
        &self.holdings
    }

    /// Sum of free (unlocked) quantity of `coin`.
    pub fn free_quantity(&self, coin: &str) -> Decimal {
        self.holdings
            .iter()
            .filter(|h| h.coin_name.as_str() == coin && !h.is_locked())
            .map(|h| h.quantity)
            .sum()
    }

    /// Free, unlocked altcoin holdings (excludes the reference asset).
    pub fn free_altcoins(&self) -> impl Iterator<Item = &HoldingCoin> {
        self.holdings
            .iter()
            .filter(|h| h.coin_name != self.reference_asset && !h.is_locked())
    }

    /// Count of distinct altcoin positions, locked or free (bounds
    /// `max_coins_to_buy`, spec §4.5 step 3).
    pub fn altcoin_position_count(&self) -> usize {
        self.holdings
            .iter()
            .filter(|h| h.coin_name != self.reference_asset)
            .map(|h| h.coin_name.clone())
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    fn next_id(&mut self) -> OrderId {
        let id = OrderId(self.next_order_id);
        self.next_order_id += 1;
        id
    }

    /// Move `quantity` of `coin` out of its free holding into a newly locked
    /// holding, atomically (spec §4.5 "Reservation discipline").
    fn reserve(&mut self, coin: &str, quantity: Decimal) -> Result<OrderId, SimulatorError> {
        let free_index = self
            .holdings
            .iter()
            .position(|h| h.coin_name.as_str() == coin && !h.is_locked())
            .ok_or_else(|| SimulatorError::InsufficientBalance {
                asset: SmolStr::new(coin),
                available: Decimal::ZERO,
                required: quantity,
            })?;

        if self.holdings[free_index].quantity < quantity {
            return Err(SimulatorError::InsufficientBalance {
                asset: SmolStr::new(coin),
                available: self.holdings[free_index].quantity,
                required: quantity,
            });
        }

        self.holdings[free_index].quantity -= quantity;
        let id = self.next_id();
        self.holdings.push(HoldingCoin {
            coin_name: SmolStr::new(coin),
            quantity,
            order_instance: Some(id),
        });
        Ok(id)
    }

    /// Release a reservation (order cancelled): merge the locked quantity
    /// back into `coin`'s free holding.
    fn release(&mut self, order_id: OrderId) {
        let Some(pos) = self.holdings.iter().position(|h| h.order_instance == Some(order_id)) else {
            return;
        };
        let locked = self.holdings.remove(pos);
        self.credit(&locked.coin_name, locked.quantity);
    }

    fn credit(&mut self, coin: &str, quantity: Decimal) {
        match self.holdings.iter_mut().find(|h| h.coin_name.as_str() == coin && !h.is_locked()) {
            Some(free) => free.quantity += quantity,
            None => self.holdings.push(HoldingCoin {
                coin_name: SmolStr::new(coin),
                quantity,
                order_instance: None,
            }),
        }
    }

    /// Place a buy order, reserving `reserve_quantity` of the reference asset.
    pub fn place_buy(
        &mut self,
        kind: OrderKind,
        base_asset: &str,
        quantity: Decimal,
        limit_price: Decimal,
        timeout: DateTime<Utc>,
        reserve_quantity: Decimal,
    ) -> Result<OrderId, SimulatorError> {
        let reference_asset = self.reference_asset.clone();
        let id = self.reserve(reference_asset.as_str(), reserve_quantity)?;
        self.open_orders.push(Order {
            id,
            side: Side::Buy,
            kind,
            base_asset: SmolStr::new(base_asset),
            reference_asset,
            quantity,
            limit_price,
            stop_price: None,
            timeout,
            fill: FillState::Fresh,
        });
        Ok(id)
    }

    /// Place a sell order, reserving `quantity` of `base_asset`.
    pub fn place_sell(
        &mut self,
        kind: OrderKind,
        base_asset: &str,
        quantity: Decimal,
        limit_price: Decimal,
        stop_price: Option<Decimal>,
        timeout: DateTime<Utc>,
    ) -> Result<OrderId, SimulatorError> {
        let reference_asset = self.reference_asset.clone();
        let id = self.reserve(base_asset, quantity)?;
        self.open_orders.push(Order {
            id,
            side: Side::Sell,
            kind,
            base_asset: SmolStr::new(base_asset),
            reference_asset,
            quantity,
            limit_price,
            stop_price,
            timeout,
            fill: FillState::Fresh,
        });
        Ok(id)
    }

    /// Fill an open order at `fill_price`: release its reservation, credit
    /// the counter-asset (spec §4.5 "Reservation discipline").
    pub fn fill_order(&mut self, order_id: OrderId, fill_price: Decimal) {
        let Some(pos) = self.open_orders.iter().position(|o| o.id == order_id) else {
            return;
        };
        let mut order = self.open_orders.remove(pos);
        order.fill = FillState::Filled;

        if let Some(locked_pos) = self.holdings.iter().position(|h| h.order_instance == Some(order_id)) {
            self.holdings.remove(locked_pos);
        }

        match order.side {
            Side::Buy => self.credit(&order.base_asset, order.quantity),
            Side::Sell => self.credit(&order.reference_asset, order.quantity * fill_price),
        }
    }

    /// Cancel an open order, releasing its reservation back to its free holding.
    pub fn cancel_order(&mut self, order_id: OrderId) {
        self.open_orders.retain(|o| o.id != order_id);
        self.release(order_id);
    }

    /// Ratchet a trailing-stop sell's `stop_price` up toward `candidate`,
    /// never down (spec §4.5 "trailing stop"). A no-op if the order is not
    /// open, or if `candidate` is not an improvement.
    pub fn raise_stop_price(&mut self, order_id: OrderId, candidate: Decimal) {
        if let Some(order) = self.open_orders.iter_mut().find(|o| o.id == order_id) {
            order.stop_price = Some(order.stop_price.map_or(candidate, |current| current.max(candidate)));
        }
    }

    /// Remove holdings (excluding locked and the reference asset) whose
    /// market-equivalent value is below `tolerance` (spec §4.5 step 4).
    pub fn sweep_dust(&mut self, prices: &IndexMap<SmolStr, f64>, tolerance: Decimal) {
        let reference_asset = self.reference_asset.clone();
        self.holdings.retain(|h| {
            if h.is_locked() || h.coin_name == reference_asset {
                return true;
            }
            let price = prices.get(h.coin_name.as_str()).copied().unwrap_or(0.0);
            let Some(price) = Decimal::from_f64(price) else {
                return true;
            };
            h.quantity * price >= tolerance
        });
    }

    /// Total portfolio worth, in the reference asset: free + locked holdings
    /// valued at `prices`, plus the reference asset itself at 1.0 (spec §3, §8).
    pub fn total_value(&self, prices: &IndexMap<SmolStr, f64>) -> Decimal {
        self.holdings
            .iter()
            .map(|h| {
                if h.coin_name == self.reference_asset {
                    h.quantity
                } else {
                    let price = prices.get(h.coin_name.as_str()).copied().unwrap_or(0.0);
                    let price = Decimal::from_f64(price).unwrap_or(Decimal::ZERO);
                    h.quantity * price
                }
            })
            .sum()
    }
}
