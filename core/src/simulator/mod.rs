//! # Simulator Core (C5)
//!
//! Runs one grid coordinate end to end: a discrete-time tick loop over a
//! portfolio, an order book, and a strategy's buy/sell rules, producing one
//! scalar per requested target metric (spec §4.5).

pub mod order;
pub mod portfolio;
pub mod strategy;

use crate::config::StrategyParams;
use crate::error::{HistoryError, SimulatorError};
use crate::history::{Granularity, OhlcvField, PriceCube};
use backtest_analytics::metric::{compute, CandidateOutcome, TargetMetric};
use backtest_analytics::window::TimeWindow;
use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use order::{OrderId, OrderKind, Side};
use portfolio::Portfolio;
use rand::seq::SliceRandom;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use smol_str::SmolStr;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Quantity below which a holding is swept as dust (spec §5).
const DUST_TOLERANCE: Decimal = dec!(0.001);

/// Everything a single backtest task needs beyond the shared Price Cube and
/// resolver (spec §4.5, §6).
#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub strategy: StrategyParams,
    pub reference_coin: SmolStr,
    pub ohlcv_field: OhlcvField,
    pub candle: Granularity,
    pub window: TimeWindow,
}

#[derive(Debug, Clone, Copy)]
struct BoughtState {
    entry_price: Decimal,
    target_price: Decimal,
    max_price: Decimal,
    last_price: Decimal,
}

/// Seed derived from `(simulation_at, coordinate_label)` so the random choice
/// of which candidate coin to buy is reproducible across workers (spec §4.5
/// "Determinism").
fn seed_for(simulation_at: DateTime<Utc>, coordinate_label: &str) -> u64 {
    let mut hasher = fnv::FnvHasher::default();
    simulation_at.timestamp_millis().hash(&mut hasher);
    coordinate_label.hash(&mut hasher);
    hasher.finish()
}

/// Run one coordinate's simulation and return the requested metrics. Metrics
/// undefined for this run (e.g. no candidates ever bought) are simply absent
/// from the returned map.
///
/// `candidates` is the potential-coin set already resolved for
/// `params.window` and `params.strategy.cutoff` (spec §4.3) — the caller owns
/// resolution and caching so that many coordinates sharing a window and
/// cutoff do not each pay for their own resolve (spec §4.6).
pub fn run(
    cube: &PriceCube,
    candidates: &IndexMap<SmolStr, Decimal>,
    params: &SimulationParams,
    coordinate_label: &str,
    target_metrics: &[TargetMetric],
) -> Result<HashMap<TargetMetric, Decimal>, SimulatorError> {
    let mut portfolio = Portfolio::new(params.reference_coin.clone());
    let mut bought: IndexMap<SmolStr, BoughtState> = IndexMap::new();
    let mut latest_prices: IndexMap<SmolStr, f64> = IndexMap::new();

    let step_hours = params.candle.hours()?;
    let step = TimeDelta::milliseconds((step_hours * 3_600_000.0) as i64);
    let mut simulation_at = params.window.start;

    while simulation_at <= params.window.end {
        match cube.point_lookup(&params.candle, simulation_at) {
            Ok(row) => {
                for (asset, price) in &row {
                    latest_prices.insert(asset.clone(), *price);
                }

                run_tick(
                    &mut portfolio,
                    &mut bought,
                    &latest_prices,
                    candidates,
                    cube,
                    params,
                    simulation_at,
                    coordinate_label,
                )?;
            }
            Err(HistoryError::InsufficientHistory { .. }) => {
                tracing::warn!(%simulation_at, "no price data for this tick, skipping");
            }
            Err(other) => return Err(SimulatorError::History(other)),
        }

        simulation_at += step;
    }

    let outcomes: Vec<CandidateOutcome> = bought
        .values()
        .map(|s| CandidateOutcome {
            entry_price: s.entry_price,
            last_price: s.last_price,
            target_price: s.target_price,
            hit_target: s.max_price > s.target_price,
        })
        .collect();

    let terminal_value = portfolio.total_value(&latest_prices);

    let mut results = HashMap::new();
    for metric in target_metrics {
        if let Some(value) = compute(*metric, &outcomes, terminal_value) {
            results.insert(*metric, value);
        }
    }
    Ok(results)
}

#[allow(clippy::too_many_arguments)]
fn run_tick(
    portfolio: &mut Portfolio,
    bought: &mut IndexMap<SmolStr, BoughtState>,
    latest_prices: &IndexMap<SmolStr, f64>,
    candidates: &IndexMap<SmolStr, Decimal>,
    cube: &PriceCube,
    params: &SimulationParams,
    simulation_at: DateTime<Utc>,
    coordinate_label: &str,
) -> Result<(), SimulatorError> {
    // Step 1: try to execute every open order against this tick's prices.
    let mut to_fill: Vec<(OrderId, Side, SmolStr, Option<f64>)> = Vec::new();
    let mut to_cancel: Vec<OrderId> = Vec::new();

    for order in portfolio.open_orders() {
        let current_price = latest_prices.get(order.base_asset.as_str()).copied();

        let triggered = match (order.kind, current_price) {
            (OrderKind::Market, _) => true,
            (OrderKind::StopLimit, Some(price)) => {
                order.stop_triggered(Decimal::from_f64(price).unwrap_or(Decimal::ZERO))
            }
            (_, Some(price)) => order.limit_triggered(Decimal::from_f64(price).unwrap_or(Decimal::ZERO)),
            (_, None) => false,
        };

        if triggered {
            to_fill.push((order.id, order.side, order.base_asset.clone(), current_price));
        } else if order.is_timed_out(simulation_at) {
            // Buy timeout -> market fill (prevents cash stranding); sell
            // timeout -> cancel (prevents forced loss), per the resolved
            // Open Question on order-timeout semantics.
            match order.side {
                Side::Buy => to_fill.push((order.id, order.side, order.base_asset.clone(), current_price)),
                Side::Sell => to_cancel.push(order.id),
            }
        }
    }

    for (id, side, base_asset, maybe_price) in to_fill {
        let Some(price) = maybe_price else {
            // No price at all this tick for a timed-out buy: leave it open
            // rather than filling at an unknown price.
            continue;
        };
        let price_dec = Decimal::from_f64(price).unwrap_or(Decimal::ZERO);
        if side == Side::Buy {
            let target_price = price_dec * (Decimal::ONE + params.strategy.percentage_increase);
            bought.insert(
                base_asset,
                BoughtState {
                    entry_price: price_dec,
                    target_price,
                    max_price: price_dec,
                    last_price: price_dec,
                },
            );
        }
        portfolio.fill_order(id, price_dec);
    }
    for id in to_cancel {
        portfolio.cancel_order(id);
    }

    for (coin, state) in bought.iter_mut() {
        if let Some(&price) = latest_prices.get(coin.as_str()) {
            if let Some(price_dec) = Decimal::from_f64(price) {
                state.last_price = price_dec;
                state.max_price = state.max_price.max(price_dec);
            }
        }
    }

    // Ratchet every open trailing-stop sell's stop price up toward
    // current_price - limit_sell_adjust_trail as the market rises
    // (StrategyKind::MarketBuyTrailingSell, spec §4.5 "trailing stop"); a
    // missing trail defaults to 0 (stop trails right at the current price).
    let trailing_sells: Vec<(OrderId, SmolStr)> = portfolio
        .open_orders()
        .iter()
        .filter(|o| o.side == Side::Sell && o.kind == OrderKind::StopLimit)
        .map(|o| (o.id, o.base_asset.clone()))
        .collect();
    for (id, coin) in trailing_sells {
        if let Some(&price) = latest_prices.get(coin.as_str()) {
            if let Some(price_dec) = Decimal::from_f64(price) {
                let trail = params.strategy.limit_sell_adjust_trail.unwrap_or(Decimal::ZERO);
                portfolio.raise_stop_price(id, price_dec - trail);
            }
        }
    }

    // Step 2: place sells for every free (unlocked) altcoin holding.
    let free_altcoins: Vec<(SmolStr, Decimal)> = portfolio
        .free_altcoins()
        .map(|h| (h.coin_name.clone(), h.quantity))
        .collect();
    for (coin, quantity) in free_altcoins {
        if let Some(&price) = latest_prices.get(coin.as_str()) {
            let price_dec = Decimal::from_f64(price).unwrap_or(Decimal::ZERO);
            let plan = strategy::plan_sell(
                params.strategy.strategy_kind,
                price_dec,
                simulation_at,
                params.strategy.percentage_increase,
                params.strategy.days_to_run,
                params.strategy.stop_price_sell,
            );
            let _ = portfolio.place_sell(plan.kind, coin.as_str(), quantity, plan.limit_price, plan.stop_price, plan.timeout);
        }
    }

    // Step 3: if there's free reference balance and room for more positions,
    // buy a random subset of the candidate pool.
    let free_ref = portfolio.free_quantity(params.reference_coin.as_str());
    if free_ref > DUST_TOLERANCE && params.strategy.max_coins_to_buy > 0 {
        let slots_available = params
            .strategy
            .max_coins_to_buy
            .saturating_sub(portfolio.altcoin_position_count());

        if slots_available > 0 {
            let held: std::collections::HashSet<SmolStr> =
                portfolio.holdings().iter().map(|h| h.coin_name.clone()).collect();

            let mut pool: Vec<SmolStr> = candidates
                .keys()
                .filter(|coin| !held.contains(*coin))
                .filter(|coin| cube.price_of(&params.candle, coin.as_str(), params.window.end).is_ok())
                .cloned()
                .collect();

            let seed = seed_for(simulation_at, coordinate_label);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            pool.shuffle(&mut rng);

            let notional_per_slot = Decimal::ONE / Decimal::from(params.strategy.max_coins_to_buy);
            let fundable = (free_ref / notional_per_slot)
                .floor()
                .to_u64()
                .unwrap_or(0) as usize;
            let to_buy_count = slots_available.min(pool.len()).min(fundable);

            for coin in pool.into_iter().take(to_buy_count) {
                let Some(&price) = latest_prices.get(coin.as_str()) else {
                    continue;
                };
                let price_dec = Decimal::from_f64(price).unwrap_or(Decimal::ZERO);
                if price_dec.is_zero() {
                    continue;
                }

                let plan = strategy::plan_buy(params.strategy.strategy_kind, price_dec, params.strategy.percentage_reduction);
                let reserve_quantity = notional_per_slot.min(portfolio.free_quantity(params.reference_coin.as_str()));
                if reserve_quantity <= Decimal::ZERO {
                    continue;
                }
                let quantity = reserve_quantity / plan.limit_price;
                let timeout = simulation_at + params.strategy.days_to_run;
                let _ = portfolio.place_buy(plan.kind, coin.as_str(), quantity, plan.limit_price, timeout, reserve_quantity);
            }
        }
    }

    // Step 4: sweep dust.
    portfolio.sweep_dust(latest_prices, DUST_TOLERANCE);

    // Step 5: remove any still-open sell order that is timed out. Buy orders
    // are deliberately excluded here: a timed-out buy with no price this tick
    // is left open by Step 1 so it can market-fill once a price appears, and
    // sweeping it here would cancel it in the very tick it was meant to
    // survive.
    let expired: Vec<OrderId> = portfolio
        .open_orders()
        .iter()
        .filter(|o| o.side == Side::Sell && o.is_timed_out(simulation_at))
        .map(|o| o.id)
        .collect();
    for id in expired {
        portfolio.cancel_order(id);
    }

    Ok(())
}
