//! C9 — ExecutionEngine (spec §4.5). Drives C4–C8 in response to keeper
//! batches: bounds the oracle price against a confidence interval and a
//! second reference feed, matches trigger conditions, routes to
//! `PositionManager::increase_position`/`decrease_position`, and liquidates.
//!
//! Grounded on the teacher's `math/price.rs` (`standardize_price`,
//! confidence-bias adjustment around a Pyth-shaped `(price, conf, expo,
//! publish_time)` reading) for `get_oracle_price`, generalized from a single
//! bound check into the full trigger-matching and OCO routing this spec's
//! keeper batch needs, which the teacher's CLOB has no counterpart for (it
//! matches resting orders against each other, not against an oracle tick).

use std::collections::HashMap;

use crate::capabilities::{Ledger, PriceFeed, ReferencePriceFeed};
use crate::config::GovernanceConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::{Event, ExecutionOutcome};
use crate::funding_tracker::FundingTracker;
use crate::liquidity_pool::LiquidityPool;
use crate::math::constants::BPS;
use crate::math::{CastU256, SafeMath, U256};
use crate::order_book::OrderBook;
use crate::position_manager::PositionManager;
use crate::risk_validator::RiskValidator;
use crate::state::{Asset, AssetId, Market, MarketId, Order, OrderKind, PositionKey, UserId};

/// Stateless — every method takes the subsystems it drives as explicit
/// arguments rather than holding handles to them (spec §9's "invert the
/// cycle, pass engine as context" resolution of the C6↔C7↔C5 cyclic
/// reference).
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutionEngine;

fn pow10(exp: u32) -> EngineResult<U256> {
    let mut v = U256::from(1u64);
    for _ in 0..exp {
        v = v.safe_mul(U256::from(10u64))?;
    }
    Ok(v)
}

impl ExecutionEngine {
    /// `get_oracle_price(market, maximise)` (spec §4.5). Normalizes the raw
    /// oracle mantissa to 18 decimals and widens against the confidence
    /// interval when it exceeds the configured threshold; `maximise` biases
    /// the widened price up (`true`) or down (`false`).
    pub fn get_oracle_price(
        &self,
        market: &Market,
        maximise: bool,
        price_feed: &dyn PriceFeed,
    ) -> EngineResult<(U256, i64)> {
        let data = price_feed.get_unsafe(market.id)?;
        if data.price < 0 || data.expo > 0 {
            return Ok((U256::zero(), data.publish_time));
        }
        let exp = 18 + data.expo;
        if exp < 0 {
            return Ok((U256::zero(), data.publish_time));
        }
        let conv = pow10(exp as u32)?;
        let mut price = U256::from(data.price as u64).safe_mul(conv)?;

        if market.price_conf_multiplier_bps > 0 && !price.is_zero() {
            let conf_normalized = U256::from(data.confidence).safe_mul(conv)?;
            let conf_bps = conf_normalized.safe_mul(U256::from(BPS))?.safe_div(price)?;
            if conf_bps > U256::from(market.price_conf_threshold_bps) {
                let delta = conf_normalized.safe_mul(U256::from(market.price_conf_multiplier_bps))?.safe_div(U256::from(BPS))?;
                price = if maximise { price.safe_add(delta)? } else { price.checked_sub(delta).unwrap_or(U256::zero()) };
            }
        }
        Ok((price, data.publish_time))
    }

    fn within_reference_bound(price: U256, reference: U256, max_deviation_bps: u32) -> EngineResult<bool> {
        if reference.is_zero() || max_deviation_bps == 0 {
            return Ok(true);
        }
        let lower = reference.safe_mul(U256::from(BPS - max_deviation_bps))?.safe_div(U256::from(BPS))?;
        let upper = reference.safe_mul(U256::from(BPS + max_deviation_bps))?.safe_div(U256::from(BPS))?;
        Ok(price >= lower && price <= upper)
    }

    /// `execute_orders(ids, oracle_update_payload)` for trading orders (spec
    /// §4.5). `max_oracle_fee` is pulled from the keeper up front and the
    /// unused remainder refunded, since the batch has no on-chain
    /// `msg_value` to draw the update fee from implicitly. `trailing_refs`
    /// supplies the per-order keeper-chosen trailing-stop reference price
    /// (spec §8 scenario 6); an order with no entry defaults to 0, which
    /// naturally produces `"!ts-no-ref-price"`.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_orders(
        &self,
        ids: &[u32],
        oracle_payload: &[u8],
        max_oracle_fee: U256,
        trailing_refs: &HashMap<u32, U256>,
        keeper: UserId,
        now: i64,
        markets: &HashMap<MarketId, Market>,
        assets: &HashMap<AssetId, Asset>,
        governance: &GovernanceConfig,
        order_book: &mut OrderBook,
        position_manager: &mut PositionManager,
        pool: &mut LiquidityPool,
        funding: &mut FundingTracker,
        risk: &mut RiskValidator,
        price_feed: &mut dyn PriceFeed,
        reference_price_feed: &dyn ReferencePriceFeed,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        governance.require_keeper(&keeper)?;
        governance.require_not_paused_for_processing()?;

        if !max_oracle_fee.is_zero() {
            ledger.transfer_in(AssetId::NATIVE, keeper, max_oracle_fee)?;
        }
        let fee_consumed = price_feed.update(oracle_payload)?;
        let refund = max_oracle_fee.safe_sub(fee_consumed.min(max_oracle_fee))?;
        if !refund.is_zero() {
            ledger.transfer_out(AssetId::NATIVE, keeper, refund)?;
        }

        for &id in ids {
            self.execute_one_trading_order(
                id,
                trailing_refs.get(&id).copied().unwrap_or_else(U256::zero),
                keeper,
                now,
                markets,
                assets,
                governance,
                order_book,
                position_manager,
                pool,
                funding,
                risk,
                price_feed,
                reference_price_feed,
                ledger,
                events,
            );
        }
        Ok(())
    }

    /// The per-order body of `execute_orders`, covering both the pre-checks
    /// spec §4.5's outer loop performs (min order age, staleness) and
    /// `_execute_order`'s own checks and routing. Never propagates an
    /// error: every outcome is folded into an event and, for a hard
    /// failure, an order cancellation.
    #[allow(clippy::too_many_arguments)]
    fn execute_one_trading_order(
        &self,
        id: u32,
        trailing_ref: U256,
        keeper: UserId,
        now: i64,
        markets: &HashMap<MarketId, Market>,
        assets: &HashMap<AssetId, Asset>,
        governance: &GovernanceConfig,
        order_book: &mut OrderBook,
        position_manager: &mut PositionManager,
        pool: &mut LiquidityPool,
        funding: &mut FundingTracker,
        risk: &mut RiskValidator,
        price_feed: &dyn PriceFeed,
        reference_price_feed: &dyn ReferencePriceFeed,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) {
        let order = match order_book.order(id) {
            Some(o) => o.clone(),
            None => {
                events.push(Event::OrderCancelled { order_id: id, reason: "!order" });
                return;
            }
        };
        let market = match markets.get(&order.market) {
            Some(m) => *m,
            None => {
                events.push(Event::OrderSkipped { order_id: id, reason: "!no-market" });
                return;
            }
        };
        let asset_cfg = match assets.get(&order.asset) {
            Some(a) => *a,
            None => {
                events.push(Event::OrderSkipped { order_id: id, reason: "!no-asset" });
                return;
            }
        };

        if now - order.timestamp < market.min_order_age_s {
            events.push(Event::OrderSkipped { order_id: id, reason: "!early" });
            return;
        }

        let (price, publish_time) = match self.get_oracle_price(&market, order.is_long, price_feed) {
            Ok(v) => v,
            Err(_) => {
                events.push(Event::OrderSkipped { order_id: id, reason: "!no-price" });
                return;
            }
        };
        if now - publish_time > market.oracle_max_age_s {
            events.push(Event::OrderSkipped { order_id: id, reason: "!stale" });
            return;
        }

        let (outcome, reason) = self.try_execute(
            &order,
            &market,
            &asset_cfg,
            price,
            trailing_ref,
            keeper,
            now,
            governance,
            risk,
            funding,
            pool,
            order_book,
            position_manager,
            reference_price_feed,
            ledger,
            events,
        );

        match outcome {
            ExecutionOutcome::Executed => {
                events.push(Event::OrderExecuted { order_id: id, price });
                if matches!(order.detail.kind, OrderKind::TrailingStop) {
                    events.push(Event::TrailingStopOrderExecuted { order_id: id, price, trailing_ref });
                }
            }
            ExecutionOutcome::Cancelled => {
                let _ = order_book.cancel_with_reason(id, reason, keeper, ledger, events);
            }
            ExecutionOutcome::Kept => {
                events.push(Event::OrderSkipped { order_id: id, reason });
            }
        }
    }

    /// `_execute_order(id, price, trailing_ref, keeper)` (spec §4.5): expiry,
    /// ttl, price-availability, reference-bound, trigger-match, OCO and
    /// routing, in that order.
    #[allow(clippy::too_many_arguments)]
    fn try_execute(
        &self,
        order: &Order,
        market: &Market,
        asset_cfg: &Asset,
        price: U256,
        trailing_ref: U256,
        keeper: UserId,
        now: i64,
        governance: &GovernanceConfig,
        risk: &mut RiskValidator,
        funding: &mut FundingTracker,
        pool: &mut LiquidityPool,
        order_book: &mut OrderBook,
        position_manager: &mut PositionManager,
        reference_price_feed: &dyn ReferencePriceFeed,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> (ExecutionOutcome, &'static str) {
        if order.size.is_zero() {
            return (ExecutionOutcome::Cancelled, "!order");
        }
        if order.detail.expiry > 0 && order.detail.expiry <= now {
            return (ExecutionOutcome::Cancelled, "!expired");
        }
        let ttl = now - order.timestamp;
        let ttl_cap = if order.ttl_kind_is_market() { governance.max_market_order_ttl_s } else { governance.max_trigger_order_ttl_s };
        if ttl > ttl_cap {
            return (ExecutionOutcome::Cancelled, "!too-old");
        }
        if price.is_zero() {
            return (ExecutionOutcome::Cancelled, "!no-price");
        }

        let reference = match reference_price_feed.get(market.id) {
            Ok(r) => r,
            Err(_) => U256::zero(),
        };
        match Self::within_reference_bound(price, reference, market.max_deviation_bps) {
            Ok(true) => {}
            Ok(false) => return (ExecutionOutcome::Kept, "!reference-price-deviation"),
            Err(_) => return (ExecutionOutcome::Kept, "!reference-price-deviation"),
        }

        match order.detail.kind {
            OrderKind::TrailingStop => {
                if order.detail.trailing_stop_bps == 0 {
                    return (ExecutionOutcome::Cancelled, "!no-trailing-stop-percentage");
                }
                if trailing_ref.is_zero() {
                    return (ExecutionOutcome::Kept, "!ts-no-ref-price");
                }
                let bps = order.detail.trailing_stop_bps;
                let fires = if order.is_long {
                    trailing_ref.safe_mul(U256::from(BPS + bps)).and_then(|v| v.safe_div(U256::from(BPS))).map(|bound| price >= bound).unwrap_or(false)
                } else {
                    trailing_ref.safe_mul(U256::from(BPS - bps)).and_then(|v| v.safe_div(U256::from(BPS))).map(|bound| price <= bound).unwrap_or(false)
                };
                if !fires {
                    return (ExecutionOutcome::Kept, "!no-trailing-stop-execution");
                }
            }
            OrderKind::Limit => {
                let fires = if order.is_long { price <= order.detail.trigger_price } else { price >= order.detail.trigger_price };
                if !fires {
                    return (ExecutionOutcome::Kept, "!no-execution");
                }
            }
            OrderKind::Stop => {
                let fires = if order.is_long { price >= order.detail.trigger_price } else { price <= order.detail.trigger_price };
                if !fires {
                    return (ExecutionOutcome::Kept, "!no-execution");
                }
            }
            OrderKind::Market => {
                if !order.detail.trigger_price.is_zero() {
                    let worse = if order.is_long { price > order.detail.trigger_price } else { price < order.detail.trigger_price };
                    if worse {
                        return (ExecutionOutcome::Cancelled, "!protected");
                    }
                }
            }
        }

        if let Some(sibling_id) = order.detail.cancel_on_execute_id {
            if order_book.cancel_with_reason(sibling_id, "!oco", keeper, ledger, events).is_err() {
                events.push(Event::OrderSkipped { order_id: sibling_id, reason: "!oco-cancel-failed" });
            }
        }

        let existing = position_manager.position(PositionKey { user: order.user, asset: order.asset, market: order.market }).copied();
        let result = match existing {
            Some(pos) if pos.is_open() && pos.is_long != order.is_long => position_manager.decrease_position(
                order.id,
                market,
                price,
                matches!(order.detail.kind, OrderKind::TrailingStop),
                keeper,
                now,
                risk,
                funding,
                pool,
                order_book,
                governance,
                asset_cfg,
                ledger,
                events,
            ),
            Some(_) | None if !order.detail.reduce_only => {
                position_manager.increase_position(order.id, market, price, keeper, now, risk, funding, pool, order_book, governance, ledger, events)
            }
            _ => Err(EngineError::NotExecutable),
        };

        match result {
            Ok(()) => (ExecutionOutcome::Executed, ""),
            Err(EngineError::MinHoldTime) => (ExecutionOutcome::Kept, "!min-hold-time"),
            Err(EngineError::InsufficientPoolLiquidity) => (ExecutionOutcome::Kept, "!insufficient-pool-liquidity"),
            Err(EngineError::OICapExceeded) => (ExecutionOutcome::Cancelled, "!oi-cap"),
            Err(EngineError::MinRemainingSize) => (ExecutionOutcome::Cancelled, "!min-remaining-size"),
            Err(EngineError::NotExecutable) => (ExecutionOutcome::Cancelled, "!reduce"),
            Err(_) => (ExecutionOutcome::Kept, "!error"),
        }
    }

    /// `liquidate_positions(users, assets, markets, oracle_payload)` (spec
    /// §4.5). Per-row failures become `LiquidationError` events; the batch
    /// never aborts.
    #[allow(clippy::too_many_arguments)]
    pub fn liquidate_positions(
        &self,
        rows: &[(UserId, AssetId, MarketId)],
        keeper: UserId,
        now: i64,
        markets: &HashMap<MarketId, Market>,
        governance: &GovernanceConfig,
        position_manager: &mut PositionManager,
        pool: &mut LiquidityPool,
        funding: &mut FundingTracker,
        price_feed: &dyn PriceFeed,
        reference_price_feed: &dyn ReferencePriceFeed,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        governance.require_keeper(&keeper)?;
        governance.require_not_paused_for_processing()?;

        for &(user, asset, market_id) in rows {
            let reason = self.liquidate_one(user, asset, market_id, keeper, now, markets, governance, position_manager, pool, funding, price_feed, reference_price_feed, ledger, events);
            if let Err(reason) = reason {
                events.push(Event::LiquidationError { user, asset, market: market_id, reason });
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn liquidate_one(
        &self,
        user: UserId,
        asset: AssetId,
        market_id: MarketId,
        keeper: UserId,
        now: i64,
        markets: &HashMap<MarketId, Market>,
        governance: &GovernanceConfig,
        position_manager: &mut PositionManager,
        pool: &mut LiquidityPool,
        funding: &mut FundingTracker,
        price_feed: &dyn PriceFeed,
        reference_price_feed: &dyn ReferencePriceFeed,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> Result<(), &'static str> {
        let market = *markets.get(&market_id).ok_or("!no-market")?;
        let position = position_manager.position(PositionKey { user, asset, market: market_id }).copied().ok_or("!position")?;

        let maximise = !position.is_long;
        let (price, publish_time) = self.get_oracle_price(&market, maximise, price_feed).map_err(|_| "!no-price")?;
        if now - publish_time > market.oracle_max_age_s {
            return Err("!stale");
        }
        if price.is_zero() {
            return Err("!no-price");
        }
        let reference = reference_price_feed.get(market_id).unwrap_or(U256::zero());
        if !Self::within_reference_bound(price, reference, market.max_deviation_bps).unwrap_or(false) {
            return Err("!reference-price-deviation");
        }

        position_manager
            .liquidate(user, asset, &market, price, governance.liquidation_fee_bps, keeper, now, funding, pool, governance, ledger, events)
            .map_err(|e| match e {
                EngineError::NotExecutable => "!not-liquidatable",
                EngineError::NotFound => "!position",
                _ => "!error",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::OraclePriceData;
    use crate::state::MarketCategory;

    struct FakePriceFeed {
        price: i64,
        confidence: u64,
        expo: i32,
        publish_time: i64,
    }
    impl PriceFeed for FakePriceFeed {
        fn get_unsafe(&self, _market: MarketId) -> EngineResult<OraclePriceData> {
            Ok(OraclePriceData { price: self.price, confidence: self.confidence, expo: self.expo, publish_time: self.publish_time })
        }
        fn update(&mut self, _payload: &[u8]) -> EngineResult<U256> {
            Ok(U256::zero())
        }
    }

    fn market() -> Market {
        Market {
            id: MarketId::from_str_padded("ETH-USD"),
            category: MarketCategory::Crypto,
            reference_feed_id: 0,
            oracle_feed_id: 0,
            max_leverage: 50,
            max_deviation_bps: 500,
            fee_bps: 10,
            liq_threshold_bps: 8_000,
            funding_factor_bps: 1_000,
            min_order_age_s: 0,
            oracle_max_age_s: 60,
            is_reduce_only: false,
            price_conf_threshold_bps: 0,
            price_conf_multiplier_bps: 0,
        }
    }

    #[test]
    fn get_oracle_price_normalizes_negative_expo() {
        let engine = ExecutionEngine;
        let feed = FakePriceFeed { price: 2_000_00000000, confidence: 0, expo: -8, publish_time: 10 };
        let (price, publish_time) = engine.get_oracle_price(&market(), true, &feed).unwrap();
        assert_eq!(price, U256::from(2_000u64).safe_mul(pow10(18).unwrap()).unwrap());
        assert_eq!(publish_time, 10);
    }

    #[test]
    fn get_oracle_price_rejects_negative_price() {
        let engine = ExecutionEngine;
        let feed = FakePriceFeed { price: -1, confidence: 0, expo: -8, publish_time: 10 };
        let (price, _) = engine.get_oracle_price(&market(), true, &feed).unwrap();
        assert!(price.is_zero());
    }

    #[test]
    fn reference_bound_zero_reference_always_passes() {
        assert!(ExecutionEngine::within_reference_bound(U256::from(100u64), U256::zero(), 500).unwrap());
    }

    #[test]
    fn reference_bound_rejects_outside_deviation() {
        let reference = U256::from(2_000u64);
        assert!(!ExecutionEngine::within_reference_bound(U256::from(2_200u64), reference, 500).unwrap());
        assert!(ExecutionEngine::within_reference_bound(U256::from(2_090u64), reference, 500).unwrap());
    }

    #[test]
    fn trailing_stop_gating_matches_scenario_six() {
        let trailing_ref = U256::from(2_000u64);
        let bps = 300u32;
        let at_threshold = U256::from(1_940u64);
        let bound = trailing_ref.safe_mul(U256::from(BPS - bps)).unwrap().safe_div(U256::from(BPS)).unwrap();
        assert_eq!(bound, at_threshold);
        assert!(at_threshold <= bound);
        let one_tick_beyond = U256::from(1_941u64);
        assert!(!(one_tick_beyond <= bound));
    }
}
