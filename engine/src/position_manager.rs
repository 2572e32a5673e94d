//! C6 — PositionManager (spec §4.3, §4.6 — "largest component, ~25% of the
//! budget"). Positions keyed by `(user, asset, market)`, open-interest
//! bookkeeping, average-price arithmetic, P&L and fee distribution, margin
//! add/remove.
//!
//! Grounded on the teacher's `state/user_position.rs` for the position
//! record shape and `math/balance.rs`'s scaled-balance add/subtract idiom,
//! generalized to carry `avg_price` and a funding-tracker snapshot instead
//! of an interest-bearing scaled balance — this spec's position has no
//! counterpart to the teacher's borrow/deposit duality.

use std::collections::HashMap;

use crate::capabilities::Ledger;
use crate::config::GovernanceConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::Event;
use crate::funding_tracker::FundingTracker;
use crate::id_set::IdSet;
use crate::liquidity_pool::LiquidityPool;
use crate::math::constants::{BPS, UNIT};
use crate::math::{CastU256, I256, SafeMath, U256};
use crate::order_book::OrderBook;
use crate::risk_validator::RiskValidator;
use crate::state::{Asset, AssetId, Market, MarketId, OpenInterest, Order, OrderDetail, OrderKind, Position, PositionKey, UserId};

#[derive(Clone, Debug, Default)]
pub struct PositionManager {
    positions: HashMap<PositionKey, Position>,
    position_order: IdSet<PositionKey>,
    last_increased: HashMap<(UserId, MarketId), i64>,
    oi_by_pair: HashMap<(AssetId, MarketId), OpenInterest>,
    oi_by_asset: HashMap<AssetId, OpenInterest>,
}

impl PositionManager {
    pub fn position(&self, key: PositionKey) -> Option<&Position> {
        self.positions.get(&key)
    }

    pub fn positions_of(&self, user: UserId) -> impl Iterator<Item = &Position> + '_ {
        self.position_order.iter().filter(move |k| k.user == user).filter_map(move |k| self.positions.get(&k))
    }

    pub fn open_interest(&self, asset: AssetId, market: MarketId) -> OpenInterest {
        self.oi_by_pair.get(&(asset, market)).copied().unwrap_or_default()
    }

    pub fn asset_open_interest_total(&self, asset: AssetId) -> u128 {
        self.oi_by_asset.get(&asset).map(|oi| oi.total()).unwrap_or(0)
    }

    fn oi_pair(&self, asset: AssetId, market: MarketId) -> (u128, u128) {
        let oi = self.open_interest(asset, market);
        (oi.long, oi.short)
    }

    fn increment_oi(&mut self, asset: AssetId, market: MarketId, is_long: bool, amount: u128, events: &mut Vec<Event>) -> EngineResult {
        let pair = self.oi_by_pair.entry((asset, market)).or_default();
        let asset_total = self.oi_by_asset.entry(asset).or_default();
        if is_long {
            pair.long = pair.long.checked_add(amount).ok_or(EngineError::MathError)?;
            asset_total.long = asset_total.long.checked_add(amount).ok_or(EngineError::MathError)?;
        } else {
            pair.short = pair.short.checked_add(amount).ok_or(EngineError::MathError)?;
            asset_total.short = asset_total.short.checked_add(amount).ok_or(EngineError::MathError)?;
        }
        events.push(Event::IncrementOI { asset, market, is_long, amount: U256::from(amount) });
        Ok(())
    }

    fn decrement_oi(&mut self, asset: AssetId, market: MarketId, is_long: bool, amount: u128, events: &mut Vec<Event>) -> EngineResult {
        let pair = self.oi_by_pair.entry((asset, market)).or_default();
        let asset_total = self.oi_by_asset.entry(asset).or_default();
        if is_long {
            pair.long = pair.long.checked_sub(amount).ok_or(EngineError::MathError)?;
            asset_total.long = asset_total.long.checked_sub(amount).ok_or(EngineError::MathError)?;
        } else {
            pair.short = pair.short.checked_sub(amount).ok_or(EngineError::MathError)?;
            asset_total.short = asset_total.short.checked_sub(amount).ok_or(EngineError::MathError)?;
        }
        events.push(Event::DecrementOI { asset, market, is_long, amount: U256::from(amount) });
        Ok(())
    }

    /// `get_pnl` (spec §4.6). Pure with respect to `self` — P&L depends only
    /// on the funding tracker's projected index and the supplied position
    /// snapshot, never on stored position state directly.
    #[allow(clippy::too_many_arguments)]
    pub fn get_pnl(
        is_long: bool,
        price: U256,
        avg_price: U256,
        size: U256,
        snapshot: I256,
        funding: &FundingTracker,
        asset: AssetId,
        market: MarketId,
        funding_factor_bps: u32,
        oi_long: u128,
        oi_short: u128,
        now: i64,
    ) -> EngineResult<(I256, I256)> {
        if price.is_zero() || avg_price.is_zero() || size.is_zero() {
            return Ok((I256::ZERO, I256::ZERO));
        }

        let diff = if is_long {
            if price >= avg_price {
                I256::from_u256(price.safe_sub(avg_price)?)
            } else {
                I256::neg_from_u256(avg_price.safe_sub(price)?)
            }
        } else if avg_price >= price {
            I256::from_u256(avg_price.safe_sub(price)?)
        } else {
            I256::neg_from_u256(price.safe_sub(avg_price)?)
        };
        let pnl_magnitude = size.safe_mul(diff.magnitude())?.safe_div(avg_price)?;
        let mut pnl = if diff.is_negative() { I256::neg_from_u256(pnl_magnitude) } else { I256::from_u256(pnl_magnitude) };

        let next_tracker = funding.projected(asset, market, now, funding_factor_bps, oi_long, oi_short);
        let tracker_delta = next_tracker.checked_sub(snapshot).ok_or(EngineError::MathError)?;
        let denom = U256::from(BPS).safe_mul(U256::from(UNIT))?;
        let funding_fee_magnitude = size.safe_mul(tracker_delta.magnitude())?.safe_div(denom)?;
        let funding_fee =
            if tracker_delta.is_negative() { I256::neg_from_u256(funding_fee_magnitude) } else { I256::from_u256(funding_fee_magnitude) };

        pnl = if is_long {
            pnl.checked_sub(funding_fee).ok_or(EngineError::MathError)?
        } else {
            pnl.checked_add(funding_fee).ok_or(EngineError::MathError)?
        };

        Ok((pnl, funding_fee))
    }

    /// Core of `increase_position` (spec §4.3), shared with the
    /// direction-flip remainder synthesized by `decrease_position` — the
    /// latter constructs an `Order` value that was never stored in
    /// `OrderBook`, so this half skips order removal; the public
    /// `increase_position` wraps it with that removal.
    #[allow(clippy::too_many_arguments)]
    fn apply_increase(
        &mut self,
        order: &Order,
        market: &Market,
        exec_price: U256,
        keeper: UserId,
        now: i64,
        risk: &mut RiskValidator,
        funding: &mut FundingTracker,
        pool: &mut LiquidityPool,
        governance: &GovernanceConfig,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        let (oi_long, oi_short) = self.oi_pair(order.asset, order.market);
        let current_total = oi_long.saturating_add(oi_short);
        let size_u128: u128 = order.size.try_to_u128()?;
        risk.check_max_oi(order.asset, order.market, size_u128, current_total)?;

        funding.update(order.asset, order.market, now, market.funding_factor_bps, oi_long, oi_short)?;
        events.push(Event::FundingUpdated {
            asset: order.asset,
            market: order.market,
            cumulative_index: funding.current(order.asset, order.market),
        });

        self.increment_oi(order.asset, order.market, order.is_long, size_u128, events)?;

        let key = PositionKey { user: order.user, asset: order.asset, market: order.market };
        let mut position = self.positions.get(&key).copied().unwrap_or(Position {
            user: order.user,
            asset: order.asset,
            market: order.market,
            is_long: order.is_long,
            size: U256::zero(),
            margin: U256::zero(),
            avg_price: U256::zero(),
            timestamp: now,
            funding_tracker_snapshot: funding.current(order.asset, order.market),
        });

        if !position.is_open() {
            position.funding_tracker_snapshot = funding.current(order.asset, order.market);
            position.timestamp = now;
            position.is_long = order.is_long;
        }

        let new_avg_price = if position.size.is_zero() {
            exec_price
        } else {
            position
                .size
                .safe_mul(position.avg_price)?
                .safe_add(order.size.safe_mul(exec_price)?)?
                .safe_div(position.size.safe_add(order.size)?)?
        };
        position.avg_price = new_avg_price;
        position.size = position.size.safe_add(order.size)?;
        position.margin = position.margin.safe_add(order.margin)?;
        self.positions.insert(key, position);
        self.position_order.insert(key);

        events.push(Event::PositionIncreased {
            user: order.user,
            asset: order.asset,
            market: order.market,
            size: order.size,
            avg_price: new_avg_price,
        });

        credit_fee(order.id, order.asset, keeper, order.fee, order.detail.execution_fee, pool, governance, ledger, events)?;

        self.last_increased.insert((order.user, order.market), now);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn increase_position(
        &mut self,
        order_id: u32,
        market: &Market,
        exec_price: U256,
        keeper: UserId,
        now: i64,
        risk: &mut RiskValidator,
        funding: &mut FundingTracker,
        pool: &mut LiquidityPool,
        order_book: &mut OrderBook,
        governance: &GovernanceConfig,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        let order = order_book.order(order_id).ok_or(EngineError::NotFound)?.clone();
        self.apply_increase(&order, market, exec_price, keeper, now, risk, funding, pool, governance, ledger, events)?;
        order_book.remove_order(order_id);
        Ok(())
    }

    /// `decrease_position` (spec §4.3). The most involved single method in
    /// the engine: partial/full close, fee split by reduce-only vs. not,
    /// clamped loss-to-margin, and the bounded direction-flip reopen.
    #[allow(clippy::too_many_arguments)]
    pub fn decrease_position(
        &mut self,
        order_id: u32,
        market: &Market,
        exec_price: U256,
        is_trailing_stop: bool,
        keeper: UserId,
        now: i64,
        risk: &mut RiskValidator,
        funding: &mut FundingTracker,
        pool: &mut LiquidityPool,
        order_book: &mut OrderBook,
        governance: &GovernanceConfig,
        asset_cfg: &Asset,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        let order = order_book.order(order_id).ok_or(EngineError::NotFound)?.clone();
        let key = PositionKey { user: order.user, asset: order.asset, market: order.market };
        let mut position = self.positions.get(&key).copied().ok_or(EngineError::NotFound)?;

        let last = self.last_increased.get(&(order.user, order.market)).copied().unwrap_or(0);
        if now - last <= governance.min_position_hold_time_s {
            return Err(EngineError::MinHoldTime);
        }

        let executed = position.size.min(order.size);
        let remaining_order_size = order.size.safe_sub(executed)?;

        let (remaining_order_margin, mut amount_to_return, remaining_order_fee) = if !order.detail.reduce_only && !order.size.is_zero() {
            let remaining_margin = order.margin.safe_mul(remaining_order_size)?.safe_div(order.size)?;
            let returned = order.margin.safe_mul(executed)?.safe_div(order.size)?;
            let remaining_fee = order.fee.safe_mul(remaining_order_size)?.safe_div(order.size)?;
            (remaining_margin, returned, remaining_fee)
        } else {
            (U256::zero(), U256::zero(), U256::zero())
        };

        let pos_remaining = position.size.safe_sub(executed)?;
        if !pos_remaining.is_zero() && pos_remaining < asset_cfg.min_size {
            return Err(EngineError::MinRemainingSize);
        }

        let trailing_component =
            if is_trailing_stop { executed.safe_mul(U256::from(governance.trailing_stop_fee_bps))?.safe_div(U256::from(BPS))? } else { U256::zero() };
        let fee = if order.size.is_zero() {
            U256::zero()
        } else {
            order.fee.safe_add(trailing_component)?.safe_mul(executed)?.safe_div(order.size)?
        };

        let (oi_long, oi_short) = self.oi_pair(order.asset, order.market);
        funding.update(order.asset, order.market, now, market.funding_factor_bps, oi_long, oi_short)?;
        events.push(Event::FundingUpdated {
            asset: order.asset,
            market: order.market,
            cumulative_index: funding.current(order.asset, order.market),
        });

        let (oi_long, oi_short) = self.oi_pair(order.asset, order.market);
        let (mut pnl, _funding_fee) = Self::get_pnl(
            position.is_long,
            exec_price,
            position.avg_price,
            executed,
            position.funding_tracker_snapshot,
            funding,
            order.asset,
            order.market,
            market.funding_factor_bps,
            oi_long,
            oi_short,
            now,
        )?;

        let mut executed_margin = if position.size.is_zero() { U256::zero() } else { position.margin.safe_mul(executed)?.safe_div(position.size)? };
        let mut final_executed = executed;
        if pnl <= I256::neg_from_u256(executed_margin) {
            pnl = I256::neg_from_u256(executed_margin);
            executed_margin = position.margin;
            final_executed = position.size;
            position.size = U256::zero();
            position.margin = U256::zero();
        } else {
            position.margin = position.margin.safe_sub(executed_margin)?;
            position.size = position.size.safe_sub(executed)?;
            position.funding_tracker_snapshot = funding.current(order.asset, order.market);
        }

        let final_executed_u128: u128 = final_executed.try_to_u128()?;
        self.decrement_oi(order.asset, order.market, position.is_long, final_executed_u128, events)?;

        let pool_balance = pool.pool_state(order.asset).balance;
        risk.check_pool_drawdown(order.asset, pnl, pool_balance, governance.pool_hourly_decay_bps, now)?;

        if pnl.is_negative() {
            pool.credit_trader_loss(order.asset, pnl.magnitude(), now, governance.buffer_payout_period_s, events)?;
            let total_loss = pnl.magnitude().safe_add(fee)?;
            if total_loss < executed_margin {
                amount_to_return = amount_to_return.safe_add(executed_margin.safe_sub(total_loss)?)?;
            }
        } else {
            pool.debit_trader_profit(order.asset, pnl.magnitude(), now, governance.buffer_payout_period_s, ledger, order.user, events)?;
            amount_to_return = amount_to_return.safe_add(executed_margin.safe_sub(fee).unwrap_or(U256::zero()))?;
        }

        if position.size.is_zero() {
            self.positions.remove(&key);
            self.position_order.remove(key);
        } else {
            self.positions.insert(key, position);
        }

        order_book.remove_order(order_id);
        if !amount_to_return.is_zero() {
            ledger.transfer_out(order.asset, order.user, amount_to_return)?;
        }
        credit_fee(order.id, order.asset, keeper, fee, order.detail.execution_fee, pool, governance, ledger, events)?;

        events.push(Event::PositionDecreased { user: order.user, asset: order.asset, market: order.market, executed: final_executed, pnl });

        if !remaining_order_size.is_zero() && !order.detail.reduce_only {
            let synthetic = Order {
                id: order.id,
                user: order.user,
                asset: order.asset,
                market: order.market,
                is_long: !order.is_long,
                margin: remaining_order_margin,
                size: remaining_order_size,
                fee: remaining_order_fee,
                timestamp: now,
                detail: OrderDetail {
                    kind: OrderKind::Market,
                    reduce_only: false,
                    trigger_price: U256::zero(),
                    expiry: 0,
                    cancel_on_execute_id: None,
                    execution_fee: U256::zero(),
                    trailing_stop_bps: 0,
                },
            };
            self.apply_increase(&synthetic, market, exec_price, keeper, now, risk, funding, pool, governance, ledger, events)?;
        }

        Ok(())
    }

    pub fn add_margin(
        &mut self,
        user: UserId,
        asset: AssetId,
        market: MarketId,
        added_margin: U256,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        let key = PositionKey { user, asset, market };
        let mut position = self.positions.get(&key).copied().ok_or(EngineError::NotFound)?;
        ledger.transfer_in(asset, user, added_margin)?;
        let new_margin = position.margin.safe_add(added_margin)?;
        let leverage_unit = position.size.safe_mul(U256::from(UNIT))?.safe_div(new_margin)?;
        if leverage_unit < U256::from(UNIT) {
            return Err(EngineError::InsufficientMargin);
        }
        position.margin = new_margin;
        self.positions.insert(key, position);
        events.push(Event::MarginIncreased { user, asset, market, amount: added_margin });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn remove_margin(
        &mut self,
        user: UserId,
        asset: AssetId,
        market: MarketId,
        removed_margin: U256,
        max_leverage: u32,
        remove_margin_buffer_bps: u32,
        funding_factor_bps: u32,
        reference_price: U256,
        funding: &FundingTracker,
        now: i64,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        let key = PositionKey { user, asset, market };
        let mut position = self.positions.get(&key).copied().ok_or(EngineError::NotFound)?;
        if position.margin <= removed_margin {
            return Err(EngineError::InsufficientMargin);
        }
        let remaining_margin = position.margin.safe_sub(removed_margin)?;
        let leverage_unit = position.size.safe_mul(U256::from(UNIT))?.safe_div(remaining_margin)?;
        if leverage_unit > U256::from(max_leverage).safe_mul(U256::from(UNIT))? {
            return Err(EngineError::InsufficientMargin);
        }
        if reference_price.is_zero() {
            return Err(EngineError::PriceUnavailable);
        }

        let (oi_long, oi_short) = self.oi_pair(asset, market);
        let (upl, _funding_fee) = Self::get_pnl(
            position.is_long,
            reference_price,
            position.avg_price,
            position.size,
            position.funding_tracker_snapshot,
            funding,
            asset,
            market,
            funding_factor_bps,
            oi_long,
            oi_short,
            now,
        )?;
        if upl.is_negative() {
            let allowed = remaining_margin.safe_mul(U256::from(BPS - remove_margin_buffer_bps))?.safe_div(U256::from(BPS))?;
            if upl.magnitude() >= allowed {
                return Err(EngineError::InsufficientMargin);
            }
        }

        position.margin = remaining_margin;
        self.positions.insert(key, position);
        ledger.transfer_out(asset, user, removed_margin)?;
        events.push(Event::MarginDecreased { user, asset, market, amount: removed_margin });
        Ok(())
    }
    /// `liquidate_positions` row body (spec §4.5), past the oracle-price and
    /// reference-bound checks `ExecutionEngine` performs before calling in.
    /// Returns the realized pnl on success; `NotExecutable` if the position
    /// is not past the liquidation threshold.
    #[allow(clippy::too_many_arguments)]
    pub fn liquidate(
        &mut self,
        user: UserId,
        asset: AssetId,
        market: &Market,
        price: U256,
        liquidation_fee_bps: u32,
        keeper: UserId,
        now: i64,
        funding: &mut FundingTracker,
        pool: &mut LiquidityPool,
        governance: &GovernanceConfig,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult<I256> {
        let key = PositionKey { user, asset, market: market.id };
        let position = self.positions.get(&key).copied().ok_or(EngineError::NotFound)?;

        let (oi_long, oi_short) = self.oi_pair(asset, market.id);
        funding.update(asset, market.id, now, market.funding_factor_bps, oi_long, oi_short)?;
        events.push(Event::FundingUpdated { asset, market: market.id, cumulative_index: funding.current(asset, market.id) });

        let (oi_long, oi_short) = self.oi_pair(asset, market.id);
        let (pnl, _funding_fee) = Self::get_pnl(
            position.is_long,
            price,
            position.avg_price,
            position.size,
            position.funding_tracker_snapshot,
            funding,
            asset,
            market.id,
            market.funding_factor_bps,
            oi_long,
            oi_short,
            now,
        )?;

        let threshold = position.margin.safe_mul(U256::from(market.liq_threshold_bps))?.safe_div(U256::from(BPS))?;
        if !(pnl.is_negative() && pnl.magnitude() >= threshold) {
            return Err(EngineError::NotExecutable);
        }

        let fee_bps = market.fee_bps.saturating_add(liquidation_fee_bps);
        let fee = position.size.safe_mul(U256::from(fee_bps))?.safe_div(U256::from(BPS))?;
        let payout_to_pool = position.margin.safe_sub(fee)?;
        pool.credit_trader_loss(asset, payout_to_pool, now, governance.buffer_payout_period_s, events)?;
        credit_fee(0, asset, keeper, fee, U256::zero(), pool, governance, ledger, events)?;

        let size_u128: u128 = position.size.try_to_u128()?;
        self.decrement_oi(asset, market.id, position.is_long, size_u128, events)?;
        self.positions.remove(&key);
        self.position_order.remove(key);

        events.push(Event::PositionLiquidated { user, asset, market: market.id, pnl });
        Ok(pnl)
    }
}

/// `credit_fee` (spec §4.6). Free function rather than a `PositionManager`
/// method: it only touches the pool's balance/fee-reserve and the ledger,
/// never `PositionManager`'s own state.
#[allow(clippy::too_many_arguments)]
pub fn credit_fee(
    order_id: u32,
    asset: AssetId,
    keeper: UserId,
    fee: U256,
    execution_fee: U256,
    pool: &mut LiquidityPool,
    governance: &GovernanceConfig,
    ledger: &mut dyn Ledger,
    events: &mut Vec<Event>,
) -> EngineResult {
    if fee.is_zero() && execution_fee.is_zero() {
        return Ok(());
    }
    let fee_scaled = fee.safe_mul(U256::from(UNIT))?;
    let keeper_fee = fee_scaled.safe_mul(U256::from(governance.keeper_fee_share_bps))?.safe_div(U256::from(BPS))?;
    let net = fee_scaled.safe_sub(keeper_fee)?;
    let fee_to_pool = net.safe_mul(U256::from(governance.pool_fee_share_bps))?.safe_div(U256::from(BPS))?;
    let fee_to_treasury = net.safe_sub(fee_to_pool)?;

    let pool_share = fee_to_pool.safe_div(U256::from(UNIT))?;
    let treasury_share = fee_to_treasury.safe_div(U256::from(UNIT))?;
    let keeper_share = keeper_fee.safe_div(U256::from(UNIT))?;

    pool.credit_balance(asset, pool_share)?;
    pool.credit_fee_reserve(asset, treasury_share)?;
    if !keeper_share.is_zero() {
        ledger.transfer_out(asset, keeper, keeper_share)?;
    }
    if !execution_fee.is_zero() {
        ledger.transfer_out(AssetId::NATIVE, keeper, execution_fee)?;
    }

    events.push(Event::FeePaid { order_id, pool_share, treasury_share, keeper_share });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_price_law_after_two_increases() {
        let s1 = U256::from(100_000u64);
        let p1 = U256::from(2_000u64);
        let s2 = U256::from(50_000u64);
        let p2 = U256::from(2_100u64);
        let avg = s1.safe_mul(p1).unwrap().safe_add(s2.safe_mul(p2).unwrap()).unwrap().safe_div(s1.safe_add(s2).unwrap()).unwrap();
        assert_eq!(avg, U256::from(2_033u64));
    }

    #[test]
    fn get_pnl_long_profit_matches_scenario_one() {
        let funding = FundingTracker::default();
        let (pnl, fee) = PositionManager::get_pnl(
            true,
            U256::from(2_040u64),
            U256::from(2_000u64),
            U256::from(100_000u64),
            I256::ZERO,
            &funding,
            AssetId::NATIVE,
            MarketId::from_str_padded("ETH-USD"),
            0,
            0,
            0,
            1,
        )
        .unwrap();
        assert_eq!(pnl, I256::from(2_000i128));
        assert_eq!(fee, I256::ZERO);
    }

    #[test]
    fn get_pnl_zero_inputs_are_zero() {
        let funding = FundingTracker::default();
        let (pnl, fee) = PositionManager::get_pnl(
            true,
            U256::zero(),
            U256::from(2_000u64),
            U256::from(100_000u64),
            I256::ZERO,
            &funding,
            AssetId::NATIVE,
            MarketId::from_str_padded("ETH-USD"),
            0,
            0,
            0,
            1,
        )
        .unwrap();
        assert_eq!(pnl, I256::ZERO);
        assert_eq!(fee, I256::ZERO);
    }
}
