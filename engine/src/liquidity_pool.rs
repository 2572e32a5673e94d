//! C5 — LiquidityPool, "the hardest accounting surface" (spec §4.2).
//! Per-asset balance/buffer/LP-share bookkeeping, deposit/withdrawal tax,
//! and the two-epoch streaming buffer that drip-feeds trader losses into
//! the pool.
//!
//! Grounded on the teacher's scaled-balance pool fields in `state/market.rs`
//! (`revenue_pool`, `spot_fee_pool`, `pnl_pool`) for the balance/LP-share
//! shape, generalized with the buffer-streaming and tax machinery this
//! spec's pool needs that the teacher's spot-margin pools have no
//! counterpart for.

use std::collections::HashMap;

use crate::capabilities::Ledger;
use crate::error::{EngineError, EngineResult};
use crate::events::Event;
use crate::id_set::IdSet;
use crate::math::constants::BPS;
use crate::math::{I256, SafeMath, U256};
use crate::state::{AssetId, LiquidityOrder, LiquidityOrderKind, Pool, UserId};

fn engine_err_reason(_: EngineError) -> &'static str {
    "!error"
}

fn bps_saturating(v: U256) -> u32 {
    if v > U256::from(u32::MAX) {
        u32::MAX
    } else {
        v.0[0] as u32
    }
}

#[derive(Clone, Debug, Default)]
pub struct LiquidityPool {
    pools: HashMap<AssetId, Pool>,
    orders: HashMap<u32, LiquidityOrder>,
    order_ids: IdSet,
    user_order_ids: HashMap<UserId, IdSet>,
    next_order_id: u32,
}

impl LiquidityPool {
    pub fn pool_state(&self, asset: AssetId) -> Pool {
        self.pools.get(&asset).cloned().unwrap_or_default()
    }

    pub fn order(&self, id: u32) -> Option<&LiquidityOrder> {
        self.orders.get(&id)
    }

    pub fn orders_of(&self, user: UserId) -> impl Iterator<Item = u32> + '_ {
        self.user_order_ids.get(&user).into_iter().flat_map(|set| set.iter())
    }

    fn pool_mut(&mut self, asset: AssetId) -> &mut Pool {
        self.pools.entry(asset).or_insert_with(Pool::default)
    }

    /// Credits the pool's share of a fee (spec §4.6 `credit_fee`), used by
    /// `PositionManager` rather than anything in this module's own command
    /// surface.
    pub fn credit_balance(&mut self, asset: AssetId, amount: U256) -> EngineResult {
        let pool = self.pool_mut(asset);
        pool.balance = pool.balance.safe_add(amount)?;
        Ok(())
    }

    /// Credits the treasury's share of a fee to the per-asset fee reserve.
    pub fn credit_fee_reserve(&mut self, asset: AssetId, amount: U256) -> EngineResult {
        let pool = self.pool_mut(asset);
        pool.fee_reserve = pool.fee_reserve.safe_add(amount)?;
        Ok(())
    }

    fn remove_order(&mut self, id: u32) -> Option<LiquidityOrder> {
        let order = self.orders.remove(&id)?;
        self.order_ids.remove(id);
        if let Some(set) = self.user_order_ids.get_mut(&order.user) {
            set.remove(id);
        }
        Some(order)
    }

    /// Buffer streaming algorithm (spec §4.2). Always the first thing done
    /// to an asset's pool before any other buffer-affecting mutation
    /// (ordering guarantee (ii), spec §5).
    pub fn stream_buffer_to_pool(
        &mut self,
        asset: AssetId,
        now: i64,
        buffer_payout_period_s: i64,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        let period = buffer_payout_period_s.max(1);
        let e = (now.div_euclid(period)) * period;
        let pool = self.pool_mut(asset);
        let buffer = pool.buffer_balance;
        let mut remaining = pool.current_epoch_remaining_buffer;
        let mut t = pool.last_paid_ts;

        let amt = if t < e - period {
            remaining = U256::zero();
            buffer
        } else {
            let mut amt = U256::zero();
            if t < e {
                amt = amt.safe_add(remaining)?;
                remaining = buffer.safe_sub(remaining).unwrap_or(U256::zero());
                t = e;
            }
            if !remaining.is_zero() {
                let elapsed = (now - t).max(0) as u64;
                let span = (e + period - t).max(1) as u64;
                let slice = remaining.safe_mul(U256::from(elapsed))?.safe_div(U256::from(span))?;
                let slice = slice.min(remaining);
                amt = amt.safe_add(slice)?;
                remaining = remaining.safe_sub(slice)?;
            }
            if amt > buffer {
                remaining = U256::zero();
                buffer
            } else {
                amt
            }
        };

        pool.current_epoch_remaining_buffer = remaining;
        pool.last_paid_ts = now;
        pool.buffer_balance = buffer.safe_sub(amt)?;
        pool.balance = pool.balance.safe_add(amt)?;

        if !amt.is_zero() {
            events.push(Event::BufferToPool { asset, amount: amt });
        }
        Ok(())
    }

    /// Never fails (spec §4.2): a trader loss always lands in the buffer.
    pub fn credit_trader_loss(
        &mut self,
        asset: AssetId,
        amount: U256,
        now: i64,
        buffer_payout_period_s: i64,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        self.stream_buffer_to_pool(asset, now, buffer_payout_period_s, events)?;
        let pool = self.pool_mut(asset);
        pool.buffer_balance = pool.buffer_balance.safe_add(amount)?;
        events.push(Event::PoolPayIn { asset, amount });
        Ok(())
    }

    pub fn debit_trader_profit(
        &mut self,
        asset: AssetId,
        amount: U256,
        now: i64,
        buffer_payout_period_s: i64,
        ledger: &mut dyn Ledger,
        user: UserId,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        if amount.is_zero() {
            return Ok(());
        }
        let pool = self.pool_mut(asset);
        let buffer = pool.buffer_balance;
        let remaining = pool.current_epoch_remaining_buffer;
        let new_buffer = buffer.checked_sub(amount).unwrap_or(U256::zero());
        if buffer < remaining.safe_add(amount)? {
            pool.current_epoch_remaining_buffer = remaining.min(new_buffer);
        }
        pool.buffer_balance = new_buffer;

        if amount > buffer {
            let shortfall = amount.safe_sub(buffer)?;
            let pool = self.pool_mut(asset);
            if pool.balance < shortfall {
                return Err(EngineError::InsufficientPoolLiquidity);
            }
            pool.balance = pool.balance.safe_sub(shortfall)?;
        }

        self.stream_buffer_to_pool(asset, now, buffer_payout_period_s, events)?;
        ledger.transfer_out(asset, user, amount)?;
        events.push(Event::PoolPayOut { asset, amount });
        Ok(())
    }

    pub fn direct_pool_deposit(
        &mut self,
        user: UserId,
        asset: AssetId,
        amount: U256,
        now: i64,
        buffer_payout_period_s: i64,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        if amount.is_zero() {
            return Err(EngineError::InvalidInput);
        }
        ledger.transfer_in(asset, user, amount)?;
        self.stream_buffer_to_pool(asset, now, buffer_payout_period_s, events)?;
        let pool = self.pool_mut(asset);
        pool.buffer_balance = pool.buffer_balance.safe_add(amount)?;
        events.push(Event::DirectPoolDeposit { user, asset, amount });
        Ok(())
    }

    fn next_id(&mut self) -> EngineResult<u32> {
        let id = self.next_order_id;
        self.next_order_id = self.next_order_id.safe_add(1)?;
        Ok(id)
    }

    fn resolve_user(sender: UserId, requested: UserId, is_funding_account: bool) -> EngineResult<UserId> {
        if is_funding_account {
            if requested.is_zero() {
                return Err(EngineError::InvalidInput);
            }
            Ok(requested)
        } else {
            Ok(sender)
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn deposit_request(
        &mut self,
        sender: UserId,
        requested_user: UserId,
        is_funding_account: bool,
        asset: AssetId,
        amount: U256,
        min_amount_after_tax: U256,
        execution_fee: U256,
        now: i64,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<u32> {
        if amount.is_zero() {
            return Err(EngineError::InvalidInput);
        }
        let user = Self::resolve_user(sender, requested_user, is_funding_account)?;
        if asset.is_native() {
            ledger.transfer_in(asset, sender, amount.safe_add(execution_fee)?)?;
        } else {
            ledger.transfer_in(asset, sender, amount)?;
            if !execution_fee.is_zero() {
                ledger.transfer_in(AssetId::NATIVE, sender, execution_fee)?;
            }
        }
        let id = self.next_id()?;
        let order = LiquidityOrder {
            id,
            user,
            asset,
            kind: LiquidityOrderKind::Deposit,
            amount,
            min_amount_after_tax,
            timestamp: now,
            execution_fee,
        };
        self.orders.insert(id, order);
        self.order_ids.insert(id);
        self.user_order_ids.entry(user).or_default().insert(id);
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn withdraw_request(
        &mut self,
        sender: UserId,
        requested_user: UserId,
        is_funding_account: bool,
        asset: AssetId,
        amount: U256,
        min_amount_after_tax: U256,
        execution_fee: U256,
        now: i64,
        ledger: &mut dyn Ledger,
    ) -> EngineResult<u32> {
        let user = Self::resolve_user(sender, requested_user, is_funding_account)?;
        if !execution_fee.is_zero() {
            ledger.transfer_in(AssetId::NATIVE, sender, execution_fee)?;
        }
        let id = self.next_id()?;
        let order = LiquidityOrder {
            id,
            user,
            asset,
            kind: LiquidityOrderKind::Withdraw,
            amount,
            min_amount_after_tax,
            timestamp: now,
            execution_fee,
        };
        self.orders.insert(id, order);
        self.order_ids.insert(id);
        self.user_order_ids.entry(user).or_default().insert(id);
        Ok(id)
    }

    /// User-initiated cancellation: refunds go entirely to the order's
    /// owner (spec §4.2's cancellation note).
    pub fn cancel_liquidity_order(
        &mut self,
        id: u32,
        caller: UserId,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        let order = self.orders.get(&id).ok_or(EngineError::NotFound)?.clone();
        if order.user != caller {
            return Err(EngineError::Unauthorized);
        }
        self.refund_and_remove(order, caller, ledger, events, "!user-cancel")
    }

    /// Keeper-initiated cancellation from within `execute_orders` (the
    /// order's `amount` still refunds to the owner; the keeper recovers the
    /// execution fee it would otherwise have earned).
    fn cancel_with_reason(
        &mut self,
        id: u32,
        reason: &'static str,
        keeper: UserId,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        let order = self.orders.get(&id).ok_or(EngineError::NotFound)?.clone();
        self.refund_and_remove(order, keeper, ledger, events, reason)
    }

    fn refund_and_remove(
        &mut self,
        order: LiquidityOrder,
        fee_receiver: UserId,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
        reason: &'static str,
    ) -> EngineResult {
        self.remove_order(order.id);
        if order.kind == LiquidityOrderKind::Deposit {
            if order.asset.is_native() {
                ledger.transfer_out(order.asset, order.user, order.amount.safe_add(order.execution_fee)?)?;
            } else {
                ledger.transfer_out(order.asset, order.user, order.amount)?;
                if !order.execution_fee.is_zero() {
                    ledger.transfer_out(AssetId::NATIVE, fee_receiver, order.execution_fee)?;
                }
            }
        } else if !order.execution_fee.is_zero() {
            ledger.transfer_out(AssetId::NATIVE, fee_receiver, order.execution_fee)?;
        }
        events.push(Event::OrderCancelled { order_id: order.id, reason });
        Ok(())
    }

    fn deposit_tax_bps(&self, asset: AssetId, amount: U256) -> EngineResult<u32> {
        let pool = self.pool_state(asset);
        let buffer = I256::from_u256(pool.buffer_balance);
        if pool.global_upl >= buffer {
            return Ok(0);
        }
        let deficit = buffer.checked_sub(pool.global_upl).ok_or(EngineError::MathError)?;
        let denom = pool.balance.safe_add(amount)?;
        if denom.is_zero() {
            return Ok(0);
        }
        let bps = U256::from(BPS).safe_mul(deficit.magnitude())?.safe_div(denom)?;
        Ok(bps_saturating(bps))
    }

    fn withdrawal_tax_bps(&self, asset: AssetId, amount: U256) -> EngineResult<u32> {
        let pool = self.pool_state(asset);
        let buffer = I256::from_u256(pool.buffer_balance);
        if pool.global_upl <= buffer {
            return Ok(0);
        }
        if amount >= pool.balance {
            return Ok(BPS);
        }
        let surplus = pool.global_upl.checked_sub(buffer).ok_or(EngineError::MathError)?;
        let denom = pool.balance.safe_sub(amount)?;
        if denom.is_zero() {
            return Ok(BPS);
        }
        let bps = U256::from(BPS).safe_mul(surplus.magnitude())?.safe_div(denom)?;
        Ok(bps_saturating(bps))
    }

    /// `_execute(order_id, keeper)` (spec §4.2). `Ok(())` means executed;
    /// `Err(reason)` means the caller should cancel the order with that
    /// reason — liquidity orders have no "keep in place" outcome, unlike
    /// trading orders.
    #[allow(clippy::too_many_arguments)]
    fn execute_one(
        &mut self,
        order_id: u32,
        now: i64,
        max_liquidity_order_ttl_s: i64,
        utilization_multiplier_bps: u32,
        asset_total_oi: u128,
        keeper: UserId,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> Result<(), &'static str> {
        let order = self.orders.get(&order_id).cloned().ok_or("!order")?;
        if order.amount.is_zero() {
            return Err("!order");
        }
        if now > order.timestamp + max_liquidity_order_ttl_s {
            return Err("!expired");
        }

        match order.kind {
            LiquidityOrderKind::Deposit => {
                let tax_bps = self.deposit_tax_bps(order.asset, order.amount).map_err(engine_err_reason)?;
                if tax_bps >= BPS {
                    return Err("!tax");
                }
                let amount_after_tax = order
                    .amount
                    .safe_mul(U256::from(BPS - tax_bps))
                    .and_then(|v| v.safe_div(U256::from(BPS)))
                    .map_err(engine_err_reason)?;
                if amount_after_tax < order.min_amount_after_tax {
                    return Err("!min-amount");
                }
                let pool = self.pool_mut(order.asset);
                let lp_minted = if pool.balance.is_zero() || pool.lp_supply.is_zero() {
                    amount_after_tax
                } else {
                    amount_after_tax
                        .safe_mul(pool.lp_supply)
                        .and_then(|v| v.safe_div(pool.balance))
                        .map_err(engine_err_reason)?
                };
                let new_user_lp = pool.user_lp_balance(&order.user).safe_add(lp_minted).map_err(engine_err_reason)?;
                pool.user_lp.insert(order.user, new_user_lp);
                pool.lp_supply = pool.lp_supply.safe_add(lp_minted).map_err(engine_err_reason)?;
                pool.balance = pool.balance.safe_add(order.amount).map_err(engine_err_reason)?;
                events.push(Event::PoolDeposit {
                    order_id,
                    user: order.user,
                    asset: order.asset,
                    amount: order.amount,
                    lp_minted,
                });
            }
            LiquidityOrderKind::Withdraw => {
                let snapshot = self.pool_state(order.asset);
                let user_lp = snapshot.user_lp_balance(&order.user);
                let user_balance = if snapshot.lp_supply.is_zero() {
                    U256::zero()
                } else {
                    user_lp.safe_mul(snapshot.balance).and_then(|v| v.safe_div(snapshot.lp_supply)).map_err(engine_err_reason)?
                };
                let amount = order.amount.min(user_balance);
                if amount.is_zero() {
                    return Err("!zero-amount");
                }
                let util_mult = utilization_multiplier_bps.max(BPS);
                let lhs = snapshot
                    .balance
                    .safe_sub(amount)
                    .and_then(|v| v.safe_mul(U256::from(util_mult)))
                    .and_then(|v| v.safe_div(U256::from(BPS)))
                    .map_err(engine_err_reason)?;
                if lhs < U256::from(asset_total_oi) {
                    return Err("!not-available-liquidity");
                }
                let tax_bps = self.withdrawal_tax_bps(order.asset, amount).map_err(engine_err_reason)?;
                if tax_bps >= BPS {
                    return Err("!tax");
                }
                let amount_after_tax = amount
                    .safe_mul(U256::from(BPS - tax_bps))
                    .and_then(|v| v.safe_div(U256::from(BPS)))
                    .map_err(engine_err_reason)?;
                if amount_after_tax < order.min_amount_after_tax {
                    return Err("!min-amount");
                }
                let lp_to_burn =
                    amount.safe_mul(snapshot.lp_supply).and_then(|v| v.safe_div(snapshot.balance)).map_err(engine_err_reason)?;
                let pool = self.pool_mut(order.asset);
                let new_user_lp = user_lp.safe_sub(lp_to_burn).map_err(engine_err_reason)?;
                pool.user_lp.insert(order.user, new_user_lp);
                pool.lp_supply = pool.lp_supply.safe_sub(lp_to_burn).map_err(engine_err_reason)?;
                pool.balance = pool.balance.safe_sub(amount_after_tax).map_err(engine_err_reason)?;
                ledger.transfer_out(order.asset, order.user, amount_after_tax).map_err(engine_err_reason)?;
                events.push(Event::PoolWithdrawal {
                    order_id,
                    user: order.user,
                    asset: order.asset,
                    amount: amount_after_tax,
                    lp_burned: lp_to_burn,
                });
            }
        }

        self.remove_order(order_id);
        if !order.execution_fee.is_zero() {
            ledger.transfer_out(AssetId::NATIVE, keeper, order.execution_fee).map_err(engine_err_reason)?;
        }
        Ok(())
    }

    /// `set_global_upls(assets, upls)` (spec §6) — a standalone keeper
    /// command distinct from the liquidity `execute_orders` batch, for
    /// keepers that refresh UPL without also attempting order execution.
    pub fn set_global_upls(
        &mut self,
        asset_upls: &[(AssetId, I256)],
        now: i64,
        buffer_payout_period_s: i64,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        for &(asset, upl) in asset_upls {
            self.pool_mut(asset).global_upl = upl;
            events.push(Event::GlobalUPLSet { asset, upl });
            self.stream_buffer_to_pool(asset, now, buffer_payout_period_s, events)?;
        }
        Ok(())
    }

    /// `execute_orders(ids, assets, upls)` for liquidity orders (spec
    /// §4.2). Writes `global_upl` and streams the buffer for every supplied
    /// asset first, then attempts each order id in turn; a failure
    /// cancels that order without aborting the batch.
    #[allow(clippy::too_many_arguments)]
    pub fn execute_orders(
        &mut self,
        ids: &[u32],
        asset_upls: &[(AssetId, I256)],
        asset_total_oi: &HashMap<AssetId, u128>,
        now: i64,
        buffer_payout_period_s: i64,
        max_liquidity_order_ttl_s: i64,
        utilization_multiplier_bps: u32,
        keeper: UserId,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult {
        self.set_global_upls(asset_upls, now, buffer_payout_period_s, events)?;

        for &id in ids {
            let asset = match self.orders.get(&id) {
                Some(o) => o.asset,
                None => {
                    events.push(Event::OrderCancelled { order_id: id, reason: "!order" });
                    continue;
                }
            };
            let oi = asset_total_oi.get(&asset).copied().unwrap_or(0);
            let outcome = self.execute_one(
                id,
                now,
                max_liquidity_order_ttl_s,
                utilization_multiplier_bps,
                oi,
                keeper,
                ledger,
                events,
            );
            if let Err(reason) = outcome {
                let _ = self.cancel_with_reason(id, reason, keeper, ledger, events);
            }
        }
        Ok(())
    }
}
