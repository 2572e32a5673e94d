//! C7 — OrderBook (spec §4.4). Order storage and lifecycle: submission
//! invariants, TP/SL/OCO wiring, expiry, and reduce-only rules.
//!
//! Grounded on the teacher's `state/order.rs` + `processor/place_order.rs`
//! pair (order validation separated from the indexed-storage side),
//! generalized from the teacher's CLOB matching engine to this spec's
//! oracle-triggered book: no resting-order matching, but the same
//! validate-then-index shape and the same per-user/per-market `IdSet`
//! indexing idiom as `LiquidityPool`.

use std::collections::HashMap;

use crate::capabilities::{Ledger, ReferralDirectory};
use crate::config::GovernanceConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::Event;
use crate::id_set::IdSet;
use crate::math::constants::{BPS, UNIT};
use crate::math::{CastU256, SafeMath, U256};
use crate::risk_validator::RiskValidator;
use crate::state::{Asset, AssetId, Market, MarketId, Order, OrderDetail, OrderKind, Position, UserId};

#[derive(Clone, Debug, Default)]
pub struct OrderBook {
    orders: HashMap<u32, Order>,
    order_ids: IdSet,
    user_order_ids: HashMap<UserId, IdSet>,
    market_order_ids: HashMap<(AssetId, MarketId), IdSet>,
    trigger_order_ids: HashMap<(AssetId, MarketId), IdSet>,
    next_order_id: u32,
}

impl OrderBook {
    pub fn order(&self, id: u32) -> Option<&Order> {
        self.orders.get(&id)
    }

    pub fn orders_of(&self, user: UserId) -> impl Iterator<Item = u32> + '_ {
        self.user_order_ids.get(&user).into_iter().flat_map(|set| set.iter())
    }

    pub fn market_orders(&self, asset: AssetId, market: MarketId) -> impl Iterator<Item = u32> + '_ {
        self.market_order_ids.get(&(asset, market)).into_iter().flat_map(|set| set.iter())
    }

    pub fn trigger_orders(&self, asset: AssetId, market: MarketId) -> impl Iterator<Item = u32> + '_ {
        self.trigger_order_ids.get(&(asset, market)).into_iter().flat_map(|set| set.iter())
    }

    fn next_id(&mut self) -> EngineResult<u32> {
        let id = self.next_order_id;
        self.next_order_id = self.next_order_id.safe_add(1)?;
        Ok(id)
    }

    fn index_insert(&mut self, order: &Order) {
        self.order_ids.insert(order.id);
        self.user_order_ids.entry(order.user).or_default().insert(order.id);
        if matches!(order.detail.kind, OrderKind::Market) {
            self.market_order_ids.entry((order.asset, order.market)).or_default().insert(order.id);
        } else {
            self.trigger_order_ids.entry((order.asset, order.market)).or_default().insert(order.id);
        }
    }

    fn index_remove(&mut self, order: &Order) {
        self.order_ids.remove(order.id);
        if let Some(set) = self.user_order_ids.get_mut(&order.user) {
            set.remove(order.id);
        }
        if matches!(order.detail.kind, OrderKind::Market) {
            if let Some(set) = self.market_order_ids.get_mut(&(order.asset, order.market)) {
                set.remove(order.id);
            }
        } else if let Some(set) = self.trigger_order_ids.get_mut(&(order.asset, order.market)) {
            set.remove(order.id);
        }
    }

    /// Removes an order unconditionally, for use by `PositionManager` once it
    /// has consumed the order (execution path, not cancellation — no refund
    /// or event here, those are the caller's responsibility).
    pub fn remove_order(&mut self, id: u32) -> Option<Order> {
        let order = self.orders.remove(&id)?;
        self.index_remove(&order);
        Some(order)
    }

    /// `_submit(order)` (spec §4.4) — core invariants, fee computation, and
    /// escrow. Shared by the main order and by each TP/SL/TS auxiliary order
    /// `submit` constructs.
    #[allow(clippy::too_many_arguments)]
    fn submit_one(
        &mut self,
        mut order: Order,
        now: i64,
        asset: &Asset,
        market: &Market,
        governance: &GovernanceConfig,
        risk: &mut RiskValidator,
        current_total_oi: u128,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult<u32> {
        match order.detail.kind {
            OrderKind::Limit | OrderKind::Stop => {
                if order.detail.trigger_price.is_zero() {
                    return Err(EngineError::InvalidInput);
                }
            }
            OrderKind::TrailingStop => {
                if order.detail.trailing_stop_bps == 0 || order.detail.trailing_stop_bps > crate::math::constants::MAX_TRAILING_STOP_BPS {
                    return Err(EngineError::InvalidInput);
                }
                order.detail.trigger_price = U256::zero();
            }
            OrderKind::Market => {}
        }

        if !order.detail.reduce_only {
            if order.size < asset.min_size || market.is_reduce_only {
                return Err(EngineError::InvalidInput);
            }
            if order.margin.is_zero() {
                return Err(EngineError::InvalidInput);
            }
            let leverage_unit = order.size.safe_mul(U256::from(UNIT))?.safe_div(order.margin)?;
            if leverage_unit < U256::from(UNIT) || leverage_unit > U256::from(market.max_leverage).safe_mul(U256::from(UNIT))? {
                return Err(EngineError::InvalidInput);
            }
        }

        if order.detail.expiry != 0 {
            let ttl_cap = if order.ttl_kind_is_market() { governance.max_market_order_ttl_s } else { governance.max_trigger_order_ttl_s };
            if order.detail.expiry < now || order.detail.expiry > now + ttl_cap {
                return Err(EngineError::InvalidInput);
            }
        }

        if let Some(sibling_id) = order.detail.cancel_on_execute_id {
            match self.orders.get(&sibling_id) {
                Some(sibling) if sibling.user == order.user => {}
                _ => return Err(EngineError::InvalidInput),
            }
        }

        order.timestamp = now;
        order.fee = order.size.safe_mul(U256::from(market.fee_bps))?.safe_div(U256::from(BPS))?;

        if order.detail.reduce_only {
            order.margin = U256::zero();
            order.fee = U256::zero();
            if !order.detail.execution_fee.is_zero() {
                ledger.transfer_in(AssetId::NATIVE, order.user, order.detail.execution_fee)?;
            }
        } else {
            let size_u128 = order.size.try_to_u128()?;
            risk.check_max_oi(order.asset, order.market, size_u128, current_total_oi)?;
            let owed = order.margin.safe_add(order.fee)?;
            if order.asset.is_native() {
                ledger.transfer_in(order.asset, order.user, owed.safe_add(order.detail.execution_fee)?)?;
            } else {
                ledger.transfer_in(order.asset, order.user, owed)?;
                if !order.detail.execution_fee.is_zero() {
                    ledger.transfer_in(AssetId::NATIVE, order.user, order.detail.execution_fee)?;
                }
            }
        }

        let id = self.next_id()?;
        order.id = id;
        self.index_insert(&order);
        events.push(Event::OrderCreated { order_id: id, user: order.user, asset: order.asset, market: order.market });
        self.orders.insert(id, order);
        Ok(id)
    }

    /// `submit(order, tp_price, sl_price, trailing_stop_bps, referral_code)`
    /// (spec §4.4). Returns the main order's id plus the ids of any
    /// auxiliary SL/TS and TP orders created alongside it.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &mut self,
        sender: UserId,
        mut order: Order,
        tp_price: U256,
        sl_price: U256,
        trailing_stop_bps: u32,
        referral_code: u64,
        sender_is_approved_or_signed: bool,
        now: i64,
        asset: &Asset,
        market: &Market,
        governance: &mut GovernanceConfig,
        risk: &mut RiskValidator,
        opposite_position: Option<&Position>,
        current_total_oi: u128,
        referrals: &mut dyn ReferralDirectory,
        ledger: &mut dyn Ledger,
        events: &mut Vec<Event>,
    ) -> EngineResult<(u32, Option<u32>, Option<u32>)> {
        governance.require_not_paused_for_orders()?;

        if !governance.approved_accounts.contains(&sender) {
            if !sender_is_approved_or_signed {
                return Err(EngineError::Unauthorized);
            }
            governance.approved_accounts.insert(sender);
        }

        let has_tp_sl_ts = !tp_price.is_zero() || !sl_price.is_zero() || trailing_stop_bps != 0;
        if has_tp_sl_ts {
            order.detail.reduce_only = false;
        }

        if order.detail.reduce_only || matches!(order.detail.kind, OrderKind::TrailingStop) {
            match opposite_position {
                Some(pos) if pos.is_open() && pos.is_long != order.is_long => {}
                _ => return Err(EngineError::NotFound),
            }
        }

        if governance.is_funding_account(&sender) {
            if order.user.is_zero() || order.detail.reduce_only || !matches!(order.detail.kind, OrderKind::Market) {
                return Err(EngineError::InvalidInput);
            }
        } else {
            order.user = sender;
        }
        if order.user != sender {
            order.detail.cancel_on_execute_id = None;
        }

        let main_id = self.submit_one(order.clone(), now, asset, market, governance, risk, current_total_oi, ledger, events)?;

        if referral_code != 0 {
            referrals.set(order.user, referral_code)?;
        }

        validate_tp_sl_ordering(order.is_long, order.detail.trigger_price, tp_price, sl_price)?;

        let mut sl_id = None;
        if !sl_price.is_zero() || trailing_stop_bps != 0 {
            let detail = if trailing_stop_bps != 0 {
                OrderDetail {
                    kind: OrderKind::TrailingStop,
                    reduce_only: true,
                    trigger_price: U256::zero(),
                    expiry: 0,
                    cancel_on_execute_id: None,
                    execution_fee: governance.order_execution_fee,
                    trailing_stop_bps,
                }
            } else {
                OrderDetail {
                    kind: OrderKind::Stop,
                    reduce_only: true,
                    trigger_price: sl_price,
                    expiry: 0,
                    cancel_on_execute_id: None,
                    execution_fee: governance.order_execution_fee,
                    trailing_stop_bps: 0,
                }
            };
            let sl_order = Order {
                id: 0,
                user: order.user,
                asset: order.asset,
                market: order.market,
                is_long: !order.is_long,
                margin: U256::zero(),
                size: order.size,
                fee: U256::zero(),
                timestamp: now,
                detail,
            };
            sl_id = Some(self.submit_one(sl_order, now, asset, market, governance, risk, current_total_oi, ledger, events)?);
        }

        let mut tp_id = None;
        if !tp_price.is_zero() {
            let tp_order = Order {
                id: 0,
                user: order.user,
                asset: order.asset,
                market: order.market,
                is_long: !order.is_long,
                margin: U256::zero(),
                size: order.size,
                fee: U256::zero(),
                timestamp: now,
                detail: OrderDetail {
                    kind: OrderKind::Limit,
                    reduce_only: true,
                    trigger_price: tp_price,
                    expiry: 0,
                    cancel_on_execute_id: None,
                    execution_fee: governance.order_execution_fee,
                    trailing_stop_bps: 0,
                },
            };
            tp_id = Some(self.submit_one(tp_order, now, asset, market, governance, risk, current_total_oi, ledger, events)?);
        }

        if let (Some(sl), Some(tp)) = (sl_id, tp_id) {
            if let Some(o) = self.orders.get_mut(&sl) {
                o.detail.cancel_on_execute_id = Some(tp);
            }
            if let Some(o) = self.orders.get_mut(&tp) {
                o.detail.cancel_on_execute_id = Some(sl);
            }
        }

        Ok((main_id, sl_id, tp_id))
    }

    fn refund_and_remove(&mut self, order: Order, fee_receiver: UserId, ledger: &mut dyn Ledger, events: &mut Vec<Event>, reason: &'static str) -> EngineResult {
        self.index_remove(&order);
        self.orders.remove(&order.id);
        if !order.detail.reduce_only {
            let owed = order.margin.safe_add(order.fee)?;
            if order.asset.is_native() && fee_receiver == order.user {
                ledger.transfer_out(order.asset, order.user, owed.safe_add(order.detail.execution_fee)?)?;
            } else {
                ledger.transfer_out(order.asset, order.user, owed)?;
                if !order.detail.execution_fee.is_zero() {
                    ledger.transfer_out(AssetId::NATIVE, fee_receiver, order.detail.execution_fee)?;
                }
            }
        } else if !order.detail.execution_fee.is_zero() {
            if fee_receiver == order.user {
                ledger.transfer_out(AssetId::NATIVE, order.user, order.detail.execution_fee)?;
            } else {
                ledger.transfer_out(AssetId::NATIVE, fee_receiver, order.detail.execution_fee)?;
            }
        }
        events.push(Event::OrderCancelled { order_id: order.id, reason });
        Ok(())
    }

    /// Owner-initiated cancellation.
    pub fn cancel(&mut self, id: u32, caller: UserId, ledger: &mut dyn Ledger, events: &mut Vec<Event>) -> EngineResult {
        let order = self.orders.get(&id).ok_or(EngineError::NotFound)?.clone();
        if order.user != caller {
            return Err(EngineError::Unauthorized);
        }
        self.refund_and_remove(order, caller, ledger, events, "!user-cancel")
    }

    /// `ExecutionEngine`-initiated cancellation (expiry, hard failure, OCO).
    pub fn cancel_with_reason(&mut self, id: u32, reason: &'static str, fee_receiver: UserId, ledger: &mut dyn Ledger, events: &mut Vec<Event>) -> EngineResult {
        let order = self.orders.get(&id).ok_or(EngineError::NotFound)?.clone();
        self.refund_and_remove(order, fee_receiver, ledger, events, reason)
    }
}

fn validate_tp_sl_ordering(is_long: bool, trigger_price: U256, tp_price: U256, sl_price: U256) -> EngineResult {
    if !tp_price.is_zero() && !sl_price.is_zero() {
        if is_long {
            if tp_price <= sl_price {
                return Err(EngineError::InvalidInput);
            }
        } else if sl_price <= tp_price {
            return Err(EngineError::InvalidInput);
        }
    }
    if !trigger_price.is_zero() {
        if is_long {
            if !tp_price.is_zero() && tp_price <= trigger_price {
                return Err(EngineError::InvalidInput);
            }
            if !sl_price.is_zero() && trigger_price <= sl_price {
                return Err(EngineError::InvalidInput);
            }
        } else {
            if !tp_price.is_zero() && tp_price >= trigger_price {
                return Err(EngineError::InvalidInput);
            }
            if !sl_price.is_zero() && trigger_price >= sl_price {
                return Err(EngineError::InvalidInput);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MarketCategory;

    struct FakeLedger;
    impl Ledger for FakeLedger {
        fn transfer_in(&mut self, _asset: AssetId, _from: UserId, _amount: U256) -> EngineResult {
            Ok(())
        }
        fn transfer_out(&mut self, _asset: AssetId, _to: UserId, _amount: U256) -> EngineResult {
            Ok(())
        }
    }

    struct FakeReferrals;
    impl ReferralDirectory for FakeReferrals {
        fn info(&self, _user: UserId) -> EngineResult<(u64, Option<UserId>)> {
            Ok((0, None))
        }
        fn set(&mut self, _user: UserId, _code: u64) -> EngineResult {
            Ok(())
        }
    }

    fn user(byte: u8) -> UserId {
        UserId([byte; 32])
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

    fn asset() -> Asset {
        Asset { id: AssetId::NATIVE, decimals: 6, min_size: U256::from(1u64), reference_feed_id: 0 }
    }

    fn market_order(is_long: bool) -> Order {
        Order {
            id: 0,
            user: user(1),
            asset: AssetId::NATIVE,
            market: MarketId::from_str_padded("ETH-USD"),
            is_long,
            margin: U256::from(10_000u64),
            size: U256::from(100_000u64),
            fee: U256::zero(),
            timestamp: 0,
            detail: OrderDetail {
                kind: OrderKind::Market,
                reduce_only: false,
                trigger_price: U256::zero(),
                expiry: 0,
                cancel_on_execute_id: None,
                execution_fee: U256::zero(),
                trailing_stop_bps: 0,
            },
        }
    }

    #[test]
    fn submit_plain_market_order_assigns_id_and_fee() {
        let mut book = OrderBook::default();
        let mut governance = GovernanceConfig::default();
        let mut risk = RiskValidator::default();
        let mut ledger = FakeLedger;
        let mut referrals = FakeReferrals;
        let mut events = Vec::new();
        let (id, sl, tp) = book
            .submit(
                user(1),
                market_order(true),
                U256::zero(),
                U256::zero(),
                0,
                0,
                true,
                0,
                &asset(),
                &market(),
                &mut governance,
                &mut risk,
                None,
                0,
                &mut referrals,
                &mut ledger,
                &mut events,
            )
            .unwrap();
        assert!(sl.is_none() && tp.is_none());
        let stored = book.order(id).unwrap();
        assert_eq!(stored.fee, U256::from(100u64));
    }

    #[test]
    fn submit_with_tp_sl_cross_links_cancel_on_execute() {
        let mut book = OrderBook::default();
        let mut governance = GovernanceConfig::default();
        let mut risk = RiskValidator::default();
        let mut ledger = FakeLedger;
        let mut referrals = FakeReferrals;
        let mut events = Vec::new();
        let (_main, sl, tp) = book
            .submit(
                user(1),
                market_order(true),
                U256::from(2_100u64),
                U256::from(1_950u64),
                0,
                0,
                true,
                0,
                &asset(),
                &market(),
                &mut governance,
                &mut risk,
                None,
                0,
                &mut referrals,
                &mut ledger,
                &mut events,
            )
            .unwrap();
        let sl = sl.unwrap();
        let tp = tp.unwrap();
        assert_eq!(book.order(sl).unwrap().detail.cancel_on_execute_id, Some(tp));
        assert_eq!(book.order(tp).unwrap().detail.cancel_on_execute_id, Some(sl));
    }

    #[test]
    fn reduce_only_without_opposite_position_is_rejected() {
        let mut book = OrderBook::default();
        let mut governance = GovernanceConfig::default();
        let mut risk = RiskValidator::default();
        let mut ledger = FakeLedger;
        let mut referrals = FakeReferrals;
        let mut events = Vec::new();
        let mut order = market_order(true);
        order.detail.reduce_only = true;
        let err = book
            .submit(
                user(1),
                order,
                U256::zero(),
                U256::zero(),
                0,
                0,
                true,
                0,
                &asset(),
                &market(),
                &mut governance,
                &mut risk,
                None,
                0,
                &mut referrals,
                &mut ledger,
                &mut events,
            )
            .unwrap_err();
        assert_eq!(err, EngineError::NotFound);
    }

    #[test]
    fn unapproved_sender_without_signature_is_rejected() {
        let mut book = OrderBook::default();
        let mut governance = GovernanceConfig::default();
        let mut risk = RiskValidator::default();
        let mut ledger = FakeLedger;
        let mut referrals = FakeReferrals;
        let mut events = Vec::new();
        let err = book
            .submit(
                user(1),
                market_order(true),
                U256::zero(),
                U256::zero(),
                0,
                0,
                false,
                0,
                &asset(),
                &market(),
                &mut governance,
                &mut risk,
                None,
                0,
                &mut referrals,
                &mut ledger,
                &mut events,
            )
            .unwrap_err();
        assert_eq!(err, EngineError::Unauthorized);
    }

    #[test]
    fn cancel_refunds_margin_and_fee_to_owner() {
        let mut book = OrderBook::default();
        let mut governance = GovernanceConfig::default();
        let mut risk = RiskValidator::default();
        let mut ledger = FakeLedger;
        let mut referrals = FakeReferrals;
        let mut events = Vec::new();
        let (id, _, _) = book
            .submit(
                user(1),
                market_order(true),
                U256::zero(),
                U256::zero(),
                0,
                0,
                true,
                0,
                &asset(),
                &market(),
                &mut governance,
                &mut risk,
                None,
                0,
                &mut referrals,
                &mut ledger,
                &mut events,
            )
            .unwrap();
        book.cancel(id, user(1), &mut ledger, &mut events).unwrap();
        assert!(book.order(id).is_none());
        assert!(events.iter().any(|e| matches!(e, Event::OrderCancelled { reason: "!user-cancel", .. })));
    }
}
