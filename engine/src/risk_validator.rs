//! C8 — RiskValidator (spec §4, "consulted synchronously by C6 and by C7 at
//! submission time"). Two independent checks per asset: a hard open-interest
//! cap per market, and a time-decayed tracker of cumulative pool P&L
//! drawdown.
//!
//! Grounded on the teacher's `state/guard_rails.rs` (a bounds-check module
//! consulted before a margin trade is accepted), generalized from its
//! single fixed guard-rail set to per-asset configurable state.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::math::constants::BPS;
use crate::math::{I256, SafeMath, U256};
use crate::state::{AssetId, MarketId, RiskState};

#[derive(Clone, Debug, Default)]
pub struct RiskValidator {
    state: HashMap<AssetId, RiskState>,
}

impl RiskValidator {
    fn entry(&mut self, asset: AssetId) -> &mut RiskState {
        self.state.entry(asset).or_insert_with(RiskState::default)
    }

    pub fn set_max_oi(&mut self, asset: AssetId, market: MarketId, cap: u128) {
        self.entry(asset).max_oi.insert(market, cap);
    }

    pub fn set_profit_limit(&mut self, asset: AssetId, profit_limit_bps: u32) -> EngineResult {
        if profit_limit_bps >= BPS {
            return Err(EngineError::InvalidInput);
        }
        self.entry(asset).profit_limit_bps = profit_limit_bps;
        Ok(())
    }

    /// `check_max_oi(asset, market, order.size)`: rejects an order that
    /// would push total OI on `(asset, market)` past the configured cap. A
    /// market with no configured cap is unconstrained.
    pub fn check_max_oi(
        &self,
        asset: AssetId,
        market: MarketId,
        additional_size: u128,
        current_total_oi: u128,
    ) -> EngineResult {
        let cap = self.state.get(&asset).and_then(|s| s.max_oi.get(&market)).copied();
        match cap {
            Some(cap) if current_total_oi.saturating_add(additional_size) > cap => {
                Err(EngineError::OICapExceeded)
            }
            _ => Ok(()),
        }
    }

    /// `check_pool_drawdown(asset, pnl)`. `pool_balance` anchors the
    /// drawdown limit to the pool's current size; `hourly_decay_bps` comes
    /// from governance (spec §3 keys the decay rate on pool-wide config, not
    /// per-asset risk state). Spec §9 open question: the source updates
    /// `poolLastChecked`/`poolProfitTracker` before reverting on overshoot;
    /// this implementation instead computes the post-decay, post-pnl
    /// tracker value and only commits it if the limit holds, i.e. a genuine
    /// "fail and roll back" — see DESIGN.md.
    pub fn check_pool_drawdown(
        &mut self,
        asset: AssetId,
        pnl: I256,
        pool_balance: U256,
        hourly_decay_bps: u32,
        now: i64,
    ) -> EngineResult {
        let risk = self.entry(asset);

        let decayed = decay_tracker(risk.pool_profit_tracker, risk.last_checked_ts, now, hourly_decay_bps);
        // Pool P&L moves opposite to trader P&L: a trader profit is a pool loss.
        let pool_delta = pnl.checked_neg().ok_or(EngineError::MathError)?;
        let next_tracker = decayed.checked_add(pool_delta).ok_or(EngineError::MathError)?;

        if next_tracker.is_negative() {
            let limit = pool_balance.safe_mul(U256::from(risk.profit_limit_bps))?.safe_div(U256::from(BPS))?;
            if next_tracker.magnitude() > limit {
                return Err(EngineError::PoolDrawdownExceeded);
            }
        }

        risk.pool_profit_tracker = next_tracker;
        risk.last_checked_ts = now;
        Ok(())
    }
}

/// Linear decay of the drawdown tracker toward zero (spec §9 open
/// question: "cap `hoursPassed` such that the multiplier never
/// underflows"). `hourly_decay_bps` is read from governance by the caller;
/// this helper only performs the decay arithmetic.
fn decay_tracker(tracker: I256, last_checked_ts: i64, now: i64, hourly_decay_bps: u32) -> I256 {
    if tracker.is_zero() || now <= last_checked_ts {
        return tracker;
    }
    let hours_passed = ((now - last_checked_ts) / 3_600).max(0) as u128;
    let decay_bps = (hourly_decay_bps as u128).saturating_mul(hours_passed).min(BPS as u128);
    let multiplier_bps = (BPS as u128).saturating_sub(decay_bps);
    let magnitude = tracker.magnitude();
    let decayed_magnitude = magnitude.saturating_mul(U256::from(multiplier_bps)) / U256::from(BPS as u128);
    if tracker.is_negative() {
        I256::neg_from_u256(decayed_magnitude)
    } else {
        I256::from_u256(decayed_magnitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_oi_unconfigured_is_unconstrained() {
        let validator = RiskValidator::default();
        let asset = AssetId::NATIVE;
        let market = MarketId::from_str_padded("ETH-USD");
        assert!(validator.check_max_oi(asset, market, 1_000_000, 0).is_ok());
    }

    #[test]
    fn max_oi_rejects_overshoot() {
        let mut validator = RiskValidator::default();
        let asset = AssetId::NATIVE;
        let market = MarketId::from_str_padded("ETH-USD");
        validator.set_max_oi(asset, market, 100);
        assert!(validator.check_max_oi(asset, market, 50, 60).is_err());
        assert!(validator.check_max_oi(asset, market, 40, 60).is_ok());
    }

    #[test]
    fn decay_never_underflows_past_zero() {
        let tracker = I256::neg_from_u256(U256::from(1_000u64));
        let decayed = decay_tracker(tracker, 0, 1_000_000_000, 50);
        assert!(decayed.is_zero() || decayed.magnitude() <= U256::from(1_000u64));
    }

    #[test]
    fn drawdown_within_limit_commits() {
        let mut validator = RiskValidator::default();
        let asset = AssetId::NATIVE;
        validator.set_profit_limit(asset, 5_000).unwrap();
        let pool_balance = U256::from(1_000_000u64);
        let pnl = I256::from_u256(U256::from(10_000u64));
        validator.check_pool_drawdown(asset, pnl, pool_balance, 0, 100).unwrap();
    }

    #[test]
    fn drawdown_past_limit_rolls_back() {
        let mut validator = RiskValidator::default();
        let asset = AssetId::NATIVE;
        validator.set_profit_limit(asset, 100).unwrap();
        let pool_balance = U256::from(1_000u64);
        let pnl = I256::from_u256(U256::from(500u64));
        let before = validator.state.get(&asset).cloned().unwrap_or_default();
        let err = validator.check_pool_drawdown(asset, pnl, pool_balance, 0, 100).unwrap_err();
        assert_eq!(err, EngineError::PoolDrawdownExceeded);
        let after = validator.state.get(&asset).cloned().unwrap();
        assert_eq!(before.pool_profit_tracker, after.pool_profit_tracker);
    }
}
