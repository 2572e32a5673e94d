//! Per-asset risk state (spec §3, §4.2 RiskValidator / C8).

use std::collections::HashMap;

use crate::math::I256;
use crate::state::ids::MarketId;

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct RiskState {
    /// Amortized-hourly signed tracker of cumulative pool P&L exposure.
    pub pool_profit_tracker: I256,
    pub last_checked_ts: i64,
    pub profit_limit_bps: u32,
    pub max_oi: HashMap<MarketId, u128>,
}
