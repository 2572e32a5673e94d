//! Per-(asset, market) funding tracker state (spec §3, §4.1).

use crate::math::I256;

#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct FundingTrackerState {
    /// Cumulative signed index in units of `UNIT * bps`.
    pub cumulative_index: I256,
    /// `None` until the first `update` call establishes a baseline —
    /// distinct from "last updated at timestamp 0".
    pub last_updated_ts: Option<i64>,
}
