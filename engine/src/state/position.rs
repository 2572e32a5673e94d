//! Open position bookkeeping (spec §3, §4.3). Generalized from the
//! teacher's `state/user_position.rs`: that file tracks a spot
//! deposit/borrow balance scaled by a market interest index, which has no
//! counterpart here — a perp position instead carries `avg_price` and a
//! funding-tracker snapshot, so it is its own type rather than a
//! reinterpretation of the teacher's `Position`.

use crate::math::{I256, U256};
use crate::state::ids::{AssetId, MarketId, UserId};

#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub user: UserId,
    pub asset: AssetId,
    pub market: MarketId,
    pub is_long: bool,
    pub size: U256,
    pub margin: U256,
    pub avg_price: U256,
    pub timestamp: i64,
    pub funding_tracker_snapshot: I256,
}

impl Position {
    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }
}
