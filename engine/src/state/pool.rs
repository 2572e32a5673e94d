//! Per-asset liquidity pool state (spec §3, §4.2 — "the hardest accounting
//! surface"). Generalized from the teacher's `state/market.rs` pool-balance
//! fields (`revenue_pool`, `spot_fee_pool`, `pnl_pool`), which track a
//! single scaled balance each; this pool additionally needs the streaming
//! buffer, LP-share ledger and tax inputs spec §4.2 describes, which the
//! teacher's spot-margin pools have no counterpart for (that protocol has
//! no buffer-streaming or LP-share model at all).

use std::collections::HashMap;

use crate::math::{I256, U256};
use crate::state::ids::UserId;

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Pool {
    /// Principal balance.
    pub balance: U256,
    /// Pending payouts streaming in from recent trader losses.
    pub buffer_balance: U256,
    pub lp_supply: U256,
    pub user_lp: HashMap<UserId, U256>,
    pub last_paid_ts: i64,
    pub current_epoch_remaining_buffer: U256,
    /// Externally supplied aggregate unrealized P&L, signed.
    pub global_upl: I256,
    pub fee_reserve: U256,
}

impl Pool {
    pub fn user_lp_balance(&self, user: &UserId) -> U256 {
        *self.user_lp.get(user).unwrap_or(&U256::zero())
    }
}
