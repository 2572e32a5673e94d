//! Open-interest bookkeeping (spec §3): long/short totals per (asset,
//! market) and per asset, kept as unsigned 128-bit per spec's data model
//! (the only quantity the spec pins to a narrower width than the 256-bit
//! default — OI never needs the fee/LP-share multiply-before-divide
//! headroom that motivates U256 elsewhere).

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OpenInterest {
    pub long: u128,
    pub short: u128,
}

impl OpenInterest {
    pub fn total(&self) -> u128 {
        self.long.saturating_add(self.short)
    }
}
