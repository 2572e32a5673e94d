//! Engine-wide error type.
//!
//! Mirrors the teacher's `error.rs` (`SpedXSpotResult<T> = Result<T,
//! ErrorCode>`), swapping Anchor's `#[error_code]` macro for `thiserror`
//! since there is no on-chain program host to generate Anchor's IDL error
//! tables from. Every kind in spec §7 gets its own variant; the batch-level
//! "keep vs. cancel" outcomes are modeled separately (see `events.rs`'s
//! `ExecutionOutcome`) rather than folded in here, since per spec §7 those
//! never propagate as a thrown error.

use thiserror::Error;

pub type EngineResult<T = ()> = std::result::Result<T, EngineError>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    #[error("caller is not authorized for this action")]
    Unauthorized,
    #[error("order or position not found")]
    NotFound,
    #[error("order has expired")]
    Expired,
    #[error("order is too old to execute")]
    TooOld,
    #[error("oracle publish time is stale")]
    Stale,
    #[error("oracle price unavailable")]
    PriceUnavailable,
    #[error("oracle price deviates from the reference price beyond the allowed bound")]
    ReferenceDeviation,
    #[error("trigger condition not met")]
    NotExecutable,
    #[error("protected market order rejected by its trigger bound")]
    ProtectedMarketRejected,
    #[error("position has not been held for the minimum hold time")]
    MinHoldTime,
    #[error("remaining position size would fall below the asset minimum")]
    MinRemainingSize,
    #[error("insufficient margin")]
    InsufficientMargin,
    #[error("pool does not have enough liquidity to pay out this amount")]
    InsufficientPoolLiquidity,
    #[error("open interest cap exceeded")]
    OICapExceeded,
    #[error("pool drawdown limit exceeded")]
    PoolDrawdownExceeded,
    #[error("pool risk profit limit exceeded")]
    PoolRiskProfitLimit,
    #[error("tax would consume the entire transferred amount")]
    TaxExceedsBps,
    #[error("amount after tax is below the caller's minimum")]
    MinAmountAfterTax,
    #[error("invalid input")]
    InvalidInput,
    #[error("this action is currently paused")]
    Paused,

    #[error("arithmetic overflow, underflow or division by zero")]
    MathError,
    #[error("unable to cast between numeric types")]
    CastingFailure,
    #[error("unable to convert big-number type without loss")]
    BigNumberConversionError,
}
