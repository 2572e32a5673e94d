//! Numeric casting that turns a lossy conversion into a typed error instead
//! of silently truncating. Generalized from the teacher's `math/casting.rs`.

use std::convert::TryInto;
use std::panic::Location;

use crate::error::{EngineError, EngineResult};
use crate::math::bignumber::U256;

pub trait Cast: Sized {
    #[track_caller]
    fn cast<T: std::convert::TryFrom<Self>>(self) -> EngineResult<T> {
        match self.try_into() {
            Ok(result) => Ok(result),
            Err(_) => {
                let caller = Location::caller();
                log::warn!(target: "perp_engine_core", "cast error at {}:{}", caller.file(), caller.line());
                Err(EngineError::CastingFailure)
            }
        }
    }
}

impl Cast for u128 {}
impl Cast for u64 {}
impl Cast for i128 {}
impl Cast for i64 {}
impl Cast for usize {}

pub trait CastU256: Sized {
    fn try_to_u128(self) -> EngineResult<u128>;
    fn try_to_u64(self) -> EngineResult<u64>;
}

impl CastU256 for U256 {
    #[track_caller]
    fn try_to_u128(self) -> EngineResult<u128> {
        self.try_into().map_err(|_| EngineError::BigNumberConversionError)
    }

    #[track_caller]
    fn try_to_u64(self) -> EngineResult<u64> {
        self.try_into().map_err(|_| EngineError::BigNumberConversionError)
    }
}
