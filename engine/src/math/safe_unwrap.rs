//! `Option`/`Result` unwrap that logs the call site instead of panicking.
//! Generalized from the teacher's `math/safe_unwrap.rs`.

use std::panic::Location;

use crate::error::{EngineError, EngineResult};

pub trait SafeUnwrap {
    type Item;
    fn safe_unwrap(self) -> EngineResult<Self::Item>;
}

impl<T> SafeUnwrap for Option<T> {
    type Item = T;

    #[track_caller]
    fn safe_unwrap(self) -> EngineResult<T> {
        match self {
            Some(v) => Ok(v),
            None => {
                let caller = Location::caller();
                log::warn!(target: "perp_engine_core", "unwrap error at {}:{}", caller.file(), caller.line());
                Err(EngineError::InvalidInput)
            }
        }
    }
}
