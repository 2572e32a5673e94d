pub mod bignumber;
pub mod casting;
pub mod ceil_div;
pub mod constants;
pub mod floor_div;
pub mod safe_math;
pub mod safe_unwrap;

pub use bignumber::{I256, U256};
pub use casting::{Cast, CastU256};
pub use safe_math::{SafeFloorDiv, SafeMath};
pub use safe_unwrap::SafeUnwrap;
