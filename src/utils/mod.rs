//! Shared arithmetic and scheduling helpers.

pub mod decimal;
pub mod time;

pub use decimal::{annualized_yield, progress_denominator, safe_div, whole_clips};
pub use time::{minutes_until, next_funding_settlement};
