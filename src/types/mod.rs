//! Core value types.
//!
//! - [`time`]: nanosecond instants driving the synchronous clock
//! - [`priority`]: the three observable run-queue bands

pub mod priority;
pub mod time;

pub use priority::Priority;
pub use time::Time;
