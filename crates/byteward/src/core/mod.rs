//! Pure transfer bookkeeping.
//!
//! Nothing in this module performs I/O or reads a clock. Callers pass
//! timestamps in, and get back the events a transfer should emit.

mod meter;
mod throttle;

pub use meter::{Meter, Tick};
pub use throttle::Throttle;
