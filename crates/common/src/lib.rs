//! Shared error helpers and the injectable clock used across gatehouse crates.

pub mod error;
pub mod time;

pub use {
    error::{Error, Result},
    time::{Clock, ManualClock, SharedClock, SystemClock, parse_duration, system_clock},
};
