//! Connection and bandwidth throttling shared by every fetch
//!
//! This module provides:
//! - `ThrottleDescription`: per-bin limits compiled from configuration
//! - `BandwidthThrottle`: the calibrated bytes-per-second limiter of one bin
//! - `ConnectionPool`: the in-use and idle connection accounting of one bin
//! - `ThrottleRegistry`: the bin map and the all-or-none multi-bin admission

mod bandwidth;
mod description;
mod pool;
mod registry;

pub use bandwidth::{BandwidthThrottle, ReadTicket};
pub use description::ThrottleDescription;
pub use pool::{ConnectionPool, IdleSlot, PoolDecision};
pub use registry::{
    Admission, BinSet, BinStats, LiveToken, Slot, ThrottleRegistry, DEFAULT_IDLE_TIMEOUT,
};

/// Size of each throttled body read
pub const READ_CHUNK_LENGTH: usize = 4096;
