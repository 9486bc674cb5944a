//! Monotonic time source for all measurement timestamps.
//!
//! Timestamps are nanoseconds since a process-local anchor taken on first
//! use; only differences are meaningful. Backed by `std::time::Instant`
//! (CLOCK_MONOTONIC on Linux, nanosecond resolution).

use once_cell::sync::Lazy;
use std::time::Instant;

static ANCHOR: Lazy<Instant> = Lazy::new(Instant::now);

pub struct PerfClock;

impl PerfClock {
    /// Pins the timestamp anchor. Called once at startup so that event
    /// timestamps start near zero; harmless to call again.
    pub fn init() {
        Lazy::force(&ANCHOR);
    }

    pub fn now() -> Instant {
        Instant::now()
    }

    /// Nanoseconds since the process anchor.
    #[inline]
    pub fn timestamp() -> i64 {
        ANCHOR.elapsed().as_nanos() as i64
    }
}
