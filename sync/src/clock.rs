//! Wall clock driven by the tokio timer.

use tokio::time::Instant;
use weft_engine::{Clock, SystemClock, Timestamp};

/// Milliseconds since the epoch, advanced by `tokio::time`.
///
/// The epoch offset is taken once at construction; afterwards time moves
/// with the tokio clock, so `tokio::time::pause` also freezes engine
/// timestamps and debounce deadlines.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_ms: Timestamp,
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_ms())
    }

    pub fn starting_at(origin_ms: Timestamp) -> Self {
        Self {
            origin_ms,
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> Timestamp {
        self.origin_ms + self.origin.elapsed().as_millis() as Timestamp
    }
}
