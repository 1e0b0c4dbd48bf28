use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// Milliseconds since the unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Wall-anchored monotonic millisecond clock.
///
/// Reads advance with the tokio clock, so timestamps stay ordered even if the
/// system time jumps, and paused test runtimes control them.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
    origin_millis: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_millis: unix_millis(),
        }
    }

    pub fn now(&self) -> u64 {
        self.origin_millis + self.origin.elapsed().as_millis() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
