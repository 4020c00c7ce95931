//! Stream epochs and millisecond timestamps.
//!
//! Record timestamps are `int32` milliseconds relative to the moment the
//! stream was opened. They are taken from a monotonic clock and truncated,
//! never rounded, so a sample acquired 99.9 ms after the epoch is stamped 99.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};

/// Convert floating seconds to whole milliseconds, truncating toward zero.
///
/// Values outside the `i32` range saturate, which is roughly 24.8 days of
/// continuous acquisition.
pub fn truncate_ms(seconds: f64) -> i32 {
    (seconds * 1000.0) as i32
}

/// Monotonic epoch of one stream, with the matching wall-clock stamp for the
/// file header.
#[derive(Debug, Clone, Copy)]
pub struct StreamClock {
    epoch: Instant,
    started_at: DateTime<Local>,
    epoch_unix_ms: i64,
}

impl StreamClock {
    /// Start a new epoch now.
    pub fn start() -> Self {
        let epoch_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            epoch: Instant::now(),
            started_at: Local::now(),
            epoch_unix_ms,
        }
    }

    /// Milliseconds elapsed since the epoch, truncated.
    pub fn now_ms(&self) -> i32 {
        self.ms_at(Instant::now())
    }

    /// Timestamp for an instant observed after the epoch.
    pub fn ms_at(&self, instant: Instant) -> i32 {
        truncate_ms(instant.saturating_duration_since(self.epoch).as_secs_f64())
    }

    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Wall-clock time of the epoch, written to the header.
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Epoch as Unix milliseconds.
    pub fn epoch_unix_ms(&self) -> i64 {
        self.epoch_unix_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncates_instead_of_rounding() {
        assert_eq!(truncate_ms(0.0999), 99);
        assert_eq!(truncate_ms(1.0), 1000);
        assert_eq!(truncate_ms(0.0004), 0);
    }

    #[test]
    fn test_truncate_saturates() {
        assert_eq!(truncate_ms(1e12), i32::MAX);
    }

    #[test]
    fn test_ms_at_is_relative_to_epoch() {
        let clock = StreamClock::start();
        let later = clock.epoch() + Duration::from_micros(250_900);
        assert_eq!(clock.ms_at(later), 250);
        assert_eq!(clock.ms_at(clock.epoch()), 0);
    }
}
