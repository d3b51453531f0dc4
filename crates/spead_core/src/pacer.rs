//! Send-side rate pacer math.
//!
//! Ported from `spead2`'s `stream::update_send_times` (see
//! `original_source/src/send_stream.cpp`); spec.md §4.3 describes this only
//! in prose ("two virtual clocks").
//!
//! Two virtual clocks drift forward as bytes are sent: `send_time` at
//! `1 / rate` seconds per byte, `send_time_burst` at `1 / burst_rate` seconds
//! per byte (`burst_rate = rate * burst_rate_ratio ≥ rate`, so the burst
//! clock drifts slower and can "bank" less credit). The next packet may not
//! be released before `max(send_time, send_time_burst)`; `send_time_burst`
//! is then clamped to `max(now, target)` so idle periods cannot bank
//! unbounded burst credit.

use std::time::{Duration, Instant};

/// Converts a rate in bytes/sec into seconds-per-byte. A rate of `0` means
/// unlimited, which is represented as `0.0` seconds per byte (never sleep).
fn seconds_per_byte(rate: f64) -> f64 {
    if rate <= 0.0 { 0.0 } else { 1.0 / rate }
}

/// The send pacer's pair of virtual clocks.
///
/// See the module docs for the math; see spec.md §9 "Timer clock choice" for
/// why this uses [`Instant`] (monotonic) rather than wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct PacerClock {
    send_time: Instant,
    send_time_burst: Instant,
    seconds_per_byte: f64,
    seconds_per_byte_burst: f64,
}

impl PacerClock {
    /// Creates a pacer clock with both virtual clocks starting at `now`.
    #[must_use]
    pub fn new(now: Instant, rate: f64, burst_rate: f64) -> Self {
        Self {
            send_time: now,
            send_time_burst: now,
            seconds_per_byte: seconds_per_byte(rate),
            seconds_per_byte_burst: seconds_per_byte(burst_rate),
        }
    }

    /// Updates the configured rates without resetting the clocks.
    pub fn set_rates(&mut self, rate: f64, burst_rate: f64) {
        self.seconds_per_byte = seconds_per_byte(rate);
        self.seconds_per_byte_burst = seconds_per_byte(burst_rate);
    }

    /// Resets both virtual clocks to `now`, discarding any banked credit.
    ///
    /// Called when a stream transitions from `EMPTY` back to `QUEUED`
    /// (spec.md §4.3 "Enqueue").
    pub fn reset(&mut self, now: Instant) {
        self.send_time = now;
        self.send_time_burst = now;
    }

    /// Advances both virtual clocks by the cost of `rate_bytes` bytes sent
    /// since the last evaluation, and returns the instant at which the next
    /// burst may be released.
    #[must_use]
    pub fn update_send_times(&mut self, now: Instant, rate_bytes: u64) -> Instant {
        #[expect(clippy::cast_precision_loss, reason = "byte counts are far below 2^53")]
        let rate_bytes = rate_bytes as f64;

        self.send_time += Duration::from_secs_f64(rate_bytes * self.seconds_per_byte);
        self.send_time_burst += Duration::from_secs_f64(rate_bytes * self.seconds_per_byte_burst);

        let target = self.send_time.max(self.send_time_burst);
        self.send_time_burst = now.max(target);
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_rate_never_sleeps() {
        let now = Instant::now();
        let mut pacer = PacerClock::new(now, 0.0, 0.0);
        let target = pacer.update_send_times(now, 1_000_000);
        assert!(target <= now);
    }

    #[test]
    fn limited_rate_pushes_target_into_future() {
        let now = Instant::now();
        let mut pacer = PacerClock::new(now, 1000.0, 1050.0);
        let target = pacer.update_send_times(now, 1000);
        assert!(target > now);
        assert!(target - now <= Duration::from_secs(1));
    }

    #[test]
    fn idle_period_does_not_bank_burst_credit() {
        let start = Instant::now();
        let mut pacer = PacerClock::new(start, 1000.0, 1050.0);
        let later = start + Duration::from_secs(10);
        // no bytes sent, but evaluated much later: burst clock must not sit
        // far in the past relative to `later`.
        let target = pacer.update_send_times(later, 0);
        assert!(target <= later);
    }
}
