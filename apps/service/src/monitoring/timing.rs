//! Interval and timeout derivation shared by the probe, the loop and the
//! schedulers.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

/// A check whose first byte arrives later than this is SLOW rather than PASS.
pub const SLOW_THRESHOLD: Duration = Duration::from_millis(5_000);

/// Upper bound on the per-check timeout regardless of the sampling interval.
pub const MAX_PROBE_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Hard ceiling on the per-tick wake assertion.
pub const WAKE_ASSERTION_CEILING: Duration = Duration::from_secs(5);

/// Per-check probe timeout for a sampling interval: `min(interval / 2, 15s)`.
///
/// Both checks run back to back, so a tick where both time out still fits
/// inside one interval.
pub fn probe_timeout_for(sampling_interval: Duration) -> Duration {
    (sampling_interval / 2).min(MAX_PROBE_TIMEOUT)
}

/// Whether a tick at `now` should take a wake assertion.
///
/// A zero wake interval disables the assertion entirely. Otherwise it is
/// taken on the first tick and then whenever more than `wake_interval` has
/// passed since the last one.
pub fn wake_due(last_wake: Option<Instant>, now: Instant, wake_interval: Duration) -> bool {
    if wake_interval.is_zero() {
        return false;
    }
    match last_wake {
        Some(last) => now.saturating_duration_since(last) > wake_interval,
        None => true,
    }
}

pub fn unix_millis_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

/// Wall-clock millisecond source that never repeats or goes backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_millis(&self) -> i64 {
        self.next_after(unix_millis_now())
    }

    fn next_after(&self, wall: i64) -> i64 {
        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = wall.max(previous + 1);
            match self.last.compare_exchange_weak(
                previous,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(current) => previous = current,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_timeout_derivation() {
        assert_eq!(probe_timeout_for(Duration::from_millis(2_000)), Duration::from_millis(1_000));
        assert_eq!(probe_timeout_for(Duration::from_millis(10_000)), Duration::from_millis(5_000));
        assert_eq!(probe_timeout_for(Duration::from_millis(20_000)), Duration::from_millis(10_000));
        assert_eq!(probe_timeout_for(Duration::from_millis(30_000)), MAX_PROBE_TIMEOUT);
        assert_eq!(probe_timeout_for(Duration::from_secs(3_600)), MAX_PROBE_TIMEOUT);
    }

    #[test]
    fn test_probe_timeout_fits_interval() {
        for millis in (2_000..=120_000).step_by(500) {
            let interval = Duration::from_millis(millis);
            let timeout = probe_timeout_for(interval);
            assert_eq!(timeout, (interval / 2).min(MAX_PROBE_TIMEOUT));
            assert!(timeout * 2 <= interval);
        }
    }

    #[test]
    fn test_wake_due_scenario() {
        let wake_interval = Duration::from_millis(60_000);
        let first = Instant::now();
        assert!(wake_due(None, first, wake_interval));

        let second = first + Duration::from_millis(30_000);
        assert!(!wake_due(Some(first), second, wake_interval));

        let third = second + Duration::from_millis(40_000);
        assert!(wake_due(Some(first), third, wake_interval));
    }

    #[test]
    fn test_zero_wake_interval_disables_assertion() {
        assert!(!wake_due(None, Instant::now(), Duration::ZERO));
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        assert_eq!(clock.next_after(100), 100);
        assert_eq!(clock.next_after(100), 101);
        assert_eq!(clock.next_after(50), 102);
        assert_eq!(clock.next_after(500), 500);
    }
}
