use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

/// A trait for time sources that return a wall-clock timestamp in
/// milliseconds since the UNIX epoch.
///
/// The allocator only uses time to measure how long a segment lasted between
/// two refills, which drives the adaptive step. Plugging in a mocked source
/// makes that behaviour deterministic in tests.
///
/// A value of `0` is reserved: buffers use it to mean "no refill recorded
/// yet", so implementations should never return it in practice.
///
/// # Example
///
/// ```
/// use segid::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the UNIX epoch.
    fn current_millis(&self) -> u64;
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn current_millis(&self) -> u64 {
        (**self).current_millis()
    }
}

/// The system wall clock.
///
/// Adaptive stepping compares timestamps minutes apart, so wall-clock
/// adjustments of a few milliseconds are irrelevant here.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn current_millis(&self) -> u64 {
        millis_since_epoch(SystemTime::now())
    }
}

/// Clock readings before the epoch clamp to `1` so they never collide with
/// the "no refill recorded" marker.
fn millis_since_epoch(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH)
        .map_or(1, |d| (d.as_millis() as u64).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn system_clock_never_reports_zero() {
        assert_eq!(millis_since_epoch(UNIX_EPOCH - Duration::from_secs(5)), 1);
        assert_eq!(millis_since_epoch(UNIX_EPOCH), 1);
        assert_eq!(
            millis_since_epoch(UNIX_EPOCH + Duration::from_millis(1_700)),
            1_700
        );
        assert!(SystemClock.current_millis() > 1);
    }
}
