use portable_atomic::{AtomicI32, AtomicI64, Ordering};
use serde::{Deserialize, Serialize};

/// One contiguous reserved range `[max - step, max)` plus a consumption
/// cursor.
///
/// Consumers advance `cursor` with a single `fetch_add`; the pre-increment
/// value is a valid id iff it is below `max`. Once exhausted the cursor keeps
/// climbing past `max` until the range is overwritten by a refill, so `idle`
/// may go negative.
///
/// All fields are atomics so that a refill can overwrite the standby segment
/// without holding the buffer lock. Visibility to consumers is established by
/// the buffer lock that guards the `next_ready` flag and the segment switch.
#[derive(Debug, Default)]
pub(crate) struct Segment {
    cursor: AtomicI64,
    max: AtomicI64,
    step: AtomicI32,
}

impl Segment {
    pub(crate) const fn new() -> Self {
        Self {
            cursor: AtomicI64::new(0),
            max: AtomicI64::new(0),
            step: AtomicI32::new(0),
        }
    }

    /// Takes the next id, or `None` if the range is exhausted.
    #[inline]
    pub(crate) fn try_take(&self) -> Option<i64> {
        let value = self.cursor.fetch_add(1, Ordering::AcqRel);
        (value < self.max.load(Ordering::Acquire)).then_some(value)
    }

    /// Remaining capacity, `max - cursor`.
    #[inline]
    pub(crate) fn idle(&self) -> i64 {
        self.max.load(Ordering::Acquire) - self.cursor.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn step(&self) -> i32 {
        self.step.load(Ordering::Acquire)
    }

    /// Returns `true` once less than 90% of the range is left.
    #[inline]
    pub(crate) fn below_refill_threshold(&self) -> bool {
        (self.idle() as f64) < 0.9 * f64::from(self.step())
    }

    /// Points the segment at the freshly reserved range `[max_id - step,
    /// max_id)`.
    pub(crate) fn load_range(&self, max_id: i64, step: i32) {
        self.step.store(step, Ordering::Release);
        self.max.store(max_id, Ordering::Release);
        self.cursor
            .store(max_id - i64::from(step), Ordering::Release);
    }

    pub(crate) fn snapshot(&self) -> SegmentSnapshot {
        let cursor = self.cursor.load(Ordering::Acquire);
        let max = self.max.load(Ordering::Acquire);
        SegmentSnapshot {
            cursor,
            max,
            step: self.step(),
            idle: max - cursor,
        }
    }
}

/// Point-in-time view of a segment, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSnapshot {
    pub cursor: i64,
    pub max: i64,
    pub step: i32,
    pub idle: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_exactly_the_reserved_range() {
        let segment = Segment::new();
        segment.load_range(110, 10);

        let taken: Vec<_> = core::iter::from_fn(|| segment.try_take()).collect();
        assert_eq!(taken, (100..110).collect::<Vec<_>>());
        assert!(segment.try_take().is_none());
        assert!(segment.idle() < 0);
    }

    #[test]
    fn empty_segment_is_exhausted_without_refill_pressure() {
        let segment = Segment::new();
        assert_eq!(segment.idle(), 0);
        assert!(!segment.below_refill_threshold());
        assert!(segment.try_take().is_none());
    }

    #[test]
    fn refill_threshold_trips_below_ninety_percent() {
        let segment = Segment::new();
        segment.load_range(110, 10);

        // idle 10, then 9: 9 is not < 9
        assert!(!segment.below_refill_threshold());
        segment.try_take();
        assert!(!segment.below_refill_threshold());
        segment.try_take();
        assert!(segment.below_refill_threshold());
    }

    #[test]
    fn reload_resets_cursor_to_range_start() {
        let segment = Segment::new();
        segment.load_range(110, 10);
        while segment.try_take().is_some() {}

        segment.load_range(130, 20);
        assert_eq!(
            segment.snapshot(),
            SegmentSnapshot {
                cursor: 110,
                max: 130,
                step: 20,
                idle: 20,
            }
        );
        assert_eq!(segment.try_take(), Some(110));
    }
}
