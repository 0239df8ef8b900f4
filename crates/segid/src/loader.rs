//! Loading a segment from the store and adapting the step.
//!
//! Three cases, chosen from the buffer's state:
//!
//! - **first load**: the buffer is not initialized yet. Reserve the store's
//!   configured step and adopt it as both `step` and `min_step`. The refill
//!   timestamp is left unset, so the next refill goes through the stale case.
//! - **stale timestamp**: initialized, but no refill has been timed yet.
//!   Same reservation, and the timestamp starts ticking.
//! - **adaptive**: double the step when the previous segment lasted less than
//!   one segment duration, keep it under two, halve it (never below
//!   `min_step`) beyond that.
//!
//! Store errors are returned untouched; the callers decide what to do with
//! them.

use crate::{
    AllocRecord, AllocStore, AllocatorConfig, StoreError, TimeSource,
    buffer::{SegmentBuffer, StepTuning},
};
use core::time::Duration;

/// Everything a load needs besides the buffer: the store, the clock and the
/// step limits. Shared by the allocator and the refill workers.
#[derive(Debug)]
pub(crate) struct SegmentLoader<S, T> {
    store: S,
    time: T,
    config: AllocatorConfig,
}

impl<S, T> SegmentLoader<S, T>
where
    S: AllocStore,
    T: TimeSource,
{
    pub(crate) fn new(store: S, time: T, config: AllocatorConfig) -> Self {
        Self {
            store,
            time,
            config,
        }
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// See [`load_segment`].
    pub(crate) async fn load(
        &self,
        buffer: &SegmentBuffer,
        target: usize,
    ) -> Result<AllocRecord, StoreError> {
        load_segment(&self.store, &self.time, &self.config, buffer, target).await
    }
}

/// Computes the step of the next reservation.
///
/// `elapsed` is the time since the previous refill of the buffer. The result
/// never exceeds `max_step` (unless `step` already did) and never drops below
/// `min_step`.
pub(crate) fn next_step(
    step: i32,
    min_step: i32,
    elapsed: Duration,
    segment_duration: Duration,
    max_step: i32,
) -> i32 {
    if elapsed < segment_duration {
        step.saturating_mul(2).min(max_step.max(step))
    } else if elapsed < segment_duration.saturating_mul(2) {
        step
    } else if step / 2 >= min_step {
        step / 2
    } else {
        step
    }
}

/// Loads the segment at `target` of `buffer` from the store.
///
/// On success the segment serves `[record.max_id - step, record.max_id)` and
/// the buffer's tuning reflects the reservation. Nothing is modified on error.
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip_all, fields(tag = buffer.tag(), segment = target))
)]
pub(crate) async fn load_segment<S, T>(
    store: &S,
    time: &T,
    config: &AllocatorConfig,
    buffer: &SegmentBuffer,
    target: usize,
) -> Result<AllocRecord, StoreError>
where
    S: AllocStore,
    T: TimeSource,
{
    let tag = buffer.tag();
    let tuning = buffer.tuning();

    let (record, tuning) = if !buffer.is_initialized() {
        let record = store.reserve_next(tag).await?;
        let tuning = StepTuning {
            step: record.step,
            min_step: record.step,
            last_refill_at: tuning.last_refill_at,
        };
        (record, tuning)
    } else if tuning.last_refill_at == 0 {
        let record = store.reserve_next(tag).await?;
        let tuning = StepTuning {
            step: record.step,
            min_step: record.step,
            last_refill_at: time.current_millis(),
        };
        (record, tuning)
    } else {
        let elapsed =
            Duration::from_millis(time.current_millis().saturating_sub(tuning.last_refill_at));
        let step = next_step(
            tuning.step,
            tuning.min_step,
            elapsed,
            config.segment_duration,
            config.max_step,
        );

        #[cfg(feature = "tracing")]
        tracing::info!(
            tag,
            step = tuning.step,
            duration = format_args!("{:.2}mins", elapsed.as_secs_f64() / 60.0),
            next_step = step,
            "adapting step"
        );

        let record = store.reserve_custom(tag, step).await?;
        let tuning = StepTuning {
            step,
            min_step: record.step,
            last_refill_at: time.current_millis(),
        };
        (record, tuning)
    };

    buffer.set_tuning(tuning);
    buffer.segment(target).load_range(record.max_id, tuning.step);
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MAX_STEP, MemoryStore, SEGMENT_DURATION};
    use portable_atomic::{AtomicU64, Ordering};

    const MINUTE: Duration = Duration::from_secs(60);

    struct ManualTime(AtomicU64);

    impl TimeSource for ManualTime {
        fn current_millis(&self) -> u64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    impl ManualTime {
        fn advance(&self, by: Duration) {
            self.0.fetch_add(by.as_millis() as u64, Ordering::Relaxed);
        }
    }

    fn step_after(step: i32, min_step: i32, elapsed: Duration) -> i32 {
        next_step(step, min_step, elapsed, SEGMENT_DURATION, MAX_STEP)
    }

    #[test]
    fn fast_segments_double_the_step() {
        assert_eq!(step_after(10, 10, MINUTE), 20);
        assert_eq!(step_after(600_000, 10, MINUTE), MAX_STEP);
        assert_eq!(step_after(MAX_STEP, 10, MINUTE), MAX_STEP);
    }

    #[test]
    fn steady_segments_keep_the_step() {
        assert_eq!(step_after(40, 10, 15 * MINUTE), 40);
        assert_eq!(step_after(40, 10, 29 * MINUTE), 40);
    }

    #[test]
    fn slow_segments_halve_down_to_min_step() {
        assert_eq!(step_after(40, 10, 30 * MINUTE), 20);
        assert_eq!(step_after(20, 10, 60 * MINUTE), 10);
        assert_eq!(step_after(10, 10, 60 * MINUTE), 10);
        assert_eq!(step_after(15, 10, 60 * MINUTE), 15);
    }

    #[test]
    fn doubling_never_overflows() {
        assert_eq!(step_after(i32::MAX, 1, MINUTE), i32::MAX);
    }

    #[tokio::test]
    async fn walks_through_first_stale_and_adaptive_loads() {
        let store = MemoryStore::new();
        store.insert("order", 100, 10);
        let time = ManualTime(AtomicU64::new(1_000));
        let config = AllocatorConfig::default();
        let buffer = SegmentBuffer::new("order");

        // First load: store step adopted, no timestamp.
        buffer
            .initialize_with(|| async {
                load_segment(&store, &time, &config, &buffer, 0).await.map(|_| ())
            })
            .await
            .unwrap();
        assert_eq!(buffer.tuning(), StepTuning {
            step: 10,
            min_step: 10,
            last_refill_at: 0,
        });
        assert_eq!(buffer.segment(0).try_take(), Some(100));

        // Stale timestamp: same reservation, timestamp recorded.
        let record = load_segment(&store, &time, &config, &buffer, 1).await.unwrap();
        assert_eq!(record.max_id, 120);
        assert_eq!(buffer.tuning().last_refill_at, 1_000);
        assert_eq!(buffer.segment(1).try_take(), Some(110));

        // Adaptive: a fast segment doubles the step.
        time.advance(MINUTE);
        let record = load_segment(&store, &time, &config, &buffer, 0).await.unwrap();
        assert_eq!(record.max_id, 140);
        assert_eq!(buffer.tuning().step, 20);
        assert_eq!(buffer.tuning().min_step, 10);
        assert_eq!(buffer.segment(0).snapshot().cursor, 120);

        // Adaptive: a slow segment halves it back.
        time.advance(45 * MINUTE);
        let record = load_segment(&store, &time, &config, &buffer, 1).await.unwrap();
        assert_eq!(record.max_id, 150);
        assert_eq!(buffer.tuning().step, 10);
        assert_eq!(buffer.segment(1).snapshot().cursor, 140);
    }

    #[tokio::test]
    async fn store_errors_leave_the_buffer_untouched() {
        let store = MemoryStore::new();
        let time = ManualTime(AtomicU64::new(1_000));
        let config = AllocatorConfig::default();
        let buffer = SegmentBuffer::new("ghost");

        let err = load_segment(&store, &time, &config, &buffer, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownTag { .. }));
        assert_eq!(buffer.tuning(), StepTuning::default());
        assert_eq!(buffer.segment(0).snapshot().max, 0);
    }
}
