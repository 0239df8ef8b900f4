use core::{num::NonZeroUsize, time::Duration};

/// How long a segment is expected to last. Refills arriving sooner double the
/// step, refills arriving after twice this long halve it.
pub const SEGMENT_DURATION: Duration = Duration::from_secs(15 * 60);

/// Upper bound for the adaptive step.
pub const MAX_STEP: i32 = 1_000_000;

/// Period of the background cache reconciliation.
pub const RECONCILE_PERIOD: Duration = Duration::from_secs(60);

/// Tuning knobs for a [`SegmentAllocator`](crate::SegmentAllocator).
///
/// The defaults reproduce the classic segment allocator behaviour: 15 minute
/// segments, steps capped at one million, reconciliation every minute and a
/// 10ms bound on waiting for an in-flight refill.
///
/// # Example
///
/// ```
/// use core::{num::NonZeroUsize, time::Duration};
/// use segid::AllocatorConfig;
///
/// let config = AllocatorConfig::default()
///     .with_reconcile_period(Duration::from_secs(10))
///     .with_refill_workers(NonZeroUsize::new(8).unwrap());
/// assert_eq!(config.refill_workers.get(), 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// See [`SEGMENT_DURATION`].
    pub segment_duration: Duration,
    /// See [`MAX_STEP`].
    pub max_step: i32,
    /// See [`RECONCILE_PERIOD`].
    pub reconcile_period: Duration,
    /// Number of worker tasks loading standby segments. Each worker handles
    /// one refill at a time, so a hung store call stalls a single worker.
    pub refill_workers: NonZeroUsize,
    /// Longest time a request parks waiting for an in-flight refill before
    /// re-checking the buffer.
    pub refill_wait: Duration,
    /// How many times a request whose segments are drained goes back to the
    /// fast path before reporting exhaustion.
    pub exhausted_retries: usize,
    /// How many first-load attempts a single request makes before reporting
    /// an init failure.
    pub init_attempts: NonZeroUsize,
    /// Grace period for background tasks during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            segment_duration: SEGMENT_DURATION,
            max_step: MAX_STEP,
            reconcile_period: RECONCILE_PERIOD,
            refill_workers: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
            refill_wait: Duration::from_millis(10),
            exhausted_retries: 3,
            init_attempts: NonZeroUsize::MIN,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

impl AllocatorConfig {
    pub fn with_segment_duration(mut self, segment_duration: Duration) -> Self {
        self.segment_duration = segment_duration;
        self
    }

    pub fn with_max_step(mut self, max_step: i32) -> Self {
        self.max_step = max_step;
        self
    }

    pub fn with_reconcile_period(mut self, reconcile_period: Duration) -> Self {
        self.reconcile_period = reconcile_period;
        self
    }

    pub fn with_refill_workers(mut self, refill_workers: NonZeroUsize) -> Self {
        self.refill_workers = refill_workers;
        self
    }

    pub fn with_refill_wait(mut self, refill_wait: Duration) -> Self {
        self.refill_wait = refill_wait;
        self
    }

    pub fn with_exhausted_retries(mut self, exhausted_retries: usize) -> Self {
        self.exhausted_retries = exhausted_retries;
        self
    }

    pub fn with_init_attempts(mut self, init_attempts: NonZeroUsize) -> Self {
        self.init_attempts = init_attempts;
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }
}
