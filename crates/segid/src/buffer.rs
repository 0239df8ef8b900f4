use crate::{
    StoreError,
    segment::{Segment, SegmentSnapshot},
};
use core::{future::Future, pin::pin, time::Duration};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use portable_atomic::{AtomicBool, Ordering};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, OnceCell};

/// Which segment is serving and whether the other one is loaded.
///
/// Lives inside the buffer's reader-writer lock: consumers hold the shared
/// side while taking ids, the segment switch and the `next_ready` publication
/// take the exclusive side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SwitchState {
    pub(crate) active: usize,
    pub(crate) next_ready: bool,
}

impl SwitchState {
    #[inline]
    pub(crate) const fn standby(&self) -> usize {
        1 - self.active
    }

    /// Makes the standby segment active and clears `next_ready`.
    pub(crate) fn switch(&mut self) {
        debug_assert!(self.next_ready);
        self.active = self.standby();
        self.next_ready = false;
    }
}

/// Adaptive step parameters. Only the loader touches these, and at most one
/// load per buffer runs at a time (first load behind the init guard, refills
/// behind the refill flag).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct StepTuning {
    pub(crate) step: i32,
    pub(crate) min_step: i32,
    /// `0` until the first refill after initialization.
    pub(crate) last_refill_at: u64,
}

/// The double buffer for one tag: two segments, the switch state, the refill
/// flag and the adaptive step parameters.
#[derive(Debug)]
pub(crate) struct SegmentBuffer {
    tag: String,
    segments: [Segment; 2],
    state: RwLock<SwitchState>,
    refilling: AtomicBool,
    refill_done: Notify,
    init: OnceCell<()>,
    tuning: Mutex<StepTuning>,
}

impl SegmentBuffer {
    /// Creates an uninitialized buffer with two empty segments.
    pub(crate) fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            segments: [Segment::new(), Segment::new()],
            state: RwLock::new(SwitchState::default()),
            refilling: AtomicBool::new(false),
            refill_done: Notify::new(),
            init: OnceCell::new(),
            tuning: Mutex::new(StepTuning::default()),
        }
    }

    #[inline]
    pub(crate) fn tag(&self) -> &str {
        &self.tag
    }

    #[inline]
    pub(crate) fn segment(&self, index: usize) -> &Segment {
        &self.segments[index]
    }

    #[inline]
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, SwitchState> {
        self.state.read()
    }

    #[inline]
    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, SwitchState> {
        self.state.write()
    }

    #[inline]
    pub(crate) fn is_initialized(&self) -> bool {
        self.init.initialized()
    }

    /// Runs `load` as the buffer's first load unless it already succeeded.
    ///
    /// Concurrent callers wait for the one running load; on error the guard
    /// stays unset and the next caller tries again.
    pub(crate) async fn initialize_with<F, Fut>(&self, load: F) -> Result<(), StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        self.init.get_or_try_init(load).await.map(|_| ())
    }

    pub(crate) fn tuning(&self) -> StepTuning {
        *self.tuning.lock()
    }

    pub(crate) fn set_tuning(&self, tuning: StepTuning) {
        *self.tuning.lock() = tuning;
    }

    #[inline]
    pub(crate) fn is_refilling(&self) -> bool {
        self.refilling.load(Ordering::Acquire)
    }

    /// Claims the single refill slot of this buffer.
    #[inline]
    pub(crate) fn try_begin_refill(&self) -> bool {
        self.refilling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the refill slot, publishing the standby segment first when
    /// `loaded`. Wakes every task parked in [`Self::wait_for_refill`].
    pub(crate) fn finish_refill(&self, loaded: bool) {
        if loaded {
            let mut state = self.write();
            state.next_ready = true;
            self.refilling.store(false, Ordering::Release);
        } else {
            self.refilling.store(false, Ordering::Release);
        }
        self.refill_done.notify_waiters();
    }

    /// Waits until the in-flight refill finishes or `bound` elapses,
    /// whichever comes first. Returns immediately if no refill is running.
    pub(crate) async fn wait_for_refill(&self, bound: Duration) {
        let mut notified = pin!(self.refill_done.notified());
        // Register before checking the flag so a completion in between is
        // not lost.
        notified.as_mut().enable();
        if !self.is_refilling() {
            return;
        }
        let _ = tokio::time::timeout(bound, notified).await;
    }

    pub(crate) fn snapshot(&self) -> BufferSnapshot {
        let state = *self.read();
        let tuning = self.tuning();
        BufferSnapshot {
            tag: self.tag.clone(),
            initialized: self.is_initialized(),
            active_index: state.active,
            next_ready: state.next_ready,
            refill_in_flight: self.is_refilling(),
            step: tuning.step,
            min_step: tuning.min_step,
            last_refill_at: tuning.last_refill_at,
            segments: [self.segments[0].snapshot(), self.segments[1].snapshot()],
        }
    }
}

/// Point-in-time view of one tag's buffer, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferSnapshot {
    pub tag: String,
    pub initialized: bool,
    pub active_index: usize,
    pub next_ready: bool,
    pub refill_in_flight: bool,
    pub step: i32,
    pub min_step: i32,
    pub last_refill_at: u64,
    pub segments: [SegmentSnapshot; 2],
}
