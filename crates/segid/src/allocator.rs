use crate::{
    AllocRecord, AllocStore, AllocatorConfig, BufferSnapshot, Error, ExceptionKind, IdResult,
    ReconcileReport, Result, StoreError, SystemClock, TimeSource,
    buffer::SegmentBuffer,
    cache::SegmentCache,
    loader::SegmentLoader,
    pool::RefillPool,
};
use parking_lot::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::{
    sync::Mutex as AsyncMutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};
use tokio_util::sync::CancellationToken;

/// Hands out strictly increasing ids per tag from double-buffered segments.
///
/// Each tag known to the store owns a buffer of two segments. Requests are
/// served from the active segment with a single atomic increment; once the
/// active segment is 10% consumed a background worker reserves the next
/// range into the standby segment, and the first request to find the active
/// segment drained switches over.
///
/// The allocator is cheap to clone; clones share the same cache, workers and
/// store.
///
/// # Lifecycle
///
/// 1. [`initialize`](Self::initialize) loads the tag set, starts the refill
///    workers and the periodic reconciliation. Until then every request
///    reports [`ExceptionKind::CacheNotInitialized`].
/// 2. [`next_id`](Self::next_id) is served.
/// 3. [`shutdown`](Self::shutdown) stops the background tasks. Requests go
///    back to [`ExceptionKind::CacheNotInitialized`] for good.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use segid::{MemoryStore, SegmentAllocator};
///
/// let store = MemoryStore::new();
/// store.insert("order", 100, 10);
///
/// let allocator = SegmentAllocator::new(store);
/// assert!(allocator.initialize().await);
///
/// assert_eq!(allocator.next_id("order").await.id, 100);
/// assert_eq!(allocator.next_id("order").await.id, 101);
/// assert_eq!(allocator.next_id("unknown").await.id, segid::KEY_NOT_FOUND_ID);
///
/// allocator.shutdown().await.unwrap();
/// # }
/// ```
pub struct SegmentAllocator<S, T = SystemClock> {
    inner: Arc<Inner<S, T>>,
}

struct Inner<S, T> {
    loader: Arc<SegmentLoader<S, T>>,
    cache: SegmentCache,
    ready: AtomicBool,
    pool: OnceLock<RefillPool>,
    reconciler: Mutex<Option<JoinHandle<()>>>,
    lifecycle: AsyncMutex<()>,
    shutdown_token: CancellationToken,
}

impl<S, T> Clone for SegmentAllocator<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, T> core::fmt::Debug for SegmentAllocator<S, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SegmentAllocator")
            .field("ready", &self.inner.ready.load(Ordering::Relaxed))
            .field("tags", &self.inner.cache.len())
            .finish_non_exhaustive()
    }
}

impl<S: AllocStore> SegmentAllocator<S> {
    /// Creates an allocator with the default configuration and the system
    /// clock.
    pub fn new(store: S) -> Self {
        Self::with_config(store, AllocatorConfig::default())
    }

    pub fn with_config(store: S, config: AllocatorConfig) -> Self {
        Self::with_time(store, SystemClock, config)
    }
}

impl<S, T> SegmentAllocator<S, T>
where
    S: AllocStore,
    T: TimeSource + Send + Sync + 'static,
{
    /// Creates an allocator driven by a custom [`TimeSource`].
    ///
    /// Pass an `Arc` of the store to keep a handle of your own; `Arc<S>` is
    /// an [`AllocStore`] too.
    pub fn with_time(store: S, time: T, config: AllocatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                loader: Arc::new(SegmentLoader::new(store, time, config)),
                cache: SegmentCache::new(),
                ready: AtomicBool::new(false),
                pool: OnceLock::new(),
                reconciler: Mutex::new(None),
                lifecycle: AsyncMutex::new(()),
                shutdown_token: CancellationToken::new(),
            }),
        }
    }

    pub fn store(&self) -> &S {
        self.inner.loader.store()
    }

    pub fn config(&self) -> &AllocatorConfig {
        self.inner.loader.config()
    }

    /// Returns `true` between a successful initialization and shutdown.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// Runs the initial reconciliation and starts the background tasks.
    ///
    /// Returns `true` once the allocator is serving, including when it
    /// already was. On `false` the cause has been logged and every request
    /// keeps reporting [`ExceptionKind::CacheNotInitialized`]; the call may
    /// be retried.
    pub async fn initialize(&self) -> bool {
        match self.try_initialize().await {
            Ok(()) | Err(Error::AlreadyInitialized) => true,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Allocator initialization failed: {_e}");
                false
            }
        }
    }

    /// Like [`initialize`](Self::initialize), but reports why it failed.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyInitialized`] if the allocator is already serving.
    /// - [`Error::Shutdown`] after [`shutdown`](Self::shutdown).
    /// - [`Error::Store`] if the tag listing failed.
    pub async fn try_initialize(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.shutdown_token.is_cancelled() {
            return Err(Error::Shutdown);
        }
        if self.is_ready() {
            return Err(Error::AlreadyInitialized);
        }

        let _report = self.inner.cache.reconcile(self.store()).await?;
        #[cfg(feature = "tracing")]
        tracing::info!(
            tags = self.inner.cache.len(),
            inserted = _report.inserted.len(),
            "Segment cache initialized"
        );

        let config = self.config();
        self.inner.pool.get_or_init(|| {
            RefillPool::spawn(
                Arc::clone(&self.inner.loader),
                config.refill_workers,
                self.inner.shutdown_token.child_token(),
            )
        });
        let reconciler = spawn_reconciler(&self.inner);
        *self.inner.reconciler.lock() = Some(reconciler);

        self.inner.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Returns the next id for `tag`.
    ///
    /// Never fails across this boundary: problems are reported through the
    /// returned [`IdResult`] with one of the negative sentinel ids.
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "trace", skip(self)))]
    pub async fn next_id(&self, tag: &str) -> IdResult {
        if !self.is_ready() {
            return IdResult::exception(ExceptionKind::CacheNotInitialized);
        }
        let Some(buffer) = self.inner.cache.lookup(tag) else {
            return IdResult::exception(ExceptionKind::KeyNotFound);
        };
        if !buffer.is_initialized() && !self.initialize_buffer(&buffer).await {
            return IdResult::exception(ExceptionKind::BufferInitFailed);
        }
        self.consume(&buffer).await
    }

    /// First load of `buffer`, at most `init_attempts` times.
    ///
    /// Concurrent callers queue behind the one running load and only run
    /// their own attempt if it failed.
    async fn initialize_buffer(&self, buffer: &SegmentBuffer) -> bool {
        let loader = &self.inner.loader;
        for _attempt in 1..=self.config().init_attempts.get() {
            let result = buffer
                .initialize_with(|| async {
                    let active = buffer.read().active;
                    loader.load(buffer, active).await.map(|_record| {
                        #[cfg(feature = "tracing")]
                        tracing::info!(
                            tag = buffer.tag(),
                            max_id = _record.max_id,
                            step = _record.step,
                            "Buffer initialized"
                        );
                    })
                })
                .await;
            match result {
                Ok(()) => return true,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        tag = buffer.tag(),
                        attempt = _attempt,
                        "Buffer initialization failed: {_e}"
                    );
                }
            }
        }
        buffer.is_initialized()
    }

    /// Serves one id from an initialized buffer, switching segments when the
    /// active one runs dry.
    async fn consume(&self, buffer: &Arc<SegmentBuffer>) -> IdResult {
        let config = self.config();
        let mut retries = 0;

        loop {
            {
                let state = buffer.read();
                let segment = buffer.segment(state.active);
                if !state.next_ready
                    && segment.below_refill_threshold()
                    && buffer.try_begin_refill()
                {
                    self.schedule_refill(buffer);
                }
                if let Some(id) = segment.try_take() {
                    return IdResult::success(id);
                }
            }

            buffer.wait_for_refill(config.refill_wait).await;

            let next_ready = buffer.read().next_ready;
            if !next_ready {
                retries += 1;
                if retries > config.exhausted_retries {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(tag = buffer.tag(), "Both segments exhausted");
                    return IdResult::exception(ExceptionKind::BothSegmentsExhausted);
                }
                continue;
            }

            {
                let mut state = buffer.write();
                if let Some(id) = buffer.segment(state.active).try_take() {
                    return IdResult::success(id);
                }
                if !state.next_ready {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(tag = buffer.tag(), "Both segments exhausted");
                    return IdResult::exception(ExceptionKind::BothSegmentsExhausted);
                }
                state.switch();
            }
        }
    }

    /// Hands the claimed refill slot to the worker pool, releasing it again
    /// if the pool no longer accepts work.
    fn schedule_refill(&self, buffer: &Arc<SegmentBuffer>) {
        let submitted = match self.inner.pool.get() {
            Some(pool) => pool.submit(Arc::clone(buffer)),
            None => Err(Error::Shutdown),
        };
        if let Err(_e) = submitted {
            #[cfg(feature = "tracing")]
            tracing::debug!(tag = buffer.tag(), "Refill not scheduled: {_e}");
            buffer.finish_refill(false);
        }
    }

    /// Stops reconciliation and the refill workers.
    ///
    /// Requests issued afterwards report
    /// [`ExceptionKind::CacheNotInitialized`]. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// [`Error::ShutdownTimeout`] if a background task did not stop within
    /// [`AllocatorConfig::shutdown_timeout`]. The task is aborted and
    /// shutdown still completes.
    pub async fn shutdown(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        #[cfg(feature = "tracing")]
        tracing::info!("Shutting down segment allocator");

        self.inner.ready.store(false, Ordering::Release);
        self.inner.shutdown_token.cancel();
        let grace = self.config().shutdown_timeout;
        let mut result = Ok(());

        let reconciler = self.inner.reconciler.lock().take();
        if let Some(mut handle) = reconciler {
            if timeout(grace, &mut handle).await.is_err() {
                #[cfg(feature = "tracing")]
                tracing::warn!("Reconciliation task shutdown timed out, aborting");
                handle.abort();
                result = Err(Error::ShutdownTimeout(grace));
            }
        }
        if let Some(pool) = self.inner.pool.get() {
            if let Err(e) = pool.shutdown(grace).await {
                result = Err(e);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Segment allocator shut down");
        result
    }

    /// Runs one reconciliation against the store right away.
    ///
    /// # Errors
    ///
    /// [`Error::Shutdown`] after shutdown, [`Error::Store`] if the tag
    /// listing failed.
    pub async fn reconcile_now(&self) -> Result<ReconcileReport> {
        if self.inner.shutdown_token.is_cancelled() {
            return Err(Error::Shutdown);
        }
        Ok(self.inner.cache.reconcile(self.store()).await?)
    }

    /// Every allocation row in the store, for diagnostics.
    pub async fn allocations(&self) -> Result<Vec<AllocRecord>, StoreError> {
        self.store().list_allocations().await
    }

    /// Snapshots of every cached buffer, sorted by tag.
    pub fn cache_snapshot(&self) -> Vec<BufferSnapshot> {
        self.inner.cache.snapshot()
    }

    /// Tags currently cached, sorted.
    pub fn tags(&self) -> Vec<String> {
        self.inner.cache.tags()
    }
}

/// Spawns the periodic reconciliation. The task only holds a weak reference
/// so dropping every allocator handle stops it at the next tick.
fn spawn_reconciler<S, T>(inner: &Arc<Inner<S, T>>) -> JoinHandle<()>
where
    S: AllocStore,
    T: TimeSource + Send + Sync + 'static,
{
    let weak: Weak<Inner<S, T>> = Arc::downgrade(inner);
    let token = inner.shutdown_token.clone();
    let period = inner.loader.config().reconcile_period;

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = weak.upgrade() else {
                break;
            };
            match inner.cache.reconcile(inner.loader.store()).await {
                #[cfg(feature = "tracing")]
                Ok(report) if !report.is_empty() => {
                    tracing::info!(
                        inserted = ?report.inserted,
                        removed = ?report.removed,
                        "Segment cache reconciled"
                    );
                }
                Ok(_) => {}
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Segment cache reconciliation failed: {_e}");
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Reconciliation task stopped");
    })
}
