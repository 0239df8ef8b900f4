//! Background workers loading standby segments.
//!
//! Refill requests go through one unbounded channel shared by all workers.
//! The queue cannot grow past one entry per tag: a request is only sent after
//! the buffer's refill flag was claimed, and the flag stays set until the
//! worker publishes the result.
//!
//! Shutdown cancels the shared [`CancellationToken`], waits a bounded time
//! for every worker, then drains whatever is left in the queue and releases
//! those buffers' refill flags so nobody keeps waiting on them.

use crate::{
    AllocStore, Error, Result, TimeSource, buffer::SegmentBuffer, loader::SegmentLoader,
};
use core::{num::NonZeroUsize, time::Duration};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::{
    sync::{Mutex as AsyncMutex, mpsc},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// Ask a worker to load the standby segment of `buffer`.
#[derive(Debug)]
pub(crate) struct RefillRequest {
    pub(crate) buffer: Arc<SegmentBuffer>,
}

type SharedReceiver = Arc<AsyncMutex<mpsc::UnboundedReceiver<RefillRequest>>>;

#[derive(Debug)]
pub(crate) struct RefillPool {
    tx: mpsc::UnboundedSender<RefillRequest>,
    rx: SharedReceiver,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
}

impl RefillPool {
    /// Spawns `workers` tasks on the current tokio runtime.
    pub(crate) fn spawn<S, T>(
        loader: Arc<SegmentLoader<S, T>>,
        workers: NonZeroUsize,
        shutdown_token: CancellationToken,
    ) -> Self
    where
        S: AllocStore,
        T: TimeSource + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx: SharedReceiver = Arc::new(AsyncMutex::new(rx));

        let handles = (0..workers.get())
            .map(|worker_id| {
                tokio::spawn(worker_loop(
                    worker_id,
                    Arc::clone(&rx),
                    Arc::clone(&loader),
                    shutdown_token.clone(),
                ))
            })
            .collect();

        Self {
            tx,
            rx,
            handles: Mutex::new(handles),
            shutdown_token,
        }
    }

    /// Enqueues a refill without waiting.
    ///
    /// The caller must own the buffer's refill flag. On error the request was
    /// not queued and the caller is responsible for releasing the flag.
    pub(crate) fn submit(&self, buffer: Arc<SegmentBuffer>) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::Shutdown);
        }
        self.tx
            .send(RefillRequest { buffer })
            .map_err(|_| Error::Shutdown)
    }

    /// Stops every worker, waiting at most `grace` for each.
    ///
    /// # Errors
    ///
    /// [`Error::ShutdownTimeout`] if at least one worker had to be aborted.
    pub(crate) async fn shutdown(&self, grace: Duration) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Cancelling refill workers");
        self.shutdown_token.cancel();

        let handles = core::mem::take(&mut *self.handles.lock());
        let waits = handles.into_iter().enumerate().map(|(_i, mut handle)| async move {
            match timeout(grace, &mut handle).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Refill worker {_i} stopped");
                    true
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Refill worker {_i} failed: {_e}");
                    true
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Refill worker {_i} shutdown timed out, aborting");
                    handle.abort();
                    false
                }
            }
        });
        let all_stopped = futures::future::join_all(waits)
            .await
            .into_iter()
            .all(|stopped| stopped);

        let mut rx = self.rx.lock().await;
        rx.close();
        while let Ok(request) = rx.try_recv() {
            request.buffer.finish_refill(false);
        }

        if all_stopped {
            #[cfg(feature = "tracing")]
            tracing::debug!("Refill pool shutdown complete");
            Ok(())
        } else {
            Err(Error::ShutdownTimeout(grace))
        }
    }
}

/// Worker task pulling [`RefillRequest`]s until cancelled or the channel
/// closes.
async fn worker_loop<S, T>(
    _worker_id: usize,
    rx: SharedReceiver,
    loader: Arc<SegmentLoader<S, T>>,
    shutdown_token: CancellationToken,
) where
    S: AllocStore,
    T: TimeSource + Send + Sync + 'static,
{
    #[cfg(feature = "tracing")]
    tracing::trace!("Refill worker {_worker_id} started");

    loop {
        let request = tokio::select! {
            biased;
            () = shutdown_token.cancelled() => break,
            request = async { rx.lock().await.recv().await } => match request {
                Some(request) => request,
                None => break,
            },
        };
        refill(&loader, &request.buffer).await;
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Refill worker {_worker_id} stopped");
}

/// Loads the standby segment and publishes the outcome.
///
/// The active index cannot move while the refill flag is held and
/// `next_ready` is false, so reading it once up front is enough.
async fn refill<S, T>(loader: &SegmentLoader<S, T>, buffer: &SegmentBuffer)
where
    S: AllocStore,
    T: TimeSource,
{
    let target = buffer.read().standby();
    match loader.load(buffer, target).await {
        Ok(_record) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                tag = buffer.tag(),
                target,
                max_id = _record.max_id,
                "standby segment loaded"
            );
            buffer.finish_refill(true);
        }
        Err(_e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(tag = buffer.tag(), "standby refill failed: {_e}");
            buffer.finish_refill(false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AllocatorConfig, MemoryStore, SystemClock};

    fn loader(store: MemoryStore) -> Arc<SegmentLoader<MemoryStore, SystemClock>> {
        Arc::new(SegmentLoader::new(
            store,
            SystemClock,
            AllocatorConfig::default(),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn worker_loads_standby_and_publishes() {
        let store = MemoryStore::new();
        store.insert("order", 100, 10);
        let pool = RefillPool::spawn(loader(store), NonZeroUsize::MIN, CancellationToken::new());

        let buffer = Arc::new(SegmentBuffer::new("order"));
        assert!(buffer.try_begin_refill());
        pool.submit(Arc::clone(&buffer)).unwrap();

        timeout(Duration::from_secs(5), async {
            while buffer.is_refilling() {
                buffer.wait_for_refill(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();

        assert!(buffer.read().next_ready);
        assert_eq!(buffer.segment(1).snapshot().max, 110);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_refill_only_clears_flag() {
        let pool = RefillPool::spawn(
            loader(MemoryStore::new()),
            NonZeroUsize::MIN,
            CancellationToken::new(),
        );

        let buffer = Arc::new(SegmentBuffer::new("ghost"));
        assert!(buffer.try_begin_refill());
        pool.submit(Arc::clone(&buffer)).unwrap();

        timeout(Duration::from_secs(5), async {
            while buffer.is_refilling() {
                buffer.wait_for_refill(Duration::from_millis(50)).await;
            }
        })
        .await
        .unwrap();

        assert!(!buffer.read().next_ready);
        pool.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_rejected() {
        let pool = RefillPool::spawn(
            loader(MemoryStore::new()),
            NonZeroUsize::MIN,
            CancellationToken::new(),
        );
        pool.shutdown(Duration::from_secs(1)).await.unwrap();

        let buffer = Arc::new(SegmentBuffer::new("order"));
        assert_eq!(pool.submit(buffer), Err(Error::Shutdown));
    }
}
