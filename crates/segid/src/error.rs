use core::time::Duration;

/// A result type defaulting to the crate's lifecycle [`Error`].
///
/// Allocation itself never fails across the public boundary (see
/// [`IdResult`](crate::IdResult)); this alias covers the handful of lifecycle
/// and administration calls that can.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors surfaced by an [`AllocStore`](crate::AllocStore).
///
/// The allocator never lets these cross into caller code: a failed first load
/// leaves the buffer uninitialized and a failed refill leaves the standby
/// segment not ready. They are only returned directly by the diagnostics
/// passthroughs such as [`SegmentAllocator::allocations`].
///
/// [`SegmentAllocator::allocations`]: crate::SegmentAllocator::allocations
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store has no allocation row for the tag.
    #[error("unknown tag `{tag}`")]
    UnknownTag { tag: String },

    /// The store could not be reached, or the transaction was rolled back.
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    /// A custom reservation was requested with a non-positive step.
    #[error("invalid step {step} for tag `{tag}`")]
    InvalidStep { tag: String, step: i32 },

    /// Advancing `max_id` would overflow the id space.
    #[error("id space exhausted for tag `{tag}`")]
    Overflow { tag: String },
}

impl StoreError {
    /// Convenience constructor for connectivity and transaction failures.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }
}

/// Lifecycle errors of a [`SegmentAllocator`](crate::SegmentAllocator).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// [`initialize`](crate::SegmentAllocator::initialize) was called on an
    /// allocator that is already serving requests.
    #[error("allocator already initialized")]
    AlreadyInitialized,

    /// The allocator has been shut down and cannot be restarted.
    #[error("allocator is shut down")]
    Shutdown,

    /// Background tasks did not acknowledge shutdown in time.
    #[error("shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// A store call made on behalf of an administrative operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
