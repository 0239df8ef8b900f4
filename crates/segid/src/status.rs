use core::fmt;
use serde::{Deserialize, Serialize};

/// Sentinel id returned while the allocator has not finished initializing.
pub const CACHE_NOT_INITIALIZED_ID: i64 = -1;

/// Sentinel id returned for a tag the store does not know about.
pub const KEY_NOT_FOUND_ID: i64 = -2;

/// Sentinel id returned when neither segment of a buffer can serve an id.
pub const BOTH_SEGMENTS_EXHAUSTED_ID: i64 = -3;

/// Sentinel id returned when the first load of a buffer keeps failing.
pub const BUFFER_INIT_FAILED_ID: i64 = -4;

/// Why an allocation request did not produce an id.
///
/// Each kind maps to a stable, negative sentinel id (see
/// [`ExceptionKind::sentinel`]) that is preserved verbatim on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionKind {
    /// The allocator is not ready: `initialize` has not completed (or failed),
    /// or the allocator was shut down. Retry later.
    CacheNotInitialized,
    /// The tag is not configured in the store. Permanent until the store and
    /// the cache are updated.
    KeyNotFound,
    /// The active segment is drained and no standby segment is ready.
    /// Recoverable once a refill reaches the store.
    BothSegmentsExhausted,
    /// The first load of the tag's buffer did not succeed.
    BufferInitFailed,
}

impl ExceptionKind {
    /// Returns the sentinel id reported alongside this exception.
    pub const fn sentinel(self) -> i64 {
        match self {
            Self::CacheNotInitialized => CACHE_NOT_INITIALIZED_ID,
            Self::KeyNotFound => KEY_NOT_FOUND_ID,
            Self::BothSegmentsExhausted => BOTH_SEGMENTS_EXHAUSTED_ID,
            Self::BufferInitFailed => BUFFER_INIT_FAILED_ID,
        }
    }

    /// Returns the upper snake case name of the exception.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CacheNotInitialized => "CACHE_NOT_INITIALIZED",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::BothSegmentsExhausted => "BOTH_SEGMENTS_EXHAUSTED",
            Self::BufferInitFailed => "BUFFER_INIT_FAILED",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    /// The accompanying id is valid.
    Success,
    /// The accompanying id is the sentinel for the given kind.
    Exception(ExceptionKind),
}

/// Represents the result of asking a [`SegmentAllocator`] for the next id of a
/// tag.
///
/// Every request yields one of these; the allocator never panics or returns an
/// error across its public boundary.
///
/// - [`Status::Success`]: `id` is the next id in the tag's sequence.
/// - [`Status::Exception`]: `id` is the stable negative sentinel of the
///   exception kind.
///
/// # Example
///
/// ```
/// use segid::{ExceptionKind, IdResult};
///
/// let ok = IdResult::success(100);
/// assert_eq!(ok.into_result(), Ok(100));
///
/// let missing = IdResult::exception(ExceptionKind::KeyNotFound);
/// assert_eq!(missing.id, -2);
/// assert_eq!(missing.into_result(), Err(ExceptionKind::KeyNotFound));
/// ```
///
/// [`SegmentAllocator`]: crate::SegmentAllocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdResult {
    pub id: i64,
    pub status: Status,
}

impl IdResult {
    /// A successful allocation of `id`.
    pub const fn success(id: i64) -> Self {
        Self {
            id,
            status: Status::Success,
        }
    }

    /// A failed allocation carrying the sentinel id of `kind`.
    pub const fn exception(kind: ExceptionKind) -> Self {
        Self {
            id: kind.sentinel(),
            status: Status::Exception(kind),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.status, Status::Success)
    }

    /// Returns the exception kind, if any.
    pub const fn exception_kind(&self) -> Option<ExceptionKind> {
        match self.status {
            Status::Success => None,
            Status::Exception(kind) => Some(kind),
        }
    }

    /// Converts into a standard [`Result`], dropping the sentinel id.
    pub const fn into_result(self) -> Result<i64, ExceptionKind> {
        match self.status {
            Status::Success => Ok(self.id),
            Status::Exception(kind) => Err(kind),
        }
    }
}
