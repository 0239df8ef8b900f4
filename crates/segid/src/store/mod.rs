//! The durable counter store the allocator reserves ranges from.
//!
//! The store owns one row per tag: the highest id handed out so far
//! (`max_id`), the configured reservation size (`step`) and a store-managed
//! timestamp. The allocator only ever advances `max_id` through the two
//! reservation calls; everything else is read-only from its point of view.
//!
//! Each reservation must be a single transaction (increment, then read back)
//! so that several allocator processes sharing the store never receive
//! overlapping ranges for the same tag.

mod file;
mod memory;

pub use file::*;
pub use memory::*;

use crate::StoreError;
use core::future::Future;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One allocation row as returned by the store.
///
/// After a reservation, the caller owns the half-open range
/// `[max_id - step, max_id)` where `step` is the amount the reservation
/// advanced by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocRecord {
    pub tag: String,
    pub max_id: i64,
    pub step: i32,
    /// Milliseconds since the UNIX epoch of the last change to the row.
    pub updated_at: u64,
}

/// Advances `record` by `step`, or by its stored step when `None`, and
/// stamps it with `now`. `record` is left untouched on error.
pub(crate) fn advance_record(
    record: &mut AllocRecord,
    step: Option<i32>,
    now: u64,
) -> Result<(), StoreError> {
    let step = step.unwrap_or(record.step);
    if step <= 0 {
        return Err(StoreError::InvalidStep {
            tag: record.tag.clone(),
            step,
        });
    }
    record.max_id = record
        .max_id
        .checked_add(i64::from(step))
        .ok_or_else(|| StoreError::Overflow {
            tag: record.tag.clone(),
        })?;
    record.updated_at = now;
    Ok(())
}

/// Atomic range-reservation operations against durable storage.
///
/// Every call is individually atomic (single round-trip, no partial effect on
/// failure); no ordering is implied between calls for different tags.
pub trait AllocStore: Send + Sync + 'static {
    /// Advances `max_id` for `tag` by the store's configured step and returns
    /// the resulting row.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownTag`] if the tag has no row, or any
    /// connectivity/transaction failure.
    fn reserve_next(&self, tag: &str)
    -> impl Future<Output = Result<AllocRecord, StoreError>> + Send;

    /// Advances `max_id` for `tag` by `step`, independently of the stored
    /// step, and returns the resulting row. The returned `step` is the stored
    /// baseline, not `step`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`AllocStore::reserve_next`], plus
    /// [`StoreError::InvalidStep`] for a non-positive `step`.
    fn reserve_custom(
        &self,
        tag: &str,
        step: i32,
    ) -> impl Future<Output = Result<AllocRecord, StoreError>> + Send;

    /// Returns every tag currently configured in the store.
    fn list_tags(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;

    /// Returns a snapshot of every row. Used for diagnostics only.
    fn list_allocations(&self) -> impl Future<Output = Result<Vec<AllocRecord>, StoreError>> + Send;
}

impl<S: AllocStore> AllocStore for Arc<S> {
    fn reserve_next(&self, tag: &str)
    -> impl Future<Output = Result<AllocRecord, StoreError>> + Send {
        (**self).reserve_next(tag)
    }

    fn reserve_custom(
        &self,
        tag: &str,
        step: i32,
    ) -> impl Future<Output = Result<AllocRecord, StoreError>> + Send {
        (**self).reserve_custom(tag, step)
    }

    fn list_tags(&self) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send {
        (**self).list_tags()
    }

    fn list_allocations(&self) -> impl Future<Output = Result<Vec<AllocRecord>, StoreError>> + Send {
        (**self).list_allocations()
    }
}
