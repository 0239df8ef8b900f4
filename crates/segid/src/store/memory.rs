use super::advance_record;
use crate::{AllocRecord, AllocStore, StoreError, SystemClock, TimeSource};
use parking_lot::Mutex;
use std::collections::HashMap;

/// An in-process [`AllocStore`] backed by a map behind a single mutex.
///
/// Every operation runs inside one critical section, which gives the same
/// guarantee a relational store provides with an `UPDATE ... ; SELECT ...`
/// transaction: concurrent reservations for a tag never overlap.
///
/// Nothing is persisted, so ranges restart from the seeded rows when the
/// process restarts and ids already handed out are issued again. Use
/// [`FileStore`](crate::FileStore) when ids must survive a restart.
///
/// # Example
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use segid::{AllocStore, MemoryStore};
///
/// let store = MemoryStore::new();
/// store.insert("order", 100, 10);
///
/// let record = store.reserve_next("order").await.unwrap();
/// assert_eq!(record.max_id, 110);
/// assert_eq!(record.step, 10);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore<T = SystemClock> {
    rows: Mutex<HashMap<String, AllocRecord>>,
    time: T,
}

impl MemoryStore {
    /// Creates an empty store stamped by the system clock.
    pub fn new() -> Self {
        Self::with_time(SystemClock)
    }

    /// Creates a store pre-populated with `records`.
    ///
    /// Later records win when tags repeat.
    pub fn from_records(records: impl IntoIterator<Item = AllocRecord>) -> Self {
        let store = Self::new();
        {
            let mut rows = store.rows.lock();
            for record in records {
                rows.insert(record.tag.clone(), record);
            }
        }
        store
    }
}

impl<T: TimeSource> MemoryStore<T> {
    /// Creates an empty store stamped by the given time source.
    pub fn with_time(time: T) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            time,
        }
    }

    /// Inserts or replaces the row for `tag`.
    pub fn insert(&self, tag: impl Into<String>, max_id: i64, step: i32) {
        let tag = tag.into();
        let record = AllocRecord {
            tag: tag.clone(),
            max_id,
            step,
            updated_at: self.time.current_millis(),
        };
        self.rows.lock().insert(tag, record);
    }

    /// Removes the row for `tag`, returning it if present.
    pub fn remove(&self, tag: &str) -> Option<AllocRecord> {
        self.rows.lock().remove(tag)
    }

    /// Changes the configured step for `tag`. Returns `false` if the tag is
    /// unknown.
    pub fn set_step(&self, tag: &str, step: i32) -> bool {
        let mut rows = self.rows.lock();
        match rows.get_mut(tag) {
            Some(record) => {
                record.step = step;
                record.updated_at = self.time.current_millis();
                true
            }
            None => false,
        }
    }

    /// Returns a copy of the row for `tag`.
    pub fn get(&self, tag: &str) -> Option<AllocRecord> {
        self.rows.lock().get(tag).cloned()
    }

    fn advance(&self, tag: &str, step: Option<i32>) -> Result<AllocRecord, StoreError> {
        let mut rows = self.rows.lock();
        let record = rows.get_mut(tag).ok_or_else(|| StoreError::UnknownTag {
            tag: tag.to_owned(),
        })?;
        advance_record(record, step, self.time.current_millis())?;
        Ok(record.clone())
    }
}

impl<T> AllocStore for MemoryStore<T>
where
    T: TimeSource + Send + Sync + 'static,
{
    async fn reserve_next(&self, tag: &str) -> Result<AllocRecord, StoreError> {
        self.advance(tag, None)
    }

    async fn reserve_custom(&self, tag: &str, step: i32) -> Result<AllocRecord, StoreError> {
        self.advance(tag, Some(step))
    }

    async fn list_tags(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.rows.lock().keys().cloned().collect())
    }

    async fn list_allocations(&self) -> Result<Vec<AllocRecord>, StoreError> {
        let mut records: Vec<_> = self.rows.lock().values().cloned().collect();
        records.sort_by(|a, b| a.tag.cmp(&b.tag));
        Ok(records)
    }
}
