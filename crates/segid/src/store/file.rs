use super::advance_record;
use crate::{AllocRecord, AllocStore, StoreError, SystemClock, TimeSource};
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

/// A durable [`AllocStore`] keeping every row in one JSON file.
///
/// A reservation updates the row, writes the whole table to a temporary file,
/// syncs it and renames it over the store file before the new row is
/// returned. If any of that fails the row is rolled back and the caller gets
/// [`StoreError::Unavailable`], so a range is never handed out unless it is
/// on disk. After a restart the allocator resumes above every range it ever
/// reserved; ids that were reserved but not served are skipped.
///
/// All operations run under one mutex, so reservations from a single process
/// never overlap. The file must not be shared between processes.
///
/// # Example
///
/// ```no_run
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), segid::StoreError> {
/// use segid::{AllocStore, FileStore};
///
/// let store = FileStore::open("/var/lib/segid/allocs.json")?;
/// store.insert_if_absent("order", 100, 10)?;
///
/// let record = store.reserve_next("order").await?;
/// assert!(record.max_id >= 110);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileStore<T = SystemClock> {
    path: PathBuf,
    rows: Mutex<BTreeMap<String, AllocRecord>>,
    time: T,
}

impl FileStore {
    /// Opens the store at `path`, stamped by the system clock. A missing
    /// file is an empty store; it is created on the first write.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the file exists but cannot be read or
    /// parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_time(path, SystemClock)
    }
}

impl<T: TimeSource> FileStore<T> {
    /// Like [`FileStore::open`] with a custom [`TimeSource`].
    pub fn open_with_time(path: impl Into<PathBuf>, time: T) -> Result<Self, StoreError> {
        let path = path.into();
        let rows = load(&path).map_err(|e| {
            StoreError::unavailable(format!("failed to load {}: {e}", path.display()))
        })?;

        #[cfg(feature = "tracing")]
        tracing::info!(path = %path.display(), rows = rows.len(), "Opened allocation file");

        Ok(Self {
            path,
            rows: Mutex::new(rows),
            time,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts or replaces the row for `tag` and persists it.
    pub fn insert(&self, tag: impl Into<String>, max_id: i64, step: i32) -> Result<(), StoreError> {
        let record = AllocRecord {
            tag: tag.into(),
            max_id,
            step,
            updated_at: self.time.current_millis(),
        };
        let mut rows = self.rows.lock();
        self.commit(&mut rows, record)
    }

    /// Inserts the row for `tag` unless one exists. Returns `true` if it was
    /// inserted.
    ///
    /// Seeding on every start goes through here so that restarts keep the
    /// counters already on disk.
    pub fn insert_if_absent(
        &self,
        tag: impl Into<String>,
        max_id: i64,
        step: i32,
    ) -> Result<bool, StoreError> {
        let tag = tag.into();
        let mut rows = self.rows.lock();
        if rows.contains_key(&tag) {
            return Ok(false);
        }
        let record = AllocRecord {
            tag,
            max_id,
            step,
            updated_at: self.time.current_millis(),
        };
        self.commit(&mut rows, record)?;
        Ok(true)
    }

    /// Removes the row for `tag` and persists the removal.
    pub fn remove(&self, tag: &str) -> Result<Option<AllocRecord>, StoreError> {
        let mut rows = self.rows.lock();
        let Some(removed) = rows.remove(tag) else {
            return Ok(None);
        };
        if let Err(e) = persist(&self.path, &rows) {
            rows.insert(removed.tag.clone(), removed);
            return Err(self.write_error(&e));
        }
        Ok(Some(removed))
    }

    /// Returns a copy of the row for `tag`.
    pub fn get(&self, tag: &str) -> Option<AllocRecord> {
        self.rows.lock().get(tag).cloned()
    }

    fn advance(&self, tag: &str, step: Option<i32>) -> Result<AllocRecord, StoreError> {
        let mut rows = self.rows.lock();
        let mut record = rows.get(tag).cloned().ok_or_else(|| StoreError::UnknownTag {
            tag: tag.to_owned(),
        })?;
        advance_record(&mut record, step, self.time.current_millis())?;
        self.commit(&mut rows, record.clone())?;
        Ok(record)
    }

    /// Writes `record` into `rows` and persists the table, restoring the
    /// previous row if the write fails.
    fn commit(
        &self,
        rows: &mut BTreeMap<String, AllocRecord>,
        record: AllocRecord,
    ) -> Result<(), StoreError> {
        let tag = record.tag.clone();
        let previous = rows.insert(tag.clone(), record);
        if let Err(e) = persist(&self.path, rows) {
            match previous {
                Some(previous) => rows.insert(tag, previous),
                None => rows.remove(&tag),
            };
            return Err(self.write_error(&e));
        }
        Ok(())
    }

    fn write_error(&self, _e: &io::Error) -> StoreError {
        #[cfg(feature = "tracing")]
        tracing::error!(path = %self.path.display(), "Failed to persist allocations: {_e}");
        StoreError::unavailable(format!("failed to persist {}: {_e}", self.path.display()))
    }
}

fn load(path: &Path) -> io::Result<BTreeMap<String, AllocRecord>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let records: Vec<AllocRecord> = serde_json::from_reader(reader)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(records
        .into_iter()
        .map(|record| (record.tag.clone(), record))
        .collect())
}

/// Replaces the file at `path` with `rows`: temp file, fsync, rename.
fn persist(path: &Path, rows: &BTreeMap<String, AllocRecord>) -> io::Result<()> {
    let mut temp = OsString::from(path.as_os_str());
    temp.push(".tmp");
    let temp_path = PathBuf::from(temp);

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&temp_path)?;
    let mut writer = BufWriter::new(file);
    let records: Vec<&AllocRecord> = rows.values().collect();
    serde_json::to_writer_pretty(&mut writer, &records)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    fs::rename(&temp_path, path)
}

impl<T> AllocStore for FileStore<T>
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
        Ok(self.rows.lock().values().cloned().collect())
    }
}
