use crate::{
    AllocStore, StoreError,
    buffer::{BufferSnapshot, SegmentBuffer},
};
use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Tags that got a fresh, uninitialized buffer.
    pub inserted: Vec<String>,
    /// Tags whose buffer was evicted.
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Map from tag to its double buffer.
///
/// Lookups hand out a cloned `Arc`, so an eviction never invalidates a buffer
/// a request is already working on; the request simply finishes against the
/// detached buffer.
#[derive(Debug, Default)]
pub(crate) struct SegmentCache {
    buffers: DashMap<String, Arc<SegmentBuffer>>,
}

impl SegmentCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn lookup(&self, tag: &str) -> Option<Arc<SegmentBuffer>> {
        self.buffers.get(tag).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Sorted list of cached tags.
    pub(crate) fn tags(&self) -> Vec<String> {
        let mut tags: Vec<_> = self.buffers.iter().map(|e| e.key().clone()).collect();
        tags.sort_unstable();
        tags
    }

    /// Sorted snapshots of every cached buffer.
    pub(crate) fn snapshot(&self) -> Vec<BufferSnapshot> {
        let buffers: Vec<_> = self.buffers.iter().map(|e| Arc::clone(e.value())).collect();
        let mut snapshots: Vec<_> = buffers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_unstable_by(|a, b| a.tag.cmp(&b.tag));
        snapshots
    }

    /// Brings the cached tag set in line with the store.
    ///
    /// New tags get an uninitialized buffer, vanished tags are evicted and
    /// existing buffers are left alone. An empty tag list is treated as a
    /// misread and changes nothing.
    pub(crate) async fn reconcile<S: AllocStore>(
        &self,
        store: &S,
    ) -> Result<ReconcileReport, StoreError> {
        let tags = store.list_tags().await?;
        if tags.is_empty() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                cached = self.buffers.len(),
                "store returned no tags, keeping the cache as is; the last tag cannot be evicted"
            );
            return Ok(ReconcileReport::default());
        }

        let mut report = ReconcileReport::default();
        let wanted: HashSet<&str> = tags.iter().map(String::as_str).collect();

        for tag in &tags {
            if self.buffers.contains_key(tag.as_str()) {
                continue;
            }
            // `entry` keeps a concurrent reconcile from replacing a buffer
            // that was inserted in between.
            if let Entry::Vacant(slot) = self.buffers.entry(tag.clone()) {
                slot.insert(Arc::new(SegmentBuffer::new(tag.as_str())));
                #[cfg(feature = "tracing")]
                tracing::info!(tag = tag.as_str(), "added tag to cache");
                report.inserted.push(tag.clone());
            }
        }

        let stale: Vec<String> = self
            .buffers
            .iter()
            .filter(|e| !wanted.contains(e.key().as_str()))
            .map(|e| e.key().clone())
            .collect();
        for tag in stale {
            if self.buffers.remove(&tag).is_some() {
                #[cfg(feature = "tracing")]
                tracing::info!(tag = tag.as_str(), "removed tag from cache");
                report.removed.push(tag);
            }
        }

        report.inserted.sort_unstable();
        report.removed.sort_unstable();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[tokio::test]
    async fn reconcile_inserts_and_evicts() {
        let store = MemoryStore::new();
        store.insert("a", 0, 1);
        store.insert("b", 0, 1);
        let cache = SegmentCache::new();

        let report = cache.reconcile(&store).await.unwrap();
        assert_eq!(report.inserted, ["a", "b"]);
        assert!(report.removed.is_empty());
        assert_eq!(cache.tags(), ["a", "b"]);

        store.remove("a");
        store.insert("c", 0, 1);
        let report = cache.reconcile(&store).await.unwrap();
        assert_eq!(report.inserted, ["c"]);
        assert_eq!(report.removed, ["a"]);
        assert_eq!(cache.tags(), ["b", "c"]);
        assert!(cache.lookup("a").is_none());
    }

    #[tokio::test]
    async fn existing_buffers_survive_reconcile() {
        let store = MemoryStore::new();
        store.insert("a", 0, 1);
        let cache = SegmentCache::new();
        cache.reconcile(&store).await.unwrap();

        let before = cache.lookup("a").unwrap();
        let report = cache.reconcile(&store).await.unwrap();
        assert!(report.is_empty());
        assert!(Arc::ptr_eq(&before, &cache.lookup("a").unwrap()));
    }

    #[tokio::test]
    async fn empty_tag_list_is_ignored() {
        let store = MemoryStore::new();
        store.insert("a", 0, 1);
        let cache = SegmentCache::new();
        cache.reconcile(&store).await.unwrap();

        store.remove("a");
        let report = cache.reconcile(&store).await.unwrap();
        assert!(report.is_empty());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn evicted_buffer_stays_usable_by_holders() {
        let store = MemoryStore::new();
        store.insert("a", 0, 1);
        store.insert("b", 0, 1);
        let cache = SegmentCache::new();
        cache.reconcile(&store).await.unwrap();

        let held = cache.lookup("a").unwrap();
        store.remove("a");
        cache.reconcile(&store).await.unwrap();

        held.segment(0).load_range(10, 10);
        assert_eq!(held.segment(0).try_take(), Some(0));
        assert!(cache.lookup("a").is_none());
    }
}
