use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use tracing::{trace, warn};

use super::{read_lock, write_lock, CacheKey, Fragment};
use crate::metrics::SharedMetrics;
use crate::BlobId;

/// Fragments keyed by [`CacheKey`], plus a per-blob index of fragment starts.
///
/// Each fragment sits behind its own lock, so writers to different fragments never wait on
/// each other while writers to the same fragment are serialized. The two maps are never
/// locked together by `remove_blob`, and `get_or_create_fragment` always takes the fragment
/// map first.
#[derive(Debug)]
pub struct FragmentStore {
    fragment_size: u64,
    fragments: RwLock<HashMap<CacheKey, Arc<RwLock<Fragment>>>>,
    blob_index: RwLock<HashMap<BlobId, BTreeSet<u64>>>,
    metrics: SharedMetrics,
}

impl FragmentStore {
    pub(crate) fn new(fragment_size: u64, metrics: SharedMetrics) -> Self {
        Self {
            fragment_size,
            fragments: RwLock::new(HashMap::new()),
            blob_index: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn fragment_size(&self) -> u64 {
        self.fragment_size
    }

    /// Start of the fragment holding the absolute `offset`.
    pub fn fragment_start(&self, offset: u64) -> u64 {
        offset / self.fragment_size * self.fragment_size
    }

    pub fn fragment(&self, key: CacheKey) -> Option<Arc<RwLock<Fragment>>> {
        read_lock(&self.fragments).get(&key).cloned()
    }

    /// Returns the fragment holding `offset`, creating and indexing an empty one if needed.
    pub fn get_or_create_fragment(&self, blob_id: BlobId, offset: u64) -> Arc<RwLock<Fragment>> {
        let key = CacheKey::new(blob_id, self.fragment_start(offset));
        if let Some(fragment) = self.fragment(key) {
            return fragment;
        }

        let mut fragments = write_lock(&self.fragments);
        if let Some(fragment) = fragments.get(&key) {
            return Arc::clone(fragment);
        }
        let fragment = Arc::new(RwLock::new(Fragment::new(blob_id, key.fragment_start)));
        fragments.insert(key, Arc::clone(&fragment));
        write_lock(&self.blob_index)
            .entry(blob_id)
            .or_default()
            .insert(key.fragment_start);
        drop(fragments);

        trace!(blob_id, fragment_start = key.fragment_start, "created fragment");
        self.metrics.fragment_created();
        fragment
    }

    /// Ascending fragment starts currently registered for a blob.
    pub fn fragment_starts(&self, blob_id: BlobId) -> Vec<u64> {
        read_lock(&self.blob_index)
            .get(&blob_id)
            .map(|starts| starts.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes every fragment of `blob_id` and returns how many were dropped.
    pub fn remove_blob(&self, blob_id: BlobId) -> usize {
        let Some(starts) = write_lock(&self.blob_index).remove(&blob_id) else {
            return 0;
        };

        let mut fragments = write_lock(&self.fragments);
        let mut removed = 0;
        for fragment_start in starts {
            let key = CacheKey::new(blob_id, fragment_start);
            if fragments.remove(&key).is_some() {
                removed += 1;
            } else {
                warn!(
                    "inconsistent cache state: {} exists in blob index but not found in fragment cache",
                    key
                );
            }
        }
        trace!(blob_id, removed, "removed fragments of blob");
        removed
    }

    pub fn fragment_count(&self) -> usize {
        read_lock(&self.fragments).len()
    }

    pub fn blob_count(&self) -> usize {
        read_lock(&self.blob_index).len()
    }

    #[cfg(test)]
    pub(crate) fn forget_fragment(&self, key: CacheKey) {
        write_lock(&self.fragments).remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FragmentPart;
    use std::thread;

    fn store() -> FragmentStore {
        FragmentStore::new(1024, SharedMetrics::default())
    }

    #[test]
    fn test_fragment_start() {
        let store = store();
        assert_eq!(store.fragment_start(1), 0);
        assert_eq!(store.fragment_start(1023), 0);
        assert_eq!(store.fragment_start(1024), 1024);
        assert_eq!(store.fragment_start(2047), 1024);
        assert_eq!(store.fragment_start(2048), 2048);
    }

    #[test]
    fn test_get_or_create_registers_key() {
        let store = store();
        let fragment = store.get_or_create_fragment(10, 1500);
        assert_eq!(*read_lock(&fragment), Fragment::new(10, 1024));
        assert_eq!(store.fragment_starts(10), vec![1024]);

        // same fragment comes back for any offset inside it
        let again = store.get_or_create_fragment(10, 1024);
        assert!(Arc::ptr_eq(&fragment, &again));
        assert_eq!(store.fragment_count(), 1);
    }

    #[test]
    fn test_fragment_starts_are_sorted() {
        let store = store();
        for offset in [5000, 10, 3000, 2048] {
            store.get_or_create_fragment(1, offset);
        }
        assert_eq!(store.fragment_starts(1), vec![0, 2048, 4096]);
    }

    #[test]
    fn test_remove_blob_leaves_other_blobs() {
        let store = store();
        for i in 0..10 {
            store.get_or_create_fragment(1, i * 1024);
            store.get_or_create_fragment(2, i * 1024);
        }
        assert_eq!(store.remove_blob(1), 10);
        assert!(store.fragment_starts(1).is_empty());
        for i in 0..10 {
            assert!(store.fragment(CacheKey::new(1, i * 1024)).is_none());
            assert!(store.fragment(CacheKey::new(2, i * 1024)).is_some());
        }
        assert_eq!(store.fragment_starts(2).len(), 10);
        assert_eq!(store.blob_count(), 1);
    }

    #[test]
    fn test_remove_blob_tolerates_missing_fragment() {
        let store = store();
        store.get_or_create_fragment(1, 0);
        store.get_or_create_fragment(1, 1024);
        store.forget_fragment(CacheKey::new(1, 0));

        assert_eq!(store.remove_blob(1), 1);
        assert!(store.fragment_starts(1).is_empty());
        assert_eq!(store.remove_blob(1), 0);
    }

    #[test]
    fn test_concurrent_creation_yields_one_fragment() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let fragment = store.get_or_create_fragment(3, 100);
                    write_lock(&fragment).insert_part(FragmentPart::new(i * 10, vec![i as u8; 5]));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.fragment_count(), 1);
        let fragment = store.fragment(CacheKey::new(3, 0)).unwrap();
        assert_eq!(read_lock(&fragment).parts().len(), 8);
    }
}
