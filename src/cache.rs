//! In-memory byte-range cache for blobs.
//!
//! The address space of every blob is tiled into fixed-size fragments. A fragment keeps the
//! byte ranges that are known to the cache as a sorted list of disjoint parts. Writes are
//! merged into those lists ([`FragmentCache::store_range`]) and reads collect the longest
//! gap-free run starting at an offset ([`FragmentCache::get_cached_run`]).

pub mod fragment;
pub mod merge;
pub mod range;
pub mod splitter;
pub mod stitch;
pub mod store;

use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::metrics::SharedMetrics;
use crate::BlobId;

pub use fragment::{CacheKey, Fragment, FragmentPart};
pub use range::{Range, RangeRelation};
pub use splitter::{FragmentSlice, FragmentedWrite};
pub use stitch::CachedBlobPart;
pub use store::FragmentStore;

/// Bytes per fragment unless configured otherwise.
pub const DEFAULT_FRAGMENT_SIZE: u64 = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    InvalidArgument(String),
    InternalInvariantViolation(String),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            CacheError::InternalInvariantViolation(msg) => {
                write!(f, "internal invariant violated: {}", msg)
            }
        }
    }
}

impl std::error::Error for CacheError {}

// Every mutation swaps whole part lists, so the data behind a poisoned lock is still valid.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The fragment cache shared by every reader and writer of a blobstore.
#[derive(Debug)]
pub struct FragmentCache {
    store: FragmentStore,
    metrics: SharedMetrics,
}

impl FragmentCache {
    /// Creates an empty cache tiling blobs into `fragment_size` byte fragments.
    pub fn new(fragment_size: u64) -> Result<Self, CacheError> {
        Self::with_metrics(fragment_size, SharedMetrics::default())
    }

    pub fn with_metrics(fragment_size: u64, metrics: SharedMetrics) -> Result<Self, CacheError> {
        if fragment_size == 0 {
            return Err(CacheError::InvalidArgument(
                "fragment size must be positive".to_string(),
            ));
        }
        Ok(Self {
            store: FragmentStore::new(fragment_size, metrics.clone()),
            metrics,
        })
    }

    pub fn fragment_size(&self) -> u64 {
        self.store.fragment_size()
    }

    /// Direct access to the fragments, mostly useful for inspection.
    pub fn fragment_store(&self) -> &FragmentStore {
        &self.store
    }

    /// Drops everything cached for `blob_id`. Called when a blob is deleted or replaced.
    pub fn remove_blob(&self, blob_id: BlobId) {
        let removed = self.store.remove_blob(blob_id);
        if removed > 0 {
            self.metrics.blob_invalidated();
        }
    }

    /// Total number of cached bytes of a blob.
    pub fn cached_bytes(&self, blob_id: BlobId) -> u64 {
        self.store
            .fragment_starts(blob_id)
            .into_iter()
            .filter_map(|start| self.store.fragment(CacheKey::new(blob_id, start)))
            .map(|fragment| {
                read_lock(&fragment)
                    .parts()
                    .iter()
                    .map(|part| part.len() as u64)
                    .sum::<u64>()
            })
            .sum()
    }
}

impl Default for FragmentCache {
    fn default() -> Self {
        Self {
            store: FragmentStore::new(DEFAULT_FRAGMENT_SIZE, SharedMetrics::default()),
            metrics: SharedMetrics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_fragment_size_is_rejected() {
        assert!(matches!(
            FragmentCache::new(0),
            Err(CacheError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_cached_bytes_and_remove_blob() {
        let cache = FragmentCache::new(16).unwrap();
        cache.store_range(1, 4, &[7u8; 40]).unwrap();
        cache.store_range(2, 0, &[1u8; 3]).unwrap();
        assert_eq!(cache.cached_bytes(1), 40);
        assert_eq!(cache.cached_bytes(2), 3);

        cache.remove_blob(1);
        assert_eq!(cache.cached_bytes(1), 0);
        assert_eq!(cache.cached_bytes(2), 3);
    }
}
