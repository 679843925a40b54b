use std::io::{self, BufReader, Read};
use std::sync::Arc;

use tracing::{debug, info};

use crate::backend::{BlobInfo, FjallBackend, StorageBackend};
use crate::cache::FragmentCache;
use crate::config::BlobstoreConfig;
use crate::error::BlobstoreError;
use crate::metrics::SharedMetrics;
use crate::read_stream::BlobReadStream;
use crate::BlobId;

/// Maximum number of characters in a blob description.
pub const BLOB_DESCRIPTION_MAX_LENGTH: usize = 255;

/// Blob storage with a shared fragment cache in front of a storage backend.
///
/// Cloning is cheap and every clone uses the same backend and cache.
#[derive(Debug, Clone)]
pub struct Blobstore {
    backend: Arc<dyn StorageBackend>,
    cache: Arc<FragmentCache>,
    metrics: SharedMetrics,
    read_through: bool,
    read_buffer_size: usize,
}

impl Blobstore {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        cache: Arc<FragmentCache>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            backend,
            cache,
            metrics,
            read_through: false,
            read_buffer_size: crate::config::DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Opens a fjall backed store as described by `config`.
    pub fn from_config(
        config: &BlobstoreConfig,
        metrics: SharedMetrics,
    ) -> Result<Self, BlobstoreError> {
        config.validate()?;
        let backend = FjallBackend::open(
            &config.storage.path,
            config.storage.chunk_size,
            config.storage.durability,
        )?;
        let cache = FragmentCache::with_metrics(config.cache.fragment_size, metrics.clone())?;
        info!(
            path = %config.storage.path.display(),
            fragment_size = config.cache.fragment_size,
            read_through = config.cache.read_through,
            "opened blobstore"
        );

        Ok(Self::new(Arc::new(backend), Arc::new(cache), metrics)
            .read_through(config.cache.read_through)
            .read_buffer_size(config.cache.read_buffer_size))
    }

    /// Store bytes fetched from the backend into the cache while reading.
    pub fn read_through(mut self, read_through: bool) -> Self {
        self.read_through = read_through;
        self
    }

    /// Buffer size of the reader handed to [`Blobstore::read_blob_with`].
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<FragmentCache> {
        &self.cache
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Stores the content of `reader` as a new blob.
    ///
    /// With `length` set exactly that many bytes are read, otherwise the reader is consumed
    /// until EOF.
    pub fn store_blob(
        &self,
        reader: &mut dyn Read,
        length: Option<u64>,
        description: Option<&str>,
    ) -> Result<BlobId, BlobstoreError> {
        if let Some(description) = description {
            let len = description.chars().count();
            if len > BLOB_DESCRIPTION_MAX_LENGTH {
                return Err(BlobstoreError::TooLongDescription(len));
            }
        }

        let blob_id = self.backend.store_blob(reader, length, description)?;
        self.metrics.blob_stored();
        debug!(blob_id, "stored blob");
        Ok(blob_id)
    }

    /// Opens a stream over the blob starting at `start_position`.
    pub fn read_blob(
        &self,
        blob_id: BlobId,
        start_position: u64,
    ) -> Result<BlobReadStream, BlobstoreError> {
        let total_size = self.backend.total_size(blob_id)?;
        if start_position > total_size {
            return Err(BlobstoreError::TooHighStartPosition {
                blob_id,
                start_position,
                total_size,
            });
        }

        Ok(BlobReadStream::new(
            blob_id,
            start_position,
            total_size,
            Arc::clone(&self.backend),
            Arc::clone(&self.cache),
        )
        .with_read_through(self.read_through)
        .with_metrics(self.metrics.clone()))
    }

    /// Hands a buffered reader over the blob to `f` and returns its result.
    pub fn read_blob_with<T, F>(
        &self,
        blob_id: BlobId,
        start_position: u64,
        f: F,
    ) -> Result<T, BlobstoreError>
    where
        F: FnOnce(&mut dyn Read) -> io::Result<T>,
    {
        let stream = self.read_blob(blob_id, start_position)?;
        let mut reader = BufReader::with_capacity(self.read_buffer_size, stream);
        Ok(f(&mut reader)?)
    }

    pub fn blob_size(&self, blob_id: BlobId) -> Result<u64, BlobstoreError> {
        self.backend.total_size(blob_id)
    }

    pub fn description(&self, blob_id: BlobId) -> Result<Option<String>, BlobstoreError> {
        self.backend.description(blob_id)
    }

    pub fn info(&self, blob_id: BlobId) -> Result<BlobInfo, BlobstoreError> {
        self.backend.info(blob_id)
    }

    /// Deletes the blob and everything cached for it.
    pub fn delete_blob(&self, blob_id: BlobId) -> Result<(), BlobstoreError> {
        self.backend.delete_blob(blob_id)?;
        self.cache.remove_blob(blob_id);
        debug!(blob_id, "deleted blob");
        Ok(())
    }

    /// Loads `[offset, offset + length)` of a blob from the backend into the cache.
    ///
    /// The range is clamped to the end of the blob. Returns the number of bytes cached.
    pub fn warm(&self, blob_id: BlobId, offset: u64, length: u64) -> Result<u64, BlobstoreError> {
        let total_size = self.backend.total_size(blob_id)?;
        if offset > total_size {
            return Err(BlobstoreError::TooHighStartPosition {
                blob_id,
                start_position: offset,
                total_size,
            });
        }
        let length = length.min(total_size - offset);
        if length == 0 {
            return Ok(0);
        }

        let bytes = self.backend.read_range(blob_id, offset, length)?;
        self.metrics.backend_read_bytes(bytes.len());
        self.cache.store_range(blob_id, offset, &bytes)?;
        debug!(blob_id, offset, length, "warmed cache");
        Ok(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Durability, MemoryBackend};
    use crate::config::{CacheConfig, StorageConfig};
    use tempfile::tempdir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    fn memory_store() -> Blobstore {
        Blobstore::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(FragmentCache::new(128).unwrap()),
            SharedMetrics::default(),
        )
    }

    #[test]
    fn test_store_and_read() {
        let store = memory_store();
        let data = pattern(5000);
        let id = store
            .store_blob(&mut data.as_slice(), Some(5000), Some("test blob"))
            .unwrap();

        assert_eq!(store.blob_size(id).unwrap(), 5000);
        assert_eq!(store.description(id).unwrap().as_deref(), Some("test blob"));

        let mut out = Vec::new();
        store.read_blob(id, 0).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);

        let tail = store
            .read_blob_with(id, 4990, |reader| {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(buf)
            })
            .unwrap();
        assert_eq!(tail, &data[4990..]);
    }

    #[test]
    fn test_description_limit() {
        let store = memory_store();
        let ok = "x".repeat(BLOB_DESCRIPTION_MAX_LENGTH);
        assert!(store.store_blob(&mut &b"a"[..], None, Some(&ok)).is_ok());

        let too_long = "é".repeat(BLOB_DESCRIPTION_MAX_LENGTH + 1);
        let err = store
            .store_blob(&mut &b"a"[..], None, Some(&too_long))
            .unwrap_err();
        assert!(matches!(err, BlobstoreError::TooLongDescription(256)));
    }

    #[test]
    fn test_start_position_checks() {
        let store = memory_store();
        let id = store.store_blob(&mut &[1u8; 10][..], None, None).unwrap();

        let mut at_end = store.read_blob(id, 10).unwrap();
        assert!(at_end.read_chunk(10).unwrap().is_none());

        let err = store.read_blob(id, 11).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("startPosition(=11) cannot be higher than totalSize(=10) of blob #{}", id)
        );
    }

    #[test]
    fn test_unknown_blob() {
        let store = memory_store();
        assert!(matches!(
            store.blob_size(332322223),
            Err(BlobstoreError::BlobDoesNotExist(332322223))
        ));
        assert!(matches!(
            store.read_blob(332322223, 0),
            Err(BlobstoreError::BlobDoesNotExist(_))
        ));
        assert!(store.delete_blob(332322223).is_err());
    }

    #[test]
    fn test_delete_invalidates_cache() {
        let store = memory_store();
        let id = store.store_blob(&mut &pattern(1000)[..], None, None).unwrap();
        assert_eq!(store.warm(id, 100, 400).unwrap(), 400);
        assert_eq!(store.cache().cached_bytes(id), 400);

        store.delete_blob(id).unwrap();
        assert_eq!(store.cache().cached_bytes(id), 0);
        assert!(store.cache().get_cached_run(id, 100, 400).is_empty());
    }

    #[test]
    fn test_warm_clamps_to_blob_end() {
        let store = memory_store();
        let data = pattern(300);
        let id = store.store_blob(&mut data.as_slice(), None, None).unwrap();

        assert_eq!(store.warm(id, 250, 1000).unwrap(), 50);
        assert_eq!(store.warm(id, 300, 10).unwrap(), 0);
        assert!(store.warm(id, 301, 10).is_err());

        let run = store.cache().get_cached_run(id, 250, 50);
        let cached: Vec<u8> = run.iter().flat_map(|p| p.data().to_vec()).collect();
        assert_eq!(cached, &data[250..]);
    }

    #[test]
    fn test_read_through_option() {
        let store = memory_store().read_through(true);
        let id = store.store_blob(&mut &pattern(700)[..], None, None).unwrap();
        let mut out = Vec::new();
        store.read_blob(id, 100).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(store.cache().cached_bytes(id), 600);
    }

    #[test]
    fn test_from_config_uses_fjall() {
        let dir = tempdir().unwrap();
        let config = BlobstoreConfig {
            cache: CacheConfig {
                fragment_size: 256,
                ..CacheConfig::default()
            },
            storage: StorageConfig {
                path: dir.path().to_path_buf(),
                chunk_size: 100,
                durability: Durability::Buffer,
            },
        };
        let store = Blobstore::from_config(&config, SharedMetrics::default()).unwrap();
        assert_eq!(store.cache().fragment_size(), 256);

        let data = pattern(1234);
        let id = store.store_blob(&mut data.as_slice(), None, Some("disk")).unwrap();
        store.warm(id, 0, 500).unwrap();

        let mut out = Vec::new();
        store.read_blob(id, 0).unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
        assert_eq!(store.info(id).unwrap().size, 1234);
    }
}
