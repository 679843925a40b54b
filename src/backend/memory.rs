use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::{check_range, drain_reader, BlobInfo, StorageBackend};
use crate::cache::{read_lock, write_lock};
use crate::error::BlobstoreError;
use crate::BlobId;

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    description: Option<String>,
    md5: String,
    created_at: DateTime<Utc>,
}

/// Keeps every blob in process memory. Ids start at 1.
#[derive(Debug)]
pub struct MemoryBackend {
    blobs: RwLock<BTreeMap<BlobId, StoredBlob>>,
    next_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        read_lock(&self.blobs).len()
    }

    pub fn is_empty(&self) -> bool {
        read_lock(&self.blobs).is_empty()
    }

    fn with_blob<T>(
        &self,
        blob_id: BlobId,
        f: impl FnOnce(&StoredBlob) -> T,
    ) -> Result<T, BlobstoreError> {
        read_lock(&self.blobs)
            .get(&blob_id)
            .map(f)
            .ok_or(BlobstoreError::BlobDoesNotExist(blob_id))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn store_blob(
        &self,
        reader: &mut dyn Read,
        length: Option<u64>,
        description: Option<&str>,
    ) -> Result<BlobId, BlobstoreError> {
        let mut data = BytesMut::new();
        let (size, md5) = drain_reader(reader, length, READ_CHUNK_SIZE, |chunk| {
            data.extend_from_slice(chunk);
            Ok(())
        })?;

        let blob_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        write_lock(&self.blobs).insert(
            blob_id,
            StoredBlob {
                data: data.freeze(),
                description: description.map(str::to_string),
                md5,
                created_at: Utc::now(),
            },
        );
        debug!(blob_id, size, "stored blob in memory");
        Ok(blob_id)
    }

    fn read_range(
        &self,
        blob_id: BlobId,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, BlobstoreError> {
        let data = self.with_blob(blob_id, |blob| blob.data.clone())?;
        check_range(blob_id, offset, length, data.len() as u64)?;
        Ok(data.slice(offset as usize..(offset + length) as usize))
    }

    fn total_size(&self, blob_id: BlobId) -> Result<u64, BlobstoreError> {
        self.with_blob(blob_id, |blob| blob.data.len() as u64)
    }

    fn delete_blob(&self, blob_id: BlobId) -> Result<(), BlobstoreError> {
        match write_lock(&self.blobs).remove(&blob_id) {
            Some(_) => Ok(()),
            None => Err(BlobstoreError::BlobDoesNotExist(blob_id)),
        }
    }

    fn description(&self, blob_id: BlobId) -> Result<Option<String>, BlobstoreError> {
        self.with_blob(blob_id, |blob| blob.description.clone())
    }

    fn info(&self, blob_id: BlobId) -> Result<BlobInfo, BlobstoreError> {
        self.with_blob(blob_id, |blob| BlobInfo {
            id: blob_id,
            size: blob.data.len() as u64,
            description: blob.description.clone(),
            md5: blob.md5.clone(),
            created_at: blob.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_and_read_back() {
        let backend = MemoryBackend::new();
        let data: Vec<u8> = (0..=255).collect();
        let id = backend
            .store_blob(&mut data.as_slice(), Some(256), Some("bytes"))
            .unwrap();

        assert_eq!(id, 1);
        assert_eq!(backend.total_size(id).unwrap(), 256);
        assert_eq!(backend.description(id).unwrap().as_deref(), Some("bytes"));
        assert_eq!(&backend.read_range(id, 10, 5).unwrap()[..], &[10, 11, 12, 13, 14]);
        assert!(backend.read_range(id, 250, 10).is_err());
    }

    #[test]
    fn test_ids_increase() {
        let backend = MemoryBackend::new();
        let first = backend.store_blob(&mut &b"a"[..], None, None).unwrap();
        let second = backend.store_blob(&mut &b"b"[..], None, None).unwrap();
        assert!(second > first);
        assert_eq!(backend.len(), 2);
    }

    #[test]
    fn test_delete_blob() {
        let backend = MemoryBackend::new();
        let id = backend.store_blob(&mut &b"abc"[..], None, None).unwrap();
        backend.delete_blob(id).unwrap();

        assert!(matches!(
            backend.total_size(id),
            Err(BlobstoreError::BlobDoesNotExist(_))
        ));
        assert!(matches!(
            backend.delete_blob(id),
            Err(BlobstoreError::BlobDoesNotExist(_))
        ));
        assert!(backend.is_empty());
    }

    #[test]
    fn test_short_stream_stores_nothing() {
        let backend = MemoryBackend::new();
        let result = backend.store_blob(&mut &b"abc"[..], Some(10), None);
        assert!(matches!(result, Err(BlobstoreError::ShortStream { .. })));
        assert!(backend.is_empty());
    }

    #[test]
    fn test_info_has_md5() {
        let backend = MemoryBackend::new();
        let id = backend.store_blob(&mut &b""[..], Some(0), None).unwrap();
        let info = backend.info(id).unwrap();
        assert_eq!(info.size, 0);
        assert_eq!(info.md5, "d41d8cd98f00b204e9800998ecf8427e");
    }
}
