use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use ::fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use bincode::{Decode, Encode};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{check_range, drain_reader, BlobInfo, Durability, StorageBackend};
use crate::error::BlobstoreError;
use crate::BlobId;

const META_PARTITION: &str = "blob_meta";
const CHUNK_PARTITION: &str = "blob_chunks";

/// Number of chunks buffered in a batch before it is committed.
const CHUNKS_PER_BATCH: usize = 64;

pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Metadata row of a blob, keyed by the big endian blob id.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct BlobRecord {
    pub size: u64,
    pub description: Option<String>,
    pub chunk_size: u32,
    pub md5: String,
    /// Milliseconds since the unix epoch.
    pub created_at: i64,
}

impl BlobRecord {
    pub fn to_vec(&self) -> Result<Vec<u8>, BlobstoreError> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, BlobstoreError> {
        let (record, _) = bincode::decode_from_slice(data, bincode::config::standard())?;
        Ok(record)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.created_at).unwrap_or_default()
    }
}

fn chunk_key(blob_id: BlobId, index: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&blob_id.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}

fn id_from_key(key: &[u8]) -> Option<BlobId> {
    key.try_into().ok().map(BlobId::from_be_bytes)
}

/// Blob storage on top of a fjall keyspace.
///
/// Blob content is split into fixed size chunks stored under `id ++ chunk index`. The metadata
/// record is written last, so a blob whose store failed halfway is never visible.
pub struct FjallBackend {
    keyspace: Keyspace,
    meta: PartitionHandle,
    chunks: PartitionHandle,
    chunk_size: usize,
    persist_mode: PersistMode,
    next_id: AtomicU64,
}

impl fmt::Debug for FjallBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FjallBackend")
            .field("chunk_size", &self.chunk_size)
            .field("persist_mode", &self.persist_mode)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl FjallBackend {
    pub fn open(
        path: impl AsRef<Path>,
        chunk_size: usize,
        durability: Durability,
    ) -> Result<Self, BlobstoreError> {
        if chunk_size == 0 || u32::try_from(chunk_size).is_err() {
            return Err(BlobstoreError::Config(format!(
                "invalid chunk size {}",
                chunk_size
            )));
        }

        let keyspace = Config::new(path.as_ref()).open()?;
        let meta = keyspace.open_partition(META_PARTITION, PartitionCreateOptions::default())?;
        let chunks = keyspace.open_partition(CHUNK_PARTITION, PartitionCreateOptions::default())?;

        let last_id = match meta.last_key_value()? {
            Some((key, _)) => id_from_key(&key).unwrap_or(0),
            None => 0,
        };
        debug!(path = %path.as_ref().display(), last_id, "opened fjall blob storage");

        Ok(Self {
            keyspace,
            meta,
            chunks,
            chunk_size,
            persist_mode: match durability {
                Durability::Buffer => PersistMode::Buffer,
                Durability::Fsync => PersistMode::SyncAll,
                Durability::Fdatasync => PersistMode::SyncData,
            },
            next_id: AtomicU64::new(last_id + 1),
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn record(&self, blob_id: BlobId) -> Result<BlobRecord, BlobstoreError> {
        match self.meta.get(blob_id.to_be_bytes())? {
            Some(raw) => BlobRecord::from_slice(&raw),
            None => Err(BlobstoreError::BlobDoesNotExist(blob_id)),
        }
    }

    /// Number of keys in the metadata and chunk partitions.
    pub fn num_keys(&self) -> Result<(usize, usize), BlobstoreError> {
        Ok((self.meta.len()?, self.chunks.len()?))
    }

    pub fn disk_space(&self) -> u64 {
        self.keyspace.disk_space()
    }

    fn persist(&self) -> Result<(), BlobstoreError> {
        self.keyspace.persist(self.persist_mode)?;
        Ok(())
    }

    fn remove_chunks(&self, blob_id: BlobId) -> Result<(), BlobstoreError> {
        let mut batch = self.keyspace.batch();
        for item in self.chunks.prefix(blob_id.to_be_bytes()) {
            let (key, _) = item?;
            batch.remove(&self.chunks, key);
        }
        batch.commit()?;
        Ok(())
    }

    fn write_chunks(
        &self,
        blob_id: BlobId,
        reader: &mut dyn Read,
        length: Option<u64>,
    ) -> Result<(u64, String), BlobstoreError> {
        let mut batch = self.keyspace.batch();
        let mut pending = 0;
        let mut index = 0u64;
        let result = drain_reader(reader, length, self.chunk_size, |chunk| {
            batch.insert(&self.chunks, &chunk_key(blob_id, index)[..], chunk);
            index += 1;
            pending += 1;
            if pending == CHUNKS_PER_BATCH {
                std::mem::replace(&mut batch, self.keyspace.batch()).commit()?;
                pending = 0;
            }
            Ok(())
        })?;
        batch.commit()?;
        Ok(result)
    }
}

impl StorageBackend for FjallBackend {
    fn store_blob(
        &self,
        reader: &mut dyn Read,
        length: Option<u64>,
        description: Option<&str>,
    ) -> Result<BlobId, BlobstoreError> {
        let blob_id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let (size, md5) = match self.write_chunks(blob_id, reader, length) {
            Ok(written) => written,
            Err(e) => {
                if let Err(cleanup) = self.remove_chunks(blob_id) {
                    warn!(blob_id, "failed to remove chunks of aborted blob: {}", cleanup);
                }
                return Err(e);
            }
        };

        let record = BlobRecord {
            size,
            description: description.map(str::to_string),
            chunk_size: self.chunk_size as u32,
            md5,
            created_at: Utc::now().timestamp_millis(),
        };
        self.meta.insert(&blob_id.to_be_bytes()[..], record.to_vec()?)?;
        self.persist()?;

        debug!(blob_id, size, "stored blob");
        Ok(blob_id)
    }

    fn read_range(
        &self,
        blob_id: BlobId,
        offset: u64,
        length: u64,
    ) -> Result<Bytes, BlobstoreError> {
        let record = self.record(blob_id)?;
        check_range(blob_id, offset, length, record.size)?;
        if length == 0 {
            return Ok(Bytes::new());
        }

        let chunk_size = record.chunk_size as u64;
        let end = offset + length;
        let first = offset / chunk_size;
        let last = (end - 1) / chunk_size;

        let mut out = BytesMut::with_capacity(length as usize);
        let mut expected = first;
        for item in self
            .chunks
            .range(chunk_key(blob_id, first)..=chunk_key(blob_id, last))
        {
            let (_, chunk) = item?;
            let chunk_start = expected * chunk_size;
            let from = offset.saturating_sub(chunk_start) as usize;
            let to = ((end - chunk_start) as usize).min(chunk.len());
            if from > to {
                break;
            }
            out.extend_from_slice(&chunk[from..to]);
            expected += 1;
        }

        if out.len() as u64 != length {
            return Err(BlobstoreError::Storage(format!(
                "blob #{} is missing chunks: read {} of {} bytes at offset {}",
                blob_id,
                out.len(),
                length,
                offset
            )));
        }
        Ok(out.freeze())
    }

    fn total_size(&self, blob_id: BlobId) -> Result<u64, BlobstoreError> {
        Ok(self.record(blob_id)?.size)
    }

    fn delete_blob(&self, blob_id: BlobId) -> Result<(), BlobstoreError> {
        if !self.meta.contains_key(blob_id.to_be_bytes())? {
            return Err(BlobstoreError::BlobDoesNotExist(blob_id));
        }

        let mut batch = self.keyspace.batch();
        batch.remove(&self.meta, &blob_id.to_be_bytes()[..]);
        for item in self.chunks.prefix(blob_id.to_be_bytes()) {
            let (key, _) = item?;
            batch.remove(&self.chunks, key);
        }
        batch.commit()?;
        self.persist()?;

        debug!(blob_id, "deleted blob");
        Ok(())
    }

    fn description(&self, blob_id: BlobId) -> Result<Option<String>, BlobstoreError> {
        Ok(self.record(blob_id)?.description)
    }

    fn info(&self, blob_id: BlobId) -> Result<BlobInfo, BlobstoreError> {
        let record = self.record(blob_id)?;
        Ok(BlobInfo {
            id: blob_id,
            size: record.size,
            created_at: record.created_at(),
            description: record.description,
            md5: record.md5,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_store_and_read_ranges() {
        let dir = tempdir().unwrap();
        let backend = FjallBackend::open(dir.path(), 100, Durability::Buffer).unwrap();
        let data = pattern(1050);
        let id = backend
            .store_blob(&mut data.as_slice(), Some(1050), Some("pattern"))
            .unwrap();

        assert_eq!(backend.total_size(id).unwrap(), 1050);
        assert_eq!(backend.num_keys().unwrap(), (1, 11));
        for (offset, len) in [(0, 1050), (0, 1), (99, 2), (150, 700), (1000, 50), (1050, 0)] {
            let got = backend.read_range(id, offset, len).unwrap();
            assert_eq!(&got[..], &data[offset as usize..(offset + len) as usize]);
        }
        assert!(matches!(
            backend.read_range(id, 1000, 51),
            Err(BlobstoreError::RangeOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_record_round_trip() {
        let record = BlobRecord {
            size: 12,
            description: Some("d".to_string()),
            chunk_size: 4,
            md5: "00".to_string(),
            created_at: 1_700_000_000_000,
        };
        let raw = record.to_vec().unwrap();
        assert_eq!(BlobRecord::from_slice(&raw).unwrap(), record);
        assert_eq!(record.created_at().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_ids_resume_after_reopen() {
        let dir = tempdir().unwrap();
        let first = {
            let backend = FjallBackend::open(dir.path(), 16, Durability::Fsync).unwrap();
            backend.store_blob(&mut &b"one"[..], None, None).unwrap();
            backend.store_blob(&mut &b"two"[..], None, None).unwrap()
        };

        let backend = FjallBackend::open(dir.path(), 16, Durability::Fsync).unwrap();
        let next = backend.store_blob(&mut &b"three"[..], None, None).unwrap();
        assert!(next > first);
        assert_eq!(&backend.read_range(first, 0, 3).unwrap()[..], b"two");
    }

    #[test]
    fn test_delete_removes_chunks() {
        let dir = tempdir().unwrap();
        let backend = FjallBackend::open(dir.path(), 8, Durability::Buffer).unwrap();
        let keep = backend.store_blob(&mut &[1u8; 20][..], None, None).unwrap();
        let gone = backend.store_blob(&mut &[2u8; 30][..], None, None).unwrap();

        backend.delete_blob(gone).unwrap();
        assert_eq!(backend.num_keys().unwrap(), (1, 3));
        assert!(matches!(
            backend.info(gone),
            Err(BlobstoreError::BlobDoesNotExist(_))
        ));
        assert!(backend.delete_blob(gone).is_err());
        assert_eq!(backend.total_size(keep).unwrap(), 20);
    }

    #[test]
    fn test_short_stream_leaves_no_chunks() {
        let dir = tempdir().unwrap();
        let backend = FjallBackend::open(dir.path(), 4, Durability::Buffer).unwrap();
        let result = backend.store_blob(&mut &[3u8; 10][..], Some(20), None);
        assert!(matches!(result, Err(BlobstoreError::ShortStream { .. })));
        assert_eq!(backend.num_keys().unwrap(), (0, 0));
    }

    #[test]
    fn test_empty_blob() {
        let dir = tempdir().unwrap();
        let backend = FjallBackend::open(dir.path(), 4, Durability::Buffer).unwrap();
        let id = backend.store_blob(&mut &b""[..], Some(0), Some("")).unwrap();
        assert_eq!(backend.total_size(id).unwrap(), 0);
        assert!(backend.read_range(id, 0, 0).unwrap().is_empty());
        assert_eq!(backend.description(id).unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_zero_chunk_size_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            FjallBackend::open(dir.path(), 0, Durability::Buffer),
            Err(BlobstoreError::Config(_))
        ));
    }
}
