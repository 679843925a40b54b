//! Persistent sources of truth for blob bytes.

pub mod fjall;
pub mod memory;

use std::fmt::Debug;
use std::io::{self, Read};
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::error::BlobstoreError;
use crate::BlobId;

pub use self::fjall::FjallBackend;
pub use self::memory::MemoryBackend;

/// StorageBackend is the interface to the store that owns the blob bytes.
///
/// The cache never persists anything; every byte it serves was first read from or written to
/// a backend. Implementations must be usable from several threads at once.
pub trait StorageBackend: Send + Sync + Debug {
    /// Stores the content of `reader` as a new blob and returns its id.
    ///
    /// With `length` set, exactly that many bytes are consumed and a shorter stream is an
    /// error. Without it the reader is drained to EOF.
    fn store_blob(
        &self,
        reader: &mut dyn Read,
        length: Option<u64>,
        description: Option<&str>,
    ) -> Result<BlobId, BlobstoreError>;

    /// Reads `length` bytes at `offset`. The range must lie inside the blob.
    fn read_range(&self, blob_id: BlobId, offset: u64, length: u64)
        -> Result<Bytes, BlobstoreError>;

    fn total_size(&self, blob_id: BlobId) -> Result<u64, BlobstoreError>;

    fn delete_blob(&self, blob_id: BlobId) -> Result<(), BlobstoreError>;

    fn description(&self, blob_id: BlobId) -> Result<Option<String>, BlobstoreError>;

    /// Everything known about a blob besides its bytes.
    fn info(&self, blob_id: BlobId) -> Result<BlobInfo, BlobstoreError>;
}

/// Metadata of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobInfo {
    pub id: BlobId,
    pub size: u64,
    pub description: Option<String>,
    /// Hex encoded MD5 of the content.
    pub md5: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Buffer,
    Fsync,
    #[default]
    Fdatasync,
}

impl FromStr for Durability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "buffer" => Ok(Durability::Buffer),
            "fsync" => Ok(Durability::Fsync),
            "fdatasync" => Ok(Durability::Fdatasync),
            _ => Err(format!("Unknown durability option: {}", s)),
        }
    }
}

/// Checks that `[offset, offset + length)` lies inside a blob of `size` bytes.
pub(crate) fn check_range(
    blob_id: BlobId,
    offset: u64,
    length: u64,
    size: u64,
) -> Result<(), BlobstoreError> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(BlobstoreError::RangeOutOfBounds {
            blob_id,
            offset,
            length,
            size,
        }),
    }
}

/// Reads `reader` in `chunk_size` pieces and hands every piece to `sink`.
///
/// Returns the number of bytes read and the hex MD5 of them. Pieces are full except for the
/// last one.
pub(crate) fn drain_reader<F>(
    reader: &mut dyn Read,
    length: Option<u64>,
    chunk_size: usize,
    mut sink: F,
) -> Result<(u64, String), BlobstoreError>
where
    F: FnMut(&[u8]) -> Result<(), BlobstoreError>,
{
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;

    loop {
        let want = match length {
            Some(expected) => (expected - total).min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        if want == 0 {
            break;
        }

        let mut filled = 0;
        while filled < want {
            match reader.read(&mut buf[filled..want]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            break;
        }

        hasher.update(&buf[..filled]);
        sink(&buf[..filled])?;
        total += filled as u64;
        if filled < want {
            break;
        }
    }

    if let Some(expected) = length {
        if total < expected {
            return Err(BlobstoreError::ShortStream {
                expected,
                actual: total,
            });
        }
    }
    Ok((total, faster_hex::hex_string(&hasher.finalize())))
}
