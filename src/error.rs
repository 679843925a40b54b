use std::fmt;
use std::io;

use crate::cache::CacheError;
use crate::BlobId;

/// Errors surfaced by the blobstore façade and the storage backends.
#[derive(Debug)]
pub enum BlobstoreError {
    /// No blob is stored under the given id.
    BlobDoesNotExist(BlobId),
    /// A read was requested past the end of the blob.
    TooHighStartPosition {
        blob_id: BlobId,
        start_position: u64,
        total_size: u64,
    },
    /// The description exceeds [`crate::blobstore::BLOB_DESCRIPTION_MAX_LENGTH`].
    TooLongDescription(usize),
    /// The input stream ended before the announced length was reached.
    ShortStream { expected: u64, actual: u64 },
    /// A backend read outside of the stored bytes.
    RangeOutOfBounds {
        blob_id: BlobId,
        offset: u64,
        length: u64,
        size: u64,
    },
    Io(io::Error),
    Storage(String),
    Config(String),
    Cache(CacheError),
}

impl fmt::Display for BlobstoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobstoreError::BlobDoesNotExist(blob_id) => {
                write!(f, "blob [{}] does not exist", blob_id)
            }
            BlobstoreError::TooHighStartPosition {
                blob_id,
                start_position,
                total_size,
            } => write!(
                f,
                "startPosition(={}) cannot be higher than totalSize(={}) of blob #{}",
                start_position, total_size, blob_id
            ),
            BlobstoreError::TooLongDescription(length) => write!(
                f,
                "description length must be at most {}, actual length: {}",
                crate::blobstore::BLOB_DESCRIPTION_MAX_LENGTH,
                length
            ),
            BlobstoreError::ShortStream { expected, actual } => write!(
                f,
                "too short stream (expected {} bytes, got {})",
                expected, actual
            ),
            BlobstoreError::RangeOutOfBounds {
                blob_id,
                offset,
                length,
                size,
            } => write!(
                f,
                "range [{}, +{}) is out of bounds for blob #{} of size {}",
                offset, length, blob_id, size
            ),
            BlobstoreError::Io(err) => write!(f, "io error: {}", err),
            BlobstoreError::Storage(msg) => write!(f, "storage error: {}", msg),
            BlobstoreError::Config(msg) => write!(f, "configuration error: {}", msg),
            BlobstoreError::Cache(err) => write!(f, "cache error: {}", err),
        }
    }
}

impl std::error::Error for BlobstoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BlobstoreError::Io(err) => Some(err),
            BlobstoreError::Cache(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for BlobstoreError {
    fn from(err: io::Error) -> Self {
        BlobstoreError::Io(err)
    }
}

impl From<CacheError> for BlobstoreError {
    fn from(err: CacheError) -> Self {
        BlobstoreError::Cache(err)
    }
}

impl From<fjall::Error> for BlobstoreError {
    fn from(err: fjall::Error) -> Self {
        BlobstoreError::Storage(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for BlobstoreError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlobstoreError::Storage(format!("Failed to serialize BlobRecord: {}", err))
    }
}

impl From<bincode::error::DecodeError> for BlobstoreError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlobstoreError::Storage(format!("Failed to deserialize BlobRecord: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_error_codes() {
        assert_eq!(
            BlobstoreError::BlobDoesNotExist(332322223).to_string(),
            "blob [332322223] does not exist"
        );
        assert_eq!(
            BlobstoreError::TooHighStartPosition {
                blob_id: 7,
                start_position: 1,
                total_size: 0,
            }
            .to_string(),
            "startPosition(=1) cannot be higher than totalSize(=0) of blob #7"
        );
        assert_eq!(
            BlobstoreError::TooLongDescription(256).to_string(),
            "description length must be at most 255, actual length: 256"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error;

        let err = BlobstoreError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.source().is_some());
        assert!(err.to_string().starts_with("io error"));
    }
}
