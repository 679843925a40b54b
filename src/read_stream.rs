use std::io::{self, Read};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tracing::trace;

use crate::backend::StorageBackend;
use crate::cache::FragmentCache;
use crate::error::BlobstoreError;
use crate::metrics::SharedMetrics;
use crate::BlobId;

/// Sequential reader over a blob that serves cached bytes from the fragment cache and fetches
/// everything else from the storage backend.
///
/// The produced bytes are exactly those of the stored blob from the start position on. The
/// cursor only advances after a read succeeded.
#[derive(Debug)]
pub struct BlobReadStream {
    blob_id: BlobId,
    position: u64,
    total_size: u64,
    backend: Arc<dyn StorageBackend>,
    cache: Arc<FragmentCache>,
    read_through: bool,
    metrics: SharedMetrics,
}

impl BlobReadStream {
    pub fn new(
        blob_id: BlobId,
        start_position: u64,
        total_size: u64,
        backend: Arc<dyn StorageBackend>,
        cache: Arc<FragmentCache>,
    ) -> Self {
        Self {
            blob_id,
            position: start_position.min(total_size),
            total_size,
            backend,
            cache,
            read_through: false,
            metrics: SharedMetrics::default(),
        }
    }

    /// Store bytes fetched from the backend into the cache.
    pub fn with_read_through(mut self, read_through: bool) -> Self {
        self.read_through = read_through;
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes left until the end of the blob.
    pub fn available(&self) -> u64 {
        self.total_size - self.position
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.total_size
    }

    /// Reads up to `max_len` bytes. Returns `None` once the end of the blob is reached.
    pub fn read_chunk(&mut self, max_len: usize) -> Result<Option<Bytes>, BlobstoreError> {
        if self.is_finished() {
            return Ok(None);
        }
        let want = (max_len as u64).min(self.available());
        if want == 0 {
            return Ok(Some(Bytes::new()));
        }

        let start = self.position;
        let end = start + want;
        let run = self.cache.get_cached_run(self.blob_id, start, want);

        let mut out = BytesMut::with_capacity(want as usize);
        let mut cursor = start;
        let mut hit = 0usize;
        for part in &run {
            if cursor >= end {
                break;
            }
            let part_start = part.start_position();
            if part_start < cursor {
                continue;
            }
            if part_start > cursor {
                let gap_end = part_start.min(end);
                self.fetch(cursor, gap_end - cursor, &mut out)?;
                cursor = gap_end;
                if cursor >= end {
                    break;
                }
            }
            let take = (part.len() as u64).min(end - cursor) as usize;
            out.extend_from_slice(&part.data()[..take]);
            cursor += take as u64;
            hit += take;
        }
        if cursor < end {
            self.fetch(cursor, end - cursor, &mut out)?;
        }

        self.metrics.cache_hit_bytes(hit);
        trace!(
            blob_id = self.blob_id,
            position = start,
            len = want,
            cached = hit,
            "read chunk"
        );
        self.position = end;
        Ok(Some(out.freeze()))
    }

    fn fetch(&self, offset: u64, length: u64, out: &mut BytesMut) -> Result<(), BlobstoreError> {
        let bytes = self.backend.read_range(self.blob_id, offset, length)?;
        if bytes.len() as u64 != length {
            return Err(BlobstoreError::Storage(format!(
                "backend returned {} bytes instead of {} for blob #{} at offset {}",
                bytes.len(),
                length,
                self.blob_id,
                offset
            )));
        }
        self.metrics.backend_read_bytes(bytes.len());
        if self.read_through {
            self.cache.store_range(self.blob_id, offset, &bytes)?;
        }
        out.extend_from_slice(&bytes);
        Ok(())
    }

    /// Turns the reader into a stream of chunks of at most `chunk_size` bytes.
    ///
    /// The stream ends after the last byte or after the first error.
    pub fn into_chunk_stream(
        self,
        chunk_size: usize,
    ) -> impl Stream<Item = Result<Bytes, BlobstoreError>> {
        let chunk_size = chunk_size.max(1);
        futures::stream::unfold(Some(self), move |state| async move {
            let mut reader = state?;
            match reader.read_chunk(chunk_size) {
                Ok(Some(chunk)) => Some((Ok(chunk), Some(reader))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl Read for BlobReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.read_chunk(buf.len()) {
            Ok(Some(chunk)) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Ok(None) => Ok(0),
            Err(BlobstoreError::Io(e)) => Err(e),
            Err(e) => Err(io::Error::other(e)),
        }
    }
}
