use bytes::Bytes;

use super::{read_lock, CacheKey, FragmentCache};
use crate::BlobId;

/// A run of cached bytes at an absolute blob position, independent of fragment boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlobPart {
    blob_id: BlobId,
    start_position: u64,
    data: Bytes,
}

impl CachedBlobPart {
    pub fn new(blob_id: BlobId, start_position: u64, data: Bytes) -> Self {
        Self {
            blob_id,
            start_position,
            data,
        }
    }

    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    pub fn end_position(&self) -> u64 {
        self.start_position + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl FragmentCache {
    /// Collects the cached bytes following `start_position`, at most `max_length` of them.
    ///
    /// Parts are gathered in ascending order until the first gap between two of them. The
    /// first part is trimmed to `start_position` but is not required to begin there: when the
    /// first cached byte after `start_position` lies further ahead, the run starts at that byte.
    /// Callers must fill any leading gap themselves.
    pub fn get_cached_run(
        &self,
        blob_id: BlobId,
        start_position: u64,
        max_length: u64,
    ) -> Vec<CachedBlobPart> {
        let mut run = Vec::new();
        if max_length == 0 {
            return run;
        }

        let store = self.fragment_store();
        let fragment_size = self.fragment_size();
        let mut collected = 0u64;
        let mut prev_end: Option<u64> = None;

        for fragment_start in store.fragment_starts(blob_id) {
            if fragment_start.saturating_add(fragment_size) < start_position {
                continue;
            }
            let Some(fragment) = store.fragment(CacheKey::new(blob_id, fragment_start)) else {
                continue;
            };
            let fragment = read_lock(&fragment);

            for part in fragment.parts() {
                let abs_start = fragment_start + part.start();
                let abs_end = fragment_start + part.end();
                if abs_end < start_position {
                    continue;
                }
                if prev_end.is_some_and(|prev| prev != abs_start) {
                    return run;
                }

                let skip = start_position.saturating_sub(abs_start);
                let take = (part.len() as u64 - skip).min(max_length - collected);
                if take > 0 {
                    let from = skip as usize;
                    run.push(CachedBlobPart::new(
                        blob_id,
                        abs_start + skip,
                        Bytes::copy_from_slice(&part.data()[from..from + take as usize]),
                    ));
                }
                collected += take;
                if collected >= max_length {
                    return run;
                }
                prev_end = Some(abs_end);
            }
        }
        run
    }
}
