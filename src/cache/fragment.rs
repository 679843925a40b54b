use std::fmt;

use super::{CacheError, Range};
use crate::BlobId;

/// Identity of a fragment: the blob and the fragment-aligned offset it starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub blob_id: BlobId,
    pub fragment_start: u64,
}

impl CacheKey {
    pub fn new(blob_id: BlobId, fragment_start: u64) -> Self {
        Self {
            blob_id,
            fragment_start,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheKey{{blob_id={};fragment_start={}}}",
            self.blob_id, self.fragment_start
        )
    }
}

/// A contiguous run of known bytes, positioned relative to its fragment's start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPart {
    start: u64,
    data: Vec<u8>,
}

impl FragmentPart {
    pub fn new(start_in_fragment: u64, data: Vec<u8>) -> Self {
        Self {
            start: start_in_fragment,
            data,
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// `start + data.len()`, exclusive.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The part as the half-open range `[start, end)`.
    pub fn as_range(&self) -> Result<Range<u64>, CacheError> {
        Range::closed_open(self.start, self.end())
    }

    /// Copies `bytes` over the part's data, `start_in_fragment` being relative to the fragment.
    ///
    /// The caller guarantees that the written range lies inside the part.
    pub(crate) fn overwrite(&mut self, start_in_fragment: u64, bytes: &[u8]) {
        let from = (start_in_fragment - self.start) as usize;
        self.data[from..from + bytes.len()].copy_from_slice(bytes);
    }
}

/// A fixed-size slice of a blob's address space and the parts of it that are cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    blob_id: BlobId,
    start_position: u64,
    parts: Vec<FragmentPart>,
}

impl Fragment {
    pub fn new(blob_id: BlobId, start_position: u64) -> Self {
        Self {
            blob_id,
            start_position,
            parts: Vec::new(),
        }
    }

    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    pub fn start_position(&self) -> u64 {
        self.start_position
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.blob_id, self.start_position)
    }

    /// Parts sorted ascending by their start. Use [`Fragment::insert_part`] to add to them.
    pub fn parts(&self) -> &[FragmentPart] {
        &self.parts
    }

    pub(crate) fn parts_mut(&mut self) -> &mut [FragmentPart] {
        &mut self.parts
    }

    /// Inserts a part, keeping the list ordered. Parts with an equal start stay in front.
    pub fn insert_part(&mut self, part: FragmentPart) {
        let idx = self
            .parts
            .iter()
            .position(|existing| existing.start() > part.start())
            .unwrap_or(self.parts.len());
        self.parts.insert(idx, part);
    }

    pub(crate) fn take_parts(&mut self) -> Vec<FragmentPart> {
        std::mem::take(&mut self.parts)
    }

    pub(crate) fn set_parts(&mut self, parts: Vec<FragmentPart>) {
        self.parts = parts;
    }
}
