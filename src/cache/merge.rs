use tracing::trace;

use super::{
    write_lock, CacheError, Fragment, FragmentCache, FragmentPart, FragmentedWrite, Range,
    RangeRelation,
};
use crate::BlobId;

impl FragmentCache {
    /// Merges `data`, written at the absolute `offset` of a blob, into the cache.
    ///
    /// The write is split along fragment boundaries. The first and last slices are merged into
    /// whatever their fragments already hold. A fragment covered by a middle slice is
    /// replaced outright.
    pub fn store_range(&self, blob_id: BlobId, offset: u64, data: &[u8]) -> Result<(), CacheError> {
        if data.is_empty() {
            return Ok(());
        }
        if offset.checked_add(data.len() as u64).is_none() {
            return Err(CacheError::InvalidArgument(format!(
                "range at offset {} with length {} exceeds the addressable blob size",
                offset,
                data.len()
            )));
        }

        let fragment_size = self.fragment_size();
        let slices: Vec<_> = FragmentedWrite::new(data, offset, fragment_size).collect();
        let last = slices.len() - 1;
        for (idx, slice) in slices.iter().enumerate() {
            let fragment = self
                .fragment_store()
                .get_or_create_fragment(blob_id, slice.fragment_start);
            let mut fragment = write_lock(&fragment);
            if idx == 0 || idx == last {
                merge_partial(&mut fragment, slice.offset_in_fragment, slice.data)?;
            } else {
                replace_all(&mut fragment, slice.data);
            }
        }

        trace!(blob_id, offset, len = data.len(), fragments = slices.len(), "stored range");
        self.metrics.bytes_cached(data.len());
        Ok(())
    }
}

/// Replaces the content of a fragment that the new bytes cover completely.
fn replace_all(fragment: &mut Fragment, bytes: &[u8]) {
    fragment.set_parts(vec![FragmentPart::new(0, bytes.to_vec())]);
}

/// Merges `bytes`, starting at `rel_start` inside the fragment, with the parts already there.
///
/// The written range is taken as closed on both ends against the half-open parts, so a part
/// starting right where the write ends is folded into the merged part.
pub(crate) fn merge_partial(
    fragment: &mut Fragment,
    rel_start: u64,
    bytes: &[u8],
) -> Result<(), CacheError> {
    if fragment.parts().is_empty() {
        fragment.insert_part(FragmentPart::new(rel_start, bytes.to_vec()));
        return Ok(());
    }

    let rel_end = rel_start + bytes.len() as u64;
    let new_range = Range::closed(rel_start, rel_end)?;

    let mut before = None;
    let mut after = None;
    let mut inner = Vec::new();
    let mut enclosing = None;
    for (idx, part) in fragment.parts().iter().enumerate() {
        match new_range.relation_to(&part.as_range()?)? {
            RangeRelation::Containing | RangeRelation::Identical => {
                enclosing = Some(idx);
                break;
            }
            RangeRelation::BeforeOverlapping => before = Some(idx),
            RangeRelation::AfterOverlapping => after = Some(idx),
            RangeRelation::Contained => inner.push(idx),
            RangeRelation::Before | RangeRelation::After => {}
        }
    }
    if let Some(idx) = enclosing {
        fragment.parts_mut()[idx].overwrite(rel_start, bytes);
        return Ok(());
    }

    let merged = {
        let parts = fragment.parts();
        let mut start = rel_start;
        let mut data = Vec::with_capacity(bytes.len());
        if let Some(idx) = before {
            let part = &parts[idx];
            start = part.start();
            data.extend_from_slice(&part.data()[..(rel_start - part.start()) as usize]);
        }
        data.extend_from_slice(bytes);
        if let Some(idx) = after {
            let part = &parts[idx];
            data.extend_from_slice(&part.data()[(rel_end - part.start()) as usize..]);
        }
        FragmentPart::new(start, data)
    };

    let mut parts: Vec<FragmentPart> = fragment
        .take_parts()
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| Some(*idx) != before && Some(*idx) != after && !inner.contains(idx))
        .map(|(_, part)| part)
        .collect();
    let at = parts
        .iter()
        .position(|part| part.start() > merged.start())
        .unwrap_or(parts.len());
    parts.insert(at, merged);
    fragment.set_parts(parts);
    Ok(())
}
