/// One fragment's share of a write. `data` borrows from the original buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentSlice<'a> {
    pub fragment_start: u64,
    pub offset_in_fragment: u64,
    pub data: &'a [u8],
}

impl FragmentSlice<'_> {
    pub fn covers_whole_fragment(&self, fragment_size: u64) -> bool {
        self.offset_in_fragment == 0 && self.data.len() as u64 == fragment_size
    }
}

/// Splits a write at `position` along fragment boundaries without copying.
///
/// The first slice runs up to the next boundary, the middle slices are exactly one fragment
/// long, and the last slice holds whatever remains.
#[derive(Debug, Clone)]
pub struct FragmentedWrite<'a> {
    remaining: &'a [u8],
    position: u64,
    fragment_size: u64,
}

impl<'a> FragmentedWrite<'a> {
    pub fn new(data: &'a [u8], position: u64, fragment_size: u64) -> Self {
        debug_assert!(fragment_size > 0);
        Self {
            remaining: data,
            position,
            fragment_size,
        }
    }
}

impl<'a> Iterator for FragmentedWrite<'a> {
    type Item = FragmentSlice<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let offset_in_fragment = self.position % self.fragment_size;
        let room = self.fragment_size - offset_in_fragment;
        let take = (self.remaining.len() as u64).min(room) as usize;
        let (data, rest) = self.remaining.split_at(take);

        let slice = FragmentSlice {
            fragment_start: self.position - offset_in_fragment,
            offset_in_fragment,
            data,
        };
        self.remaining = rest;
        self.position += take as u64;
        Some(slice)
    }
}
