//! Splitting a byte source into ordered, fixed-size chunk ranges.

use std::ops::Range;

/// Byte range of a single chunk, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u32,
    pub start: u64,
    pub end: u64,
}

impl ChunkRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<u64> {
        self.start..self.end
    }
}

/// Number of chunks needed to cover `size` bytes, i.e. `ceil(size / chunk_size)`.
///
/// # Panics
///
/// Panics if `chunk_size` is zero or the count does not fit in a `u32`.
pub fn chunk_count(size: u64, chunk_size: u64) -> u32 {
    assert!(chunk_size > 0, "chunk size must be greater than zero");
    let count = size.div_ceil(chunk_size);
    u32::try_from(count).expect("chunk count exceeds u32::MAX")
}

/// Divide `size` bytes into `ceil(size / chunk_size)` ranges; the last one may be shorter.
///
/// # Panics
///
/// Panics if `chunk_size` is zero.
pub fn split(size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let count = chunk_count(size, chunk_size);
    (0..count)
        .map(|index| {
            let start = u64::from(index) * chunk_size;
            let end = size.min(start + chunk_size);
            ChunkRange { index, start, end }
        })
        .collect()
}
