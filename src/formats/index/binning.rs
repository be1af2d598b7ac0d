//! Fixed hierarchical binning scheme shared by tabix and BAI indexes.
//!
//! The coordinate space `[0, 2^29)` is divided into 6 levels of bins:
//! - Level 0: bin 0 (entire sequence, 512 Mbp)
//! - Level 1: bins 1-8 (64 Mbp each)
//! - Level 2: bins 9-72 (8 Mbp each)
//! - Level 3: bins 73-584 (1 Mbp each)
//! - Level 4: bins 585-4680 (128 Kbp each)
//! - Level 5: bins 4681-37448 (16 Kbp each)
//!
//! An interval is assigned to the smallest bin that fully contains it.
//! Bins are plain integers so an index stores them in a flat map keyed by id.

/// log2 of the finest bin width and of the linear index window (16 Kbp)
pub const MIN_SHIFT: u32 = 14;

/// Number of levels below the root bin
pub const DEPTH: u32 = 5;

/// Exclusive upper bound of indexable coordinates (512 Mbp)
pub const MAX_COORDINATE: u64 = 1 << (MIN_SHIFT + 3 * DEPTH);

/// Bin id reserved for per-reference metadata (offset range and record count)
pub const PSEUDO_BIN: u32 = 37450;

/// Index of the first bin on `level` (0 = root)
#[inline]
pub fn level_offset(level: u32) -> u32 {
    ((1 << (3 * level)) - 1) / 7
}

/// Compute the bin of the half-open interval `[beg, end)`.
///
/// `end` must be greater than `beg`; both are clamped into the indexable range.
///
/// ```
/// # use biotabix::formats::index::binning::reg2bin;
/// assert_eq!(reg2bin(0, 1), 4681);
/// assert_eq!(reg2bin(0, 1 << 29), 0);
/// ```
pub fn reg2bin(beg: u64, end: u64) -> u32 {
    let beg = beg.min(MAX_COORDINATE - 1);
    let end = end.clamp(beg + 1, MAX_COORDINATE) - 1;

    let mut shift = MIN_SHIFT;
    for level in (1..=DEPTH).rev() {
        if beg >> shift == end >> shift {
            return level_offset(level) + (beg >> shift) as u32;
        }
        shift += 3;
    }
    0
}

/// List every bin that may hold an interval overlapping `[beg, end)`.
///
/// Bins come out level by level, ascending within each level. An empty
/// interval yields no bins.
pub fn reg2bins(beg: u64, end: u64) -> Vec<u32> {
    if beg >= end || beg >= MAX_COORDINATE {
        return Vec::new();
    }
    let end = end.min(MAX_COORDINATE) - 1;

    let mut bins = Vec::new();
    for level in 0..=DEPTH {
        let shift = MIN_SHIFT + 3 * (DEPTH - level);
        let offset = level_offset(level);
        let first = offset + (beg >> shift) as u32;
        let last = offset + (end >> shift) as u32;
        bins.extend(first..=last);
    }
    bins
}

/// Linear index window holding coordinate `pos`
#[inline]
pub fn linear_window(pos: u64) -> usize {
    (pos >> MIN_SHIFT) as usize
}
