//! Genomic coordinate types.
//!
//! - [`Interval`]: a half-open coordinate range on one contig
//! - [`Region`]: a query region (`chr1`, `chr1:1,001-2,000`, `chr1:5000-`)
//!
//! # Coordinate System
//!
//! All intervals use **0-based, half-open** coordinates `[start, end)`:
//! - Start position is inclusive (0-based)
//! - End position is exclusive
//! - Length = end - start
//!
//! Region strings are written the way genome browsers and tabix write them,
//! 1-based and inclusive, and are converted on parsing.
//!
//! # Examples
//!
//! ```
//! use biotabix::formats::primitives::{Interval, Region};
//! use std::str::FromStr;
//!
//! let region = Region::from_str("chr1:1,001-2,000")?;
//! assert_eq!(region.contig, "chr1");
//! assert_eq!(region.start, Some(1000));
//! assert_eq!(region.end, Some(2000));
//!
//! let record = Interval::new(1500, 2500)?;
//! assert!(record.overlaps(1000, 2000));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{BiotabixError, Result};
use std::fmt;
use std::str::FromStr;

/// A half-open interval `[start, end)` on an implicit contig.
///
/// # Invariants
///
/// - `start < end` (enforced by constructor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Interval {
    /// Start position (0-based, inclusive).
    pub start: u64,

    /// End position (0-based, exclusive).
    pub end: u64,
}

impl Interval {
    /// Creates a new interval.
    ///
    /// # Errors
    ///
    /// Returns [`BiotabixError::InvalidRange`] if `start >= end`.
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start >= end {
            return Err(BiotabixError::InvalidRange(format!(
                "start ({}) >= end ({})",
                start, end
            )));
        }
        Ok(Interval { start, end })
    }

    /// Returns the length of this interval.
    #[inline]
    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    /// Checks whether this interval overlaps the half-open range `[start, end)`.
    ///
    /// Touching intervals do not overlap:
    ///
    /// ```
    /// # use biotabix::formats::primitives::Interval;
    /// let a = Interval::new(100, 200)?;
    /// assert!(a.overlaps(199, 300));
    /// assert!(!a.overlaps(200, 300));
    /// assert!(!a.overlaps(0, 100));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    #[inline]
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.start < end && self.end > start
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A query region: a contig with optional 0-based half-open bounds.
///
/// A missing `start` means the beginning of the contig, a missing `end` the
/// end of the contig.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Region {
    /// Contig name
    pub contig: String,
    /// Start position (0-based, inclusive)
    pub start: Option<u64>,
    /// End position (0-based, exclusive)
    pub end: Option<u64>,
}

impl Region {
    /// A region covering the whole of `contig`
    pub fn contig(contig: impl Into<String>) -> Self {
        Region {
            contig: contig.into(),
            start: None,
            end: None,
        }
    }

    /// A region with explicit 0-based half-open bounds
    pub fn new(contig: impl Into<String>, start: u64, end: u64) -> Result<Self> {
        if end < start {
            return Err(BiotabixError::InvalidRange(format!(
                "end ({}) < start ({})",
                end, start
            )));
        }
        Ok(Region {
            contig: contig.into(),
            start: Some(start),
            end: Some(end),
        })
    }
}

/// Parse a 1-based position, ignoring thousands separators
fn parse_position(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|&c| c != ',').collect();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Split `beg[-[end]]` into 0-based half-open bounds
fn parse_range(text: &str) -> Option<(Option<u64>, Option<u64>)> {
    match text.split_once('-') {
        None => Some((Some(parse_position(text)?.saturating_sub(1)), None)),
        Some((beg, "")) => Some((Some(parse_position(beg)?.saturating_sub(1)), None)),
        Some((beg, end)) => Some((
            Some(parse_position(beg)?.saturating_sub(1)),
            Some(parse_position(end)?),
        )),
    }
}

impl FromStr for Region {
    type Err = BiotabixError;

    /// Parses `contig`, `contig:beg`, `contig:beg-` or `contig:beg-end`.
    ///
    /// A suffix after the last `:` that is not a coordinate range is treated
    /// as part of the contig name.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(BiotabixError::InvalidRange("empty region".to_string()));
        }

        let (contig, start, end) = match s.rsplit_once(':') {
            Some((contig, range)) if !contig.is_empty() => match parse_range(range) {
                Some((start, end)) => (contig, start, end),
                None => (s, None, None),
            },
            _ => (s, None, None),
        };

        if let (Some(start), Some(end)) = (start, end) {
            if end < start {
                return Err(BiotabixError::InvalidRange(format!(
                    "region '{}' ends before it starts",
                    s
                )));
            }
        }

        Ok(Region {
            contig: contig.to_string(),
            start,
            end,
        })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.contig)?;
        match (self.start, self.end) {
            (None, None) => Ok(()),
            (start, None) => write!(f, ":{}-", start.unwrap_or(0) + 1),
            (start, Some(end)) => write!(f, ":{}-{}", start.unwrap_or(0) + 1, end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_new() {
        let interval = Interval::new(100, 200).unwrap();
        assert_eq!(interval.length(), 100);
        assert!(Interval::new(200, 200).is_err());
        assert!(Interval::new(200, 100).is_err());
    }

    #[test]
    fn test_overlaps_half_open() {
        let interval = Interval::new(100, 200).unwrap();
        assert!(interval.overlaps(150, 160));
        assert!(interval.overlaps(0, 101));
        assert!(interval.overlaps(199, 1000));
        assert!(!interval.overlaps(0, 100));
        assert!(!interval.overlaps(200, 300));
        // Empty query never overlaps
        assert!(!interval.overlaps(150, 150));
    }

    #[test]
    fn test_region_contig_only() {
        let region: Region = "chr1".parse().unwrap();
        assert_eq!(region, Region::contig("chr1"));
    }

    #[test]
    fn test_region_full_range() {
        let region: Region = "chr1:1,001-2,000".parse().unwrap();
        assert_eq!(region.contig, "chr1");
        assert_eq!(region.start, Some(1000));
        assert_eq!(region.end, Some(2000));
    }

    #[test]
    fn test_region_open_ended() {
        let region: Region = "chr2:5001".parse().unwrap();
        assert_eq!(region.start, Some(5000));
        assert_eq!(region.end, None);

        let region: Region = "chr2:5001-".parse().unwrap();
        assert_eq!(region.start, Some(5000));
        assert_eq!(region.end, None);
    }

    #[test]
    fn test_region_colon_in_name() {
        let region: Region = "HLA-A*01:01".parse().unwrap();
        assert_eq!(region.contig, "HLA-A*01");
        assert_eq!(region.start, Some(0));

        let region: Region = "scaffold:x".parse().unwrap();
        assert_eq!(region.contig, "scaffold:x");
        assert_eq!(region.start, None);
    }

    #[test]
    fn test_region_invalid() {
        assert!("".parse::<Region>().is_err());
        assert!("chr1:2000-1000".parse::<Region>().is_err());
        assert!(Region::new("chr1", 10, 5).is_err());
    }

    #[test]
    fn test_region_display() {
        let region: Region = "chr1:1,001-2,000".parse().unwrap();
        assert_eq!(region.to_string(), "chr1:1001-2000");
        assert_eq!(Region::contig("chrX").to_string(), "chrX");
    }
}
