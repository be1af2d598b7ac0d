//! Shared primitives for coordinate handling.
//!
//! # Example
//!
//! ```
//! use biotabix::formats::primitives::Region;
//!
//! let region: Region = "chr1:100-200".parse()?;
//! assert_eq!(region.start, Some(99));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod genomic;

pub use genomic::{Interval, Region};
