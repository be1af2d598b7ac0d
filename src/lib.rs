//! biotabix: indexed interval retrieval for sorted, BGZF-compressed genomic files
//!
//! # Overview
//!
//! biotabix builds and reads tabix indexes. A sorted tab-delimited file
//! (GFF/GTF, BED, VCF, SAM, ...) is compressed into independent BGZF blocks,
//! and a binned index maps each contig and coordinate range to the blocks
//! holding its records. Region queries then decompress only those blocks.
//!
//! ## Quick Start
//!
//! ```no_run
//! use biotabix::{tabix_index, IndexOptions, Preset, TabixReader};
//!
//! # fn main() -> biotabix::Result<()> {
//! // Compress and index (writes features.gtf.gz and features.gtf.gz.tbi)
//! let data = tabix_index("features.gtf", &IndexOptions::preset(Preset::Gff))?;
//!
//! // Query, 0-based half-open
//! let reader = TabixReader::open(&data)?;
//! for line in reader.fetch(Some("chr1"), Some(1_000), Some(5_000))? {
//!     println!("{}", line?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`io`]: BGZF compression, seekable reading, and the tabix reader
//! - [`formats`]: coordinate primitives and the tabix index itself
//! - [`error`]: the crate error type
//!
//! Logging goes through the [`log`] facade; install any logger to see it.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod formats;
pub mod io;

// Re-export commonly used types
pub use error::{BiotabixError, Result};
pub use formats::index::{Preset, TabixSchema, TbiIndex};
pub use formats::primitives::{Interval, Region};
pub use io::bgzf::{BgzfReader, VirtualOffset};
pub use io::tabix::{tabix_compress, tabix_index, IndexOptions, Records, TabixReader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
