//! Tabix index for sorted, tab-delimited, BGZF-compressed files
//!
//! - [`binning`]: the fixed 6-level bin hierarchy and linear windows
//! - [`schema`]: column schemas and the preset table
//! - [`builder`]: streaming index construction
//! - [`tbi`]: the in-memory index, its binary format and chunk queries
//!
//! # Overview
//!
//! A tabix index maps each contig to a set of bins (spatial buckets of the
//! coordinate space) holding chunks of the data file, plus a linear index of
//! the first record offset per 16 Kbp window. A region query turns into a
//! short, sorted list of chunks; only those are decompressed and scanned.
//!
//! # Example
//!
//! ```no_run
//! use biotabix::formats::index::{Preset, TbiIndex};
//!
//! # fn main() -> biotabix::Result<()> {
//! let index = TbiIndex::build("features.gtf.gz", &Preset::Gff.schema())?;
//!
//! let chunks = index.query_chunks("chr1", 1_000_000, 2_000_000);
//! println!("Found {} chunks for region", chunks.len());
//! # Ok(())
//! # }
//! ```

pub mod binning;
pub mod builder;
pub mod schema;
pub mod tbi;

pub use builder::TbiBuilder;
pub use schema::{Preset, TabixSchema, TbiFormat};
pub use tbi::{Chunk, ReferenceIndex, TbiIndex};
