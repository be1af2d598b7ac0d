//! Tab-delimited genomic formats and their indexes.
//!
//! - [`primitives`]: coordinate types shared by index building and querying
//! - [`index`]: the tabix index (binning scheme, column schema, builder, artifact)

pub mod index;
pub mod primitives;

pub use index::{Preset, TabixSchema, TbiBuilder, TbiIndex};
pub use primitives::{Interval, Region};
