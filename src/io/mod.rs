//! I/O module: BGZF compression and indexed access
//!
//! - [`compression`]: BGZF block codec, parallel writer, local file opening
//! - [`bgzf`]: virtual offsets and the seekable block reader
//! - [`tabix`]: index building and region queries over data files

pub mod bgzf;
pub mod compression;
pub mod tabix;

pub use bgzf::{BgzfReader, VirtualOffset};
pub use compression::{compress_file, is_bgzf, BgzfWriter, MMAP_THRESHOLD};
pub use tabix::{tabix_compress, tabix_index, IndexOptions, Records, TabixReader};
