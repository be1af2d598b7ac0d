//! TBI (Tabix) index format support
//!
//! This module implements reading, writing and querying of Tabix index files
//! (.tbi), which enable fast random access to sorted, tab-delimited,
//! BGZF-compressed genomic files.
//!
//! # Format Specification
//!
//! TBI files are binary indexes, themselves BGZF-compressed, with the
//! following structure (all integers little-endian):
//!
//! ## Header
//! - Magic: "TBI\1" (4 bytes)
//! - n_ref: Number of reference sequences (int32)
//! - format: File format (int32: 0=generic, 1=SAM, 2=VCF; `| 0x10000` for 0-based)
//! - col_seq: Column for sequence name (int32, 1-based)
//! - col_beg: Column for start position (int32, 1-based)
//! - col_end: Column for end position (int32, 0 if absent)
//! - meta: Comment character for header lines (int32)
//! - skip: Number of lines to skip (int32)
//! - l_nm: Length of concatenated sequence names (int32)
//! - names: Sequence names (null-terminated strings)
//!
//! ## Index Data (per reference)
//! - Binning index: n_bin, then per bin its id, n_chunk and chunk offset pairs
//! - Linear index: n_intv, then one virtual offset per 16 Kbp window
//!
//! Each reference also carries pseudo-bin 37450 with two chunks:
//! `(first record offset, end offset)` and `(record count, 0)`.
//!
//! ## Trailer
//! - n_no_coor: records without coordinates (uint64, optional)
//!
//! # Example
//!
//! ```no_run
//! use biotabix::formats::index::TbiIndex;
//!
//! # fn main() -> biotabix::Result<()> {
//! // Load index
//! let index = TbiIndex::from_path("features.gtf.gz.tbi")?;
//!
//! // Get metadata
//! println!("Schema: {:?}", index.schema());
//! println!("References: {}", index.references().len());
//!
//! // Plan a region query
//! let chunks = index.query_chunks("chr1", 1_000_000, 2_000_000);
//! for chunk in chunks {
//!     println!("Chunk: {} - {}", chunk.start, chunk.end);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{BiotabixError, Result};
use crate::formats::index::binning::{linear_window, reg2bins, PSEUDO_BIN};
use crate::formats::index::schema::TabixSchema;
use crate::io::bgzf::{BgzfReader, VirtualOffset};
use crate::io::compression::BgzfWriter;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// TBI file format magic string
const TBI_MAGIC: &[u8; 4] = b"TBI\x01";

/// A contiguous range of the data file, `[start, end)` in virtual offsets.
///
/// Chunks are the atomic units of data retrieval when querying regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// Virtual file offset where chunk starts
    pub start: VirtualOffset,
    /// Virtual file offset where chunk ends
    pub end: VirtualOffset,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(start: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { start, end }
    }
}

/// Summary carried by the pseudo-bin of each reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceMetadata {
    /// Offset of the first record of the reference
    pub first_offset: VirtualOffset,
    /// Offset just past the last record of the reference
    pub last_offset: VirtualOffset,
    /// Number of indexed records
    pub record_count: u64,
}

/// Reference sequence index data.
///
/// Bins are kept in a map keyed by bin id, ordered so that serialisation is
/// deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceIndex {
    /// Reference sequence name
    pub name: String,
    /// Bins for this reference (hierarchical spatial index)
    pub bins: BTreeMap<u32, Vec<Chunk>>,
    /// Linear index: virtual file offsets for 16 Kbp intervals
    pub intervals: Vec<VirtualOffset>,
    /// Pseudo-bin contents, when present
    pub metadata: Option<ReferenceMetadata>,
}

impl ReferenceIndex {
    /// Create a new empty reference index.
    pub fn new(name: String) -> Self {
        ReferenceIndex {
            name,
            bins: BTreeMap::new(),
            intervals: Vec::new(),
            metadata: None,
        }
    }

    /// Number of records indexed for this reference, if recorded
    pub fn record_count(&self) -> Option<u64> {
        self.metadata.map(|m| m.record_count)
    }

    /// Get the minimum virtual offset for a region using the linear index.
    ///
    /// No record overlapping a window starts before the offset stored for it.
    /// Positions past the last window fall back to the last entry.
    pub fn min_offset(&self, start: u64) -> VirtualOffset {
        if self.intervals.is_empty() {
            return VirtualOffset::default();
        }
        let window = linear_window(start).min(self.intervals.len() - 1);
        self.intervals[window]
    }
}

/// TBI (Tabix) index
///
/// Provides fast random access to sorted, tab-delimited, BGZF-compressed files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TbiIndex {
    /// Column schema the data file was indexed with
    schema: TabixSchema,
    /// Reference sequences, in order of first appearance
    references: Vec<ReferenceIndex>,
    /// Reference name to index mapping
    ref_map: HashMap<String, usize>,
    /// Records without coordinates
    n_no_coor: u64,
}

impl TbiIndex {
    /// Assemble an index from its parts
    pub fn new(schema: TabixSchema, references: Vec<ReferenceIndex>) -> Self {
        let ref_map = references
            .iter()
            .enumerate()
            .map(|(idx, r)| (r.name.clone(), idx))
            .collect();
        TbiIndex {
            schema,
            references,
            ref_map,
            n_no_coor: 0,
        }
    }

    /// Load TBI index from a file
    ///
    /// The artifact is normally BGZF-compressed; an uncompressed one is
    /// accepted as well.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;

        let mut magic = [0u8; 2];
        let n = read_up_to(&mut file, &mut magic)?;

        let index = if n == 2 && magic == [0x1f, 0x8b] {
            let mut reader = BgzfReader::new(file)?;
            Self::read(&mut reader)?
        } else {
            // Raw TBI; reopen since the magic was consumed
            let mut reader = BufReader::new(File::open(path)?);
            Self::read(&mut reader)?
        };

        debug!(
            "loaded index {} ({} references)",
            path.display(),
            index.references.len()
        );
        Ok(index)
    }

    /// Parse TBI index from an uncompressed byte stream
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        Self::parse(reader).map_err(|e| match e {
            BiotabixError::Io(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
                ) =>
            {
                BiotabixError::CorruptIndex(format!("truncated or unreadable index: {}", err))
            }
            other => other,
        })
    }

    fn parse<R: Read>(reader: &mut R) -> Result<Self> {
        // Read and verify magic string
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != TBI_MAGIC {
            return Err(BiotabixError::CorruptIndex(format!(
                "Invalid TBI magic: expected {:?}, got {:?}",
                TBI_MAGIC, magic
            )));
        }

        // Read header fields
        let n_ref = read_count(reader, "n_ref")?;
        let format = read_i32(reader)?;
        let col_seq = read_i32(reader)?;
        let col_beg = read_i32(reader)?;
        let col_end = read_i32(reader)?;
        let meta = read_i32(reader)?;
        let skip = read_i32(reader)?;
        let schema = TabixSchema::from_header(format, col_seq, col_beg, col_end, meta, skip)?;
        let l_nm = read_count(reader, "l_nm")?;

        // Read sequence names
        let mut names_buf = Vec::new();
        reader.take(l_nm as u64).read_to_end(&mut names_buf)?;
        if names_buf.len() != l_nm {
            return Err(BiotabixError::CorruptIndex(
                "truncated sequence name table".to_string(),
            ));
        }
        let names = parse_sequence_names(&names_buf)?;

        if names.len() != n_ref {
            return Err(BiotabixError::CorruptIndex(format!(
                "TBI header claims {} references but got {} names",
                n_ref,
                names.len()
            )));
        }

        // Parse index data for each reference
        let mut references = Vec::with_capacity(n_ref);
        for name in names {
            references.push(read_reference(reader, name)?);
        }

        // Trailing count is optional
        let mut trailer = [0u8; 8];
        let n_no_coor = if read_up_to(reader, &mut trailer)? == 8 {
            u64::from_le_bytes(trailer)
        } else {
            0
        };

        let mut index = TbiIndex::new(schema, references);
        index.n_no_coor = n_no_coor;
        Ok(index)
    }

    /// Serialise the index in uncompressed TBI layout.
    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut names = Vec::new();
        for reference in &self.references {
            names.extend_from_slice(reference.name.as_bytes());
            names.push(0);
        }

        writer.write_all(TBI_MAGIC)?;
        write_i32(writer, self.references.len() as i32)?;
        write_i32(writer, self.schema.format_code())?;
        write_i32(writer, self.schema.col_seq as i32)?;
        write_i32(writer, self.schema.col_beg as i32)?;
        write_i32(writer, self.schema.col_end as i32)?;
        write_i32(writer, i32::from(self.schema.meta_char))?;
        write_i32(writer, self.schema.skip_lines as i32)?;
        write_i32(writer, names.len() as i32)?;
        writer.write_all(&names)?;

        for reference in &self.references {
            let n_bin = reference.bins.len() + usize::from(reference.metadata.is_some());
            write_i32(writer, n_bin as i32)?;

            for (&bin_id, chunks) in &reference.bins {
                writer.write_all(&bin_id.to_le_bytes())?;
                write_i32(writer, chunks.len() as i32)?;
                for chunk in chunks {
                    writer.write_all(&chunk.start.as_raw().to_le_bytes())?;
                    writer.write_all(&chunk.end.as_raw().to_le_bytes())?;
                }
            }

            if let Some(meta) = reference.metadata {
                writer.write_all(&PSEUDO_BIN.to_le_bytes())?;
                write_i32(writer, 2)?;
                writer.write_all(&meta.first_offset.as_raw().to_le_bytes())?;
                writer.write_all(&meta.last_offset.as_raw().to_le_bytes())?;
                writer.write_all(&meta.record_count.to_le_bytes())?;
                writer.write_all(&0u64.to_le_bytes())?;
            }

            write_i32(writer, reference.intervals.len() as i32)?;
            for offset in &reference.intervals {
                writer.write_all(&offset.as_raw().to_le_bytes())?;
            }
        }

        writer.write_all(&self.n_no_coor.to_le_bytes())?;
        Ok(())
    }

    /// Write the BGZF-compressed artifact to `path`.
    ///
    /// The bytes go to a temporary file in the same directory which is then
    /// renamed over `path`, so readers never observe a partial artifact.
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = BgzfWriter::new(BufWriter::new(tmp.as_file()));
            self.write(&mut writer)?;
            writer.finish()?.flush()?;
        }
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Get the column schema
    pub fn schema(&self) -> &TabixSchema {
        &self.schema
    }

    /// Get all references
    pub fn references(&self) -> &[ReferenceIndex] {
        &self.references
    }

    /// Reference names in index order
    pub fn contig_names(&self) -> Vec<&str> {
        self.references.iter().map(|r| r.name.as_str()).collect()
    }

    /// Get reference by name
    pub fn get_reference(&self, name: &str) -> Option<&ReferenceIndex> {
        self.ref_map.get(name).map(|&idx| &self.references[idx])
    }

    /// Total number of indexed records, if every reference records it
    pub fn record_count(&self) -> Option<u64> {
        self.references.iter().map(|r| r.record_count()).sum()
    }

    /// Query region and get chunks to read
    ///
    /// Returns the merged, sorted list of file chunks that may hold records
    /// overlapping `[start, end)` (0-based, half-open). An unknown reference
    /// or an empty range yields no chunks.
    pub fn query_chunks(&self, ref_name: &str, start: u64, end: u64) -> Vec<Chunk> {
        let reference = match self.get_reference(ref_name) {
            Some(reference) => reference,
            None => return Vec::new(),
        };

        // Collect chunks from overlapping bins
        let mut chunks = Vec::new();
        for bin_id in reg2bins(start, end) {
            if let Some(bin_chunks) = reference.bins.get(&bin_id) {
                chunks.extend_from_slice(bin_chunks);
            }
        }

        // Chunks ending before the linear index lower bound cannot overlap
        let min_offset = reference.min_offset(start);
        chunks.retain(|chunk| chunk.end > min_offset);

        let merged = merge_chunks(chunks);
        debug!(
            "query {}:{}-{} resolved to {} chunk(s)",
            ref_name,
            start,
            end,
            merged.len()
        );
        merged
    }
}

fn read_reference<R: Read>(reader: &mut R, name: String) -> Result<ReferenceIndex> {
    let mut reference = ReferenceIndex::new(name);

    // Read binning index
    let n_bin = read_count(reader, "n_bin")?;
    for _ in 0..n_bin {
        let bin_id = read_u32(reader)?;
        let n_chunk = read_count(reader, "n_chunk")?;

        let mut chunks = Vec::with_capacity(n_chunk.min(1024));
        for _ in 0..n_chunk {
            let chunk_beg = read_u64(reader)?;
            let chunk_end = read_u64(reader)?;
            chunks.push(Chunk::new(
                VirtualOffset::from_raw(chunk_beg),
                VirtualOffset::from_raw(chunk_end),
            ));
        }

        if bin_id == PSEUDO_BIN {
            if chunks.len() != 2 {
                return Err(BiotabixError::CorruptIndex(format!(
                    "pseudo-bin of '{}' has {} chunks, expected 2",
                    reference.name,
                    chunks.len()
                )));
            }
            reference.metadata = Some(ReferenceMetadata {
                first_offset: chunks[0].start,
                last_offset: chunks[0].end,
                record_count: chunks[1].start.as_raw(),
            });
        } else if bin_id > PSEUDO_BIN {
            return Err(BiotabixError::CorruptIndex(format!(
                "bin id {} out of range in '{}'",
                bin_id, reference.name
            )));
        } else {
            reference.bins.entry(bin_id).or_default().extend(chunks);
        }
    }

    // Read linear index
    let n_intv = read_count(reader, "n_intv")?;
    reference.intervals.reserve(n_intv.min(1 << 16));
    for _ in 0..n_intv {
        reference
            .intervals
            .push(VirtualOffset::from_raw(read_u64(reader)?));
    }

    Ok(reference)
}

/// Parse null-terminated sequence names from buffer
fn parse_sequence_names(buf: &[u8]) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut start = 0;

    for (i, &byte) in buf.iter().enumerate() {
        if byte == 0 {
            if i > start {
                let name = std::str::from_utf8(&buf[start..i])
                    .map_err(|e| {
                        BiotabixError::CorruptIndex(format!(
                            "Invalid UTF-8 in sequence name: {}",
                            e
                        ))
                    })?
                    .to_string();
                names.push(name);
            }
            start = i + 1;
        }
    }

    Ok(names)
}

/// Sort chunks by start and merge overlapping or adjacent ones.
pub(crate) fn merge_chunks(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    if chunks.is_empty() {
        return chunks;
    }

    chunks.sort_by_key(|c| (c.start, c.end));

    let mut merged = Vec::with_capacity(chunks.len());
    let mut current = chunks[0];

    for chunk in chunks.into_iter().skip(1) {
        if chunk.start <= current.end {
            // Overlapping or adjacent - merge
            current.end = current.end.max(chunk.end);
        } else {
            // Non-overlapping - save current and start new
            merged.push(current);
            current = chunk;
        }
    }
    merged.push(current);

    merged
}

// Helper functions for binary data (little-endian)

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a non-negative int32 count
fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let value = read_i32(reader)?;
    usize::try_from(value)
        .map_err(|_| BiotabixError::CorruptIndex(format!("negative {}: {}", what, value)))
}

fn write_i32<W: Write>(writer: &mut W, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}
