//! Indexed access to sorted, tab-delimited, BGZF-compressed files.
//!
//! Two entry points:
//!
//! - [`tabix_index`]: compress (if needed) and index a sorted data file
//! - [`TabixReader::fetch`]: lazily iterate the lines overlapping a region
//!
//! # Example
//!
//! ```no_run
//! use biotabix::io::tabix::{tabix_index, IndexOptions, TabixReader};
//! use biotabix::formats::index::Preset;
//!
//! # fn main() -> biotabix::Result<()> {
//! let data = tabix_index("features.gtf", &IndexOptions::preset(Preset::Gff))?;
//!
//! let reader = TabixReader::open(&data)?;
//! for line in reader.fetch(Some("chr1"), Some(10_000), Some(20_000))? {
//!     println!("{}", line?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Query semantics
//!
//! Coordinates are 0-based half-open. A line matches `[start, end)` when its
//! interval `[s, e)` satisfies `s < end && e > start`, for two-sided and
//! one-sided queries alike. Every call to `fetch` opens its own file handle,
//! so iterators are independent of each other and of the reader.

use crate::error::{BiotabixError, Result};
use crate::formats::index::binning::MAX_COORDINATE;
use crate::formats::index::schema::{Preset, TabixSchema};
use crate::formats::index::tbi::{Chunk, TbiIndex};
use crate::formats::primitives::Region;
use crate::io::bgzf::BgzfReader;
use crate::io::compression::{compress_file, is_bgzf, open_local_file, SeekRead};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Append `.ext` to a path without replacing an existing extension
fn with_suffix(path: &Path, ext: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Default index location for a data file: `<data>.tbi`
pub fn default_index_path<P: AsRef<Path>>(data_path: P) -> PathBuf {
    with_suffix(data_path.as_ref(), "tbi")
}

/// Options for [`tabix_index`].
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Column layout of the data file
    pub schema: TabixSchema,
    /// Overwrite an existing compressed file or index
    pub force: bool,
    /// Index location; defaults to `<data>.tbi`
    pub index_path: Option<PathBuf>,
}

impl IndexOptions {
    /// Options for an explicit schema
    pub fn new(schema: TabixSchema) -> Self {
        IndexOptions {
            schema,
            force: false,
            index_path: None,
        }
    }

    /// Options for a named preset
    pub fn preset(preset: Preset) -> Self {
        Self::new(preset.schema())
    }

    /// Allow overwriting existing outputs
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Write the index somewhere other than `<data>.tbi`
    pub fn index_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.index_path = Some(path.into());
        self
    }
}

/// Index a sorted tab-delimited file.
///
/// A file that is not BGZF-compressed is first compressed to `<path>.gz`
/// (the original is kept). The index is written to `<data>.tbi` unless
/// `options.index_path` says otherwise. Existing outputs are only replaced
/// with `options.force`. A failed build leaves no index behind.
///
/// Returns the path of the indexed (compressed) data file.
pub fn tabix_index<P: AsRef<Path>>(path: P, options: &IndexOptions) -> Result<PathBuf> {
    let path = path.as_ref();
    options.schema.validate()?;

    let data_path = if is_bgzf(path)? {
        path.to_path_buf()
    } else {
        let compressed = with_suffix(path, "gz");
        debug!(
            "{} is not BGZF, compressing to {}",
            path.display(),
            compressed.display()
        );
        compress_file(path, &compressed, options.force)?;
        compressed
    };

    let index_path = options
        .index_path
        .clone()
        .unwrap_or_else(|| default_index_path(&data_path));
    if index_path.exists() && !options.force {
        return Err(BiotabixError::FileExists(index_path));
    }

    let index = TbiIndex::build(&data_path, &options.schema)?;
    index.write_to_path(&index_path)?;

    info!(
        "indexed {} ({} contigs, {} records) -> {}",
        data_path.display(),
        index.references().len(),
        index.record_count().unwrap_or(0),
        index_path.display()
    );
    Ok(data_path)
}

/// BGZF-compress `src` into `dst`, refusing to overwrite unless `force`.
pub fn tabix_compress<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q, force: bool) -> Result<()> {
    compress_file(src, dst, force)
}

/// Handle on an indexed data file.
///
/// The index is loaded eagerly and is immutable; the data file is opened
/// anew by every iterator.
#[derive(Debug, Clone)]
pub struct TabixReader {
    data_path: PathBuf,
    index: TbiIndex,
}

impl TabixReader {
    /// Open `path` with its index at `<path>.tbi`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        Self::open_with_index(path, default_index_path(path))
    }

    /// Open `path` with an index at an explicit location.
    pub fn open_with_index<P: AsRef<Path>, Q: AsRef<Path>>(path: P, index_path: Q) -> Result<Self> {
        let data_path = path.as_ref().to_path_buf();
        let index_path = index_path.as_ref();

        if !is_bgzf(&data_path)? {
            return Err(BiotabixError::NotBgzf(data_path));
        }
        let index = TbiIndex::from_path(index_path)?;

        let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
        if let (Some(data_time), Some(index_time)) = (modified(&data_path), modified(index_path)) {
            if index_time < data_time {
                warn!(
                    "index {} is older than data file {}",
                    index_path.display(),
                    data_path.display()
                );
            }
        }

        Ok(TabixReader { data_path, index })
    }

    /// Path of the data file
    pub fn path(&self) -> &Path {
        &self.data_path
    }

    /// The loaded index
    pub fn index(&self) -> &TbiIndex {
        &self.index
    }

    /// Schema the file was indexed with
    pub fn schema(&self) -> &TabixSchema {
        self.index.schema()
    }

    /// Contig names in index order
    pub fn contigs(&self) -> Vec<&str> {
        self.index.contig_names()
    }

    /// Leading header lines: the first `skip_lines` lines and any meta lines
    /// before the first record.
    pub fn header(&self) -> Result<Vec<String>> {
        let schema = self.schema();
        let mut reader = self.open_data()?;
        let mut line = Vec::new();
        let mut header = Vec::new();

        while reader.read_line(&mut line)? {
            strip_cr(&mut line);
            let is_header = header.len() < schema.skip_lines
                || line.first() == Some(&schema.meta_char);
            if !is_header {
                break;
            }
            header.push(to_string(&line, header.len() + 1)?);
        }
        Ok(header)
    }

    fn open_data(&self) -> Result<BgzfReader<Box<dyn SeekRead>>> {
        BgzfReader::new(open_local_file(&self.data_path)?)
    }

    /// Lines overlapping a region.
    ///
    /// - no contig: every record of the file in file order (coordinates
    ///   must then be absent)
    /// - `start` defaults to 0, `end` to the end of the contig; a `start`
    ///   past every record yields nothing
    /// - an unknown contig or an empty range yields nothing
    ///
    /// Fails with [`BiotabixError::InvalidRange`] before any I/O when
    /// `end < start`.
    pub fn fetch(
        &self,
        contig: Option<&str>,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<Records> {
        let contig = match contig {
            Some(contig) => contig,
            None => {
                if start.is_some() || end.is_some() {
                    return Err(BiotabixError::InvalidRange(
                        "coordinates given without a contig".to_string(),
                    ));
                }
                return Ok(Records::full_scan(self.open_data()?, self.schema().clone()));
            }
        };

        let start = start.unwrap_or(0);
        // An open end reaches past any indexable record, even for a start
        // beyond the coordinate limit
        let end = end.unwrap_or_else(|| MAX_COORDINATE.max(start));
        if end < start {
            return Err(BiotabixError::InvalidRange(format!(
                "end ({}) < start ({}) for {}",
                end, start, contig
            )));
        }

        let chunks = self.index.query_chunks(contig, start, end);
        if chunks.is_empty() {
            return Ok(Records::empty(self.schema().clone()));
        }

        Ok(Records {
            reader: Some(self.open_data()?),
            schema: self.schema().clone(),
            mode: Mode::Region(RegionScan {
                contig: contig.to_string(),
                start,
                end,
                chunks,
                next_chunk: 0,
                current: None,
            }),
            line: Vec::new(),
            line_no: 0,
        })
    }

    /// Lines overlapping a parsed [`Region`]
    pub fn fetch_region(&self, region: &Region) -> Result<Records> {
        self.fetch(Some(region.contig.as_str()), region.start, region.end)
    }
}

/// Scan state for a region query
#[derive(Debug)]
struct RegionScan {
    contig: String,
    start: u64,
    end: u64,
    chunks: Vec<Chunk>,
    next_chunk: usize,
    /// Chunk being read
    current: Option<Chunk>,
}

#[derive(Debug)]
enum Mode {
    Full,
    Region(RegionScan),
    Done,
}

/// Lazy sequence of matching lines (without line terminators).
///
/// Owns its own file handle and decompression buffer; both are released
/// when the iterator is dropped. The first error ends the sequence.
pub struct Records {
    reader: Option<BgzfReader<Box<dyn SeekRead>>>,
    schema: TabixSchema,
    mode: Mode,
    line: Vec<u8>,
    /// Lines read so far in a full scan
    line_no: usize,
}

impl Records {
    fn full_scan(reader: BgzfReader<Box<dyn SeekRead>>, schema: TabixSchema) -> Self {
        Records {
            reader: Some(reader),
            schema,
            mode: Mode::Full,
            line: Vec::new(),
            line_no: 0,
        }
    }

    fn empty(schema: TabixSchema) -> Self {
        Records {
            reader: None,
            schema,
            mode: Mode::Done,
            line: Vec::new(),
            line_no: 0,
        }
    }

    fn finish(&mut self) {
        self.mode = Mode::Done;
        self.reader = None;
    }

    fn next_full(&mut self) -> Result<Option<String>> {
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };

        while reader.read_line(&mut self.line)? {
            self.line_no += 1;
            strip_cr(&mut self.line);
            if self.line_no <= self.schema.skip_lines || self.schema.is_meta(&self.line) {
                continue;
            }
            return to_string(&self.line, self.line_no).map(Some);
        }
        Ok(None)
    }

    fn next_in_region(&mut self) -> Result<Option<String>> {
        let (reader, scan) = match (self.reader.as_mut(), &mut self.mode) {
            (Some(reader), Mode::Region(scan)) => (reader, scan),
            _ => return Ok(None),
        };

        loop {
            let chunk = match scan.current {
                Some(chunk) => chunk,
                None => {
                    let chunk = match scan.chunks.get(scan.next_chunk) {
                        Some(&chunk) => chunk,
                        None => return Ok(None),
                    };
                    scan.next_chunk += 1;
                    reader.seek(chunk.start)?;
                    scan.current = Some(chunk);
                    chunk
                }
            };

            if reader.virtual_position() >= chunk.end {
                scan.current = None;
                continue;
            }
            if !reader.read_line(&mut self.line)? {
                return Ok(None);
            }
            strip_cr(&mut self.line);
            if self.schema.is_meta(&self.line) {
                continue;
            }

            let (contig, interval) = self.schema.parse_line(&self.line, 0)?;
            if contig != scan.contig || interval.start >= scan.end {
                // Sorted input: nothing further can match
                return Ok(None);
            }
            if interval.overlaps(scan.start, scan.end) {
                return to_string(&self.line, 0).map(Some);
            }
        }
    }
}

impl Iterator for Records {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = match self.mode {
            Mode::Full => self.next_full(),
            Mode::Region(_) => self.next_in_region(),
            Mode::Done => return None,
        };

        match next {
            Ok(Some(line)) => Some(Ok(line)),
            Ok(None) => {
                debug!("record iterator exhausted");
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl std::iter::FusedIterator for Records {}

impl fmt::Debug for Records {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Records")
            .field("mode", &self.mode)
            .field("line_no", &self.line_no)
            .finish_non_exhaustive()
    }
}

fn strip_cr(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}

fn to_string(line: &[u8], line_no: usize) -> Result<String> {
    String::from_utf8(line.to_vec()).map_err(|e| BiotabixError::InvalidRecord {
        line: line_no,
        msg: format!("line is not valid UTF-8: {}", e),
    })
}
