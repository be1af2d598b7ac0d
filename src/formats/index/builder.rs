//! Streaming construction of tabix indexes.
//!
//! [`TbiBuilder`] consumes records in file order, each with the virtual
//! offsets where it starts and ends, and accumulates the binning and linear
//! indexes of the reference it belongs to. When the contig changes the
//! finished reference is flushed into the index.
//!
//! # Chunk bookkeeping
//!
//! Consecutive records falling in the same bin extend one pending chunk; a
//! change of bin closes the chunk and files it under its bin. When a
//! reference is flushed, chunks of a bin that end in the same BGZF block
//! where the next one starts are merged, since reading one means reading
//! the other anyway.
//!
//! # Example
//!
//! ```no_run
//! use biotabix::formats::index::{Preset, TbiIndex};
//!
//! # fn main() -> biotabix::Result<()> {
//! let index = TbiIndex::build("features.gtf.gz", &Preset::Gff.schema())?;
//! index.write_to_path("features.gtf.gz.tbi")?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BiotabixError, Result};
use crate::formats::index::binning::{linear_window, reg2bin};
use crate::formats::index::schema::TabixSchema;
use crate::formats::index::tbi::{Chunk, ReferenceIndex, ReferenceMetadata, TbiIndex};
use crate::formats::primitives::Interval;
use crate::io::bgzf::{BgzfReader, VirtualOffset};
use crate::io::compression::{is_bgzf, open_local_file};
use log::debug;
use std::collections::{BTreeMap, HashSet};
use std::io::{Read, Seek};
use std::path::Path;

/// State of the reference currently being indexed
#[derive(Debug)]
struct OpenReference {
    name: String,
    bins: BTreeMap<u32, Vec<Chunk>>,
    /// Linear index; `None` marks windows no record has touched yet
    intervals: Vec<Option<VirtualOffset>>,
    /// Start of the previous record, for the sort check
    last_start: u64,
    /// Bin and start offset of the chunk being extended
    pending: Option<(u32, VirtualOffset)>,
    /// End offset of the previous record
    last_offset: VirtualOffset,
    first_offset: VirtualOffset,
    record_count: u64,
}

impl OpenReference {
    fn new(name: String, first_offset: VirtualOffset) -> Self {
        OpenReference {
            name,
            bins: BTreeMap::new(),
            intervals: Vec::new(),
            last_start: 0,
            pending: None,
            last_offset: first_offset,
            first_offset,
            record_count: 0,
        }
    }

    /// Close the pending chunk and finalise bins and linear index
    fn finish(mut self) -> ReferenceIndex {
        if let Some((bin, start)) = self.pending.take() {
            self.bins
                .entry(bin)
                .or_default()
                .push(Chunk::new(start, self.last_offset));
        }

        for chunks in self.bins.values_mut() {
            merge_same_block(chunks);
        }

        // Windows before the first record point at it; gaps inherit
        // the preceding window
        let mut fill = self.first_offset;
        let intervals = self
            .intervals
            .into_iter()
            .map(|slot| {
                if let Some(offset) = slot {
                    fill = offset;
                }
                fill
            })
            .collect();

        ReferenceIndex {
            name: self.name,
            bins: self.bins,
            intervals,
            metadata: Some(ReferenceMetadata {
                first_offset: self.first_offset,
                last_offset: self.last_offset,
                record_count: self.record_count,
            }),
        }
    }
}

/// Merge chunks whose end lies in the same or a later block than the next
/// chunk's start
fn merge_same_block(chunks: &mut Vec<Chunk>) {
    if chunks.len() < 2 {
        return;
    }
    chunks.sort_by_key(|c| c.start);

    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks.drain(..) {
        match merged.last_mut() {
            Some(last) if last.end.compressed_offset() >= chunk.start.compressed_offset() => {
                last.end = last.end.max(chunk.end);
            }
            _ => merged.push(chunk),
        }
    }
    *chunks = merged;
}

/// Incremental tabix index builder.
///
/// Records must arrive grouped by contig and sorted by start within a
/// contig; anything else fails with [`BiotabixError::SortOrder`].
#[derive(Debug)]
pub struct TbiBuilder {
    schema: TabixSchema,
    references: Vec<ReferenceIndex>,
    seen: HashSet<String>,
    current: Option<OpenReference>,
}

impl TbiBuilder {
    /// Start an empty index for files laid out as `schema` describes
    pub fn new(schema: TabixSchema) -> Self {
        TbiBuilder {
            schema,
            references: Vec::new(),
            seen: HashSet::new(),
            current: None,
        }
    }

    /// Add one record occupying `[start, end)` in the data file.
    ///
    /// `line` (1-based) is reported in sort-order errors.
    pub fn push(
        &mut self,
        contig: &str,
        interval: Interval,
        start: VirtualOffset,
        end: VirtualOffset,
        line: usize,
    ) -> Result<()> {
        let same_contig = self
            .current
            .as_ref()
            .map_or(false, |r| r.name == contig);

        if !same_contig {
            if self.seen.contains(contig) {
                return Err(BiotabixError::SortOrder {
                    line,
                    msg: format!(
                        "records for '{}' are not contiguous (seen again after another contig)",
                        contig
                    ),
                });
            }
            self.flush_current();
            self.seen.insert(contig.to_string());
        }

        let current = self
            .current
            .get_or_insert_with(|| OpenReference::new(contig.to_string(), start));

        if interval.start < current.last_start {
            return Err(BiotabixError::SortOrder {
                line,
                msg: format!(
                    "start {} on '{}' is before the previous start {}",
                    interval.start, contig, current.last_start
                ),
            });
        }
        current.last_start = interval.start;

        // Linear index: first record touching each window
        let first = linear_window(interval.start);
        let last = linear_window(interval.end - 1);
        if current.intervals.len() <= last {
            current.intervals.resize(last + 1, None);
        }
        for slot in &mut current.intervals[first..=last] {
            if slot.is_none() {
                *slot = Some(start);
            }
        }

        let bin = reg2bin(interval.start, interval.end);
        match current.pending {
            Some((pending_bin, _)) if pending_bin == bin => {}
            Some((pending_bin, chunk_start)) => {
                current
                    .bins
                    .entry(pending_bin)
                    .or_default()
                    .push(Chunk::new(chunk_start, start));
                current.pending = Some((bin, start));
            }
            None => current.pending = Some((bin, start)),
        }

        current.last_offset = end;
        current.record_count += 1;
        Ok(())
    }

    fn flush_current(&mut self) {
        if let Some(current) = self.current.take() {
            let reference = current.finish();
            debug!(
                "indexed contig {} ({} bins, {} windows, {} records)",
                reference.name,
                reference.bins.len(),
                reference.intervals.len(),
                reference.record_count().unwrap_or(0)
            );
            self.references.push(reference);
        }
    }

    /// Finish the last reference and return the index
    pub fn finish(mut self) -> TbiIndex {
        self.flush_current();
        TbiIndex::new(self.schema, self.references)
    }

    /// Index every record readable from `reader`, from its current position.
    ///
    /// The first `skip_lines` lines, empty lines and meta lines are passed
    /// over; their bytes still count towards the offsets of later records.
    pub fn index_reader<R: Read + Seek>(mut self, reader: &mut BgzfReader<R>) -> Result<TbiIndex> {
        let schema = self.schema.clone();
        let mut line = Vec::new();
        let mut line_no = 0usize;

        loop {
            let start = reader.virtual_position();
            if !reader.read_line(&mut line)? {
                break;
            }
            line_no += 1;

            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if line_no <= schema.skip_lines || schema.is_meta(&line) {
                continue;
            }

            let end = reader.virtual_position();
            let (contig, interval) = schema.parse_line(&line, line_no)?;
            self.push(contig, interval, start, end, line_no)?;
        }

        Ok(self.finish())
    }
}

impl TbiIndex {
    /// Build an index for a BGZF-compressed, sorted data file.
    ///
    /// Fails with [`BiotabixError::NotBgzf`] for plain or gzip files.
    pub fn build<P: AsRef<Path>>(path: P, schema: &TabixSchema) -> Result<Self> {
        let path = path.as_ref();
        schema.validate()?;
        if !is_bgzf(path)? {
            return Err(BiotabixError::NotBgzf(path.to_path_buf()));
        }

        let mut reader = BgzfReader::new(open_local_file(path)?)?;
        TbiBuilder::new(schema.clone()).index_reader(&mut reader)
    }
}
