//! Seekable BGZF reader and virtual file offsets.
//!
//! # Virtual File Offsets
//!
//! A BGZF virtual offset is a 64-bit value combining:
//! - **Compressed offset** (high 48 bits): start of a block in the `.gz` file
//! - **Uncompressed offset** (low 16 bits): position within that block once inflated
//!
//! Ordering on the raw value matches ordering in the decompressed stream,
//! which is what lets an index sort and merge chunks without touching the file.
//!
//! # Example
//!
//! ```no_run
//! use biotabix::io::bgzf::{BgzfReader, VirtualOffset};
//! use std::fs::File;
//!
//! # fn main() -> biotabix::Result<()> {
//! let mut reader = BgzfReader::new(File::open("features.gtf.gz")?)?;
//! let mut line = Vec::new();
//!
//! let start = reader.virtual_position();
//! reader.read_line(&mut line)?;
//!
//! // Come back later
//! reader.seek(start)?;
//! # Ok(())
//! # }
//! ```

use crate::error::{BiotabixError, Result};
use crate::io::compression::{inflate_block, read_block, BGZF_EOF};
use log::{debug, warn};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom};

/// Virtual file offset in BGZF format.
///
/// ```
/// # use biotabix::io::bgzf::VirtualOffset;
/// let offset = VirtualOffset::new(1024, 512);
/// assert_eq!(offset.compressed_offset(), 1024);
/// assert_eq!(offset.uncompressed_offset(), 512);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Create a new virtual offset from compressed and uncompressed components.
    pub fn new(compressed: u64, uncompressed: u16) -> Self {
        VirtualOffset((compressed << 16) | (uncompressed as u64))
    }

    /// Create from raw 64-bit value.
    pub fn from_raw(value: u64) -> Self {
        VirtualOffset(value)
    }

    /// Get raw 64-bit value.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Get compressed file offset (high 48 bits).
    pub fn compressed_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Get uncompressed offset within block (low 16 bits).
    pub fn uncompressed_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.compressed_offset(),
            self.uncompressed_offset()
        )
    }
}

impl From<u64> for VirtualOffset {
    fn from(value: u64) -> Self {
        VirtualOffset(value)
    }
}

/// Random-access reader over a BGZF stream.
///
/// Holds exactly one inflated block in memory. Sequential reads advance
/// across block boundaries transparently, skipping empty blocks such as the
/// EOF marker. [`seek`](Self::seek) jumps to any virtual offset and inflates
/// only the block it names.
pub struct BgzfReader<R> {
    inner: R,
    /// Physical length of the compressed stream
    file_len: u64,
    /// Physical position of `inner`, to avoid redundant seeks
    physical: u64,
    /// Compressed offset of the loaded block
    block_offset: u64,
    /// Compressed size of the loaded block (0 when none is loaded)
    block_size: u64,
    /// Inflated contents of the loaded block
    data: Vec<u8>,
    /// Read position within `data`
    pos: usize,
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Wrap a seekable compressed stream positioned anywhere.
    ///
    /// The reader starts at virtual offset 0. A missing EOF marker is
    /// logged but tolerated.
    pub fn new(mut inner: R) -> Result<Self> {
        let file_len = inner.seek(SeekFrom::End(0))?;

        if file_len >= BGZF_EOF.len() as u64 {
            inner.seek(SeekFrom::End(-(BGZF_EOF.len() as i64)))?;
            let mut tail = [0u8; 28];
            inner.read_exact(&mut tail)?;
            if tail != BGZF_EOF {
                warn!("BGZF stream has no EOF marker; it may be truncated");
            }
        } else if file_len > 0 {
            warn!("BGZF stream of {} bytes is too short for an EOF marker", file_len);
        }

        inner.seek(SeekFrom::Start(0))?;

        Ok(Self {
            inner,
            file_len,
            physical: 0,
            block_offset: 0,
            block_size: 0,
            data: Vec::new(),
            pos: 0,
        })
    }

    /// Physical length of the compressed stream
    pub fn compressed_len(&self) -> u64 {
        self.file_len
    }

    /// Virtual offset of the next byte to be read.
    ///
    /// When the loaded block has been consumed completely this reports the
    /// start of the following block, so a record beginning at a block
    /// boundary is addressed through the block that actually holds it.
    pub fn virtual_position(&self) -> VirtualOffset {
        if self.block_size > 0 && self.pos >= self.data.len() {
            VirtualOffset::new(self.block_offset + self.block_size, 0)
        } else {
            VirtualOffset::new(self.block_offset, self.pos as u16)
        }
    }

    /// Load the block starting at compressed offset `offset`.
    ///
    /// Returns `false` at a clean end of stream.
    fn load_block(&mut self, offset: u64) -> Result<bool> {
        if self.physical != offset {
            self.inner.seek(SeekFrom::Start(offset))?;
            self.physical = offset;
        }

        let block = match read_block(&mut self.inner, offset)? {
            Some(block) => block,
            None => return Ok(false),
        };
        self.physical = offset + block.size();

        inflate_block(&block, &mut self.data)?;
        self.block_offset = offset;
        self.block_size = block.size();
        self.pos = 0;

        debug!(
            "loaded BGZF block at {} ({} compressed, {} inflated)",
            offset,
            self.block_size,
            self.data.len()
        );
        Ok(true)
    }

    /// Make sure unread bytes are available, moving past exhausted and
    /// empty blocks. Returns `false` at end of stream.
    fn fill(&mut self) -> Result<bool> {
        while self.pos >= self.data.len() {
            let next = self.block_offset + self.block_size;
            if next >= self.file_len {
                return Ok(false);
            }
            if !self.load_block(next)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Seek to a virtual offset.
    ///
    /// Fails with [`BiotabixError::OutOfRange`] if the compressed offset lies
    /// beyond the end of the stream or the in-block offset beyond the
    /// inflated length of the named block.
    pub fn seek(&mut self, offset: VirtualOffset) -> Result<()> {
        let coffset = offset.compressed_offset();
        let uoffset = offset.uncompressed_offset() as usize;

        if coffset > self.file_len || (coffset == self.file_len && uoffset > 0) {
            return Err(BiotabixError::OutOfRange {
                offset: offset.as_raw(),
                msg: format!(
                    "compressed offset {} beyond end of file ({} bytes)",
                    coffset, self.file_len
                ),
            });
        }

        if coffset == self.file_len {
            // Positioned at end of stream
            self.block_offset = coffset;
            self.block_size = 0;
            self.data.clear();
            self.pos = 0;
            return Ok(());
        }

        if self.block_size == 0 || coffset != self.block_offset {
            if !self.load_block(coffset)? {
                return Err(BiotabixError::OutOfRange {
                    offset: offset.as_raw(),
                    msg: format!("no block at compressed offset {}", coffset),
                });
            }
        }

        if uoffset > self.data.len() {
            return Err(BiotabixError::OutOfRange {
                offset: offset.as_raw(),
                msg: format!(
                    "in-block offset {} beyond block length {}",
                    uoffset,
                    self.data.len()
                ),
            });
        }

        self.pos = uoffset;
        Ok(())
    }

    /// Read one line into `buf`, without its trailing `\n`.
    ///
    /// `buf` is cleared first. Returns `false` when the stream is exhausted
    /// and nothing was read. A final line without a newline is returned as is.
    pub fn read_line(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        buf.clear();
        let mut read_any = false;

        loop {
            if !self.fill()? {
                return Ok(read_any);
            }
            read_any = true;

            let available = &self.data[self.pos..];
            match available.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    buf.extend_from_slice(&available[..i]);
                    self.pos += i + 1;
                    return Ok(true);
                }
                None => {
                    buf.extend_from_slice(available);
                    self.pos = self.data.len();
                }
            }
        }
    }
}

impl<R: Read + Seek> Read for BgzfReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let has_data = self
            .fill()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if !has_data {
            return Ok(0);
        }

        let available = &self.data[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::compression::{compress_block, BgzfWriter};
    use std::io::{Cursor, Write};

    /// Build a BGZF stream with one block per chunk plus the EOF marker
    fn blocks_of(chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&compress_block(chunk).unwrap());
        }
        out.extend_from_slice(&BGZF_EOF);
        out
    }

    #[test]
    fn test_virtual_offset() {
        let offset = VirtualOffset::new(1024, 512);
        assert_eq!(offset.compressed_offset(), 1024);
        assert_eq!(offset.uncompressed_offset(), 512);
        assert_eq!(offset.as_raw(), (1024 << 16) | 512);
        assert_eq!(offset.to_string(), "1024:512");
    }

    #[test]
    fn test_virtual_offset_ordering() {
        let off1 = VirtualOffset::new(1000, 100);
        let off2 = VirtualOffset::new(1000, 200);
        let off3 = VirtualOffset::new(2000, 100);

        assert!(off1 < off2);
        assert!(off2 < off3);
        assert!(off1 < off3);
    }

    #[test]
    fn test_read_lines_across_blocks() {
        // The middle line is split across two blocks
        let stream = blocks_of(&[b"chr1\t1\t2\nchr1\t5", b"\t9\nchr2\t3\t4\n"]);
        let mut reader = BgzfReader::new(Cursor::new(stream)).unwrap();

        let mut line = Vec::new();
        let mut lines = Vec::new();
        while reader.read_line(&mut line).unwrap() {
            lines.push(String::from_utf8(line.clone()).unwrap());
        }

        assert_eq!(lines, vec!["chr1\t1\t2", "chr1\t5\t9", "chr2\t3\t4"]);
    }

    #[test]
    fn test_seek_returns_to_recorded_position() {
        let mut writer = BgzfWriter::new(Vec::new());
        for i in 0..30_000 {
            writeln!(writer, "chr1\t{}\t{}", i, i + 1).unwrap();
        }
        let stream = writer.finish().unwrap();

        let mut reader = BgzfReader::new(Cursor::new(stream)).unwrap();
        let mut line = Vec::new();
        let mut positions = Vec::new();
        loop {
            let vo = reader.virtual_position();
            if !reader.read_line(&mut line).unwrap() {
                break;
            }
            positions.push((vo, line.clone()));
        }
        assert_eq!(positions.len(), 30_000);

        // Spans several blocks
        let first_block = positions[0].0.compressed_offset();
        let last_block = positions[29_999].0.compressed_offset();
        assert!(last_block > first_block);

        for &idx in &[29_999usize, 0, 12_345, 20_000, 7] {
            let (vo, ref expected) = positions[idx];
            reader.seek(vo).unwrap();
            reader.read_line(&mut line).unwrap();
            assert_eq!(&line, expected);
        }
    }

    #[test]
    fn test_position_normalised_at_block_boundary() {
        let first: &[u8] = b"chr1\t1\t2\n";
        let stream = blocks_of(&[first, b"chr1\t3\t4\n"]);
        let first_size = compress_block(first).unwrap().len() as u64;

        let mut reader = BgzfReader::new(Cursor::new(stream)).unwrap();
        let mut line = Vec::new();
        reader.read_line(&mut line).unwrap();

        assert_eq!(reader.virtual_position(), VirtualOffset::new(first_size, 0));
    }

    #[test]
    fn test_empty_blocks_are_skipped() {
        let stream = blocks_of(&[b"a\n", b"", b"", b"b\n"]);
        let mut reader = BgzfReader::new(Cursor::new(stream)).unwrap();

        let mut all = Vec::new();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"a\nb\n");
    }

    #[test]
    fn test_seek_past_end_is_out_of_range() {
        let stream = blocks_of(&[b"chr1\t1\t2\n"]);
        let len = stream.len() as u64;
        let mut reader = BgzfReader::new(Cursor::new(stream)).unwrap();

        let err = reader.seek(VirtualOffset::new(len + 100, 0)).unwrap_err();
        assert!(matches!(err, BiotabixError::OutOfRange { .. }));

        let err = reader.seek(VirtualOffset::new(len, 1)).unwrap_err();
        assert!(matches!(err, BiotabixError::OutOfRange { .. }));

        // Exactly at the end is a valid, empty position
        reader.seek(VirtualOffset::new(len, 0)).unwrap();
        let mut line = Vec::new();
        assert!(!reader.read_line(&mut line).unwrap());
    }

    #[test]
    fn test_seek_past_block_length_is_out_of_range() {
        let stream = blocks_of(&[b"short\n"]);
        let mut reader = BgzfReader::new(Cursor::new(stream)).unwrap();

        let err = reader.seek(VirtualOffset::new(0, 500)).unwrap_err();
        assert!(matches!(err, BiotabixError::OutOfRange { .. }));
    }

    #[test]
    fn test_seek_into_garbage_is_corrupt_block() {
        let stream = blocks_of(&[b"chr1\t1\t2\n", b"chr1\t3\t4\n"]);
        let mut reader = BgzfReader::new(Cursor::new(stream)).unwrap();

        // Offset 5 is inside the first block's header, not a block start
        let err = reader.seek(VirtualOffset::new(5, 0)).unwrap_err();
        assert!(matches!(err, BiotabixError::CorruptBlock { offset: 5, .. }));
    }

    #[test]
    fn test_final_line_without_newline() {
        let stream = blocks_of(&[b"first\nlast"]);
        let mut reader = BgzfReader::new(Cursor::new(stream)).unwrap();

        let mut line = Vec::new();
        assert!(reader.read_line(&mut line).unwrap());
        assert_eq!(line, b"first");
        assert!(reader.read_line(&mut line).unwrap());
        assert_eq!(line, b"last");
        assert!(!reader.read_line(&mut line).unwrap());
    }
}
