//! BGZF block codec and local data sources
//!
//! # BGZF Format
//!
//! A BGZF file is a series of independent gzip members ("blocks"), each
//! carrying its own compressed size in a `BC` extra subfield so that a
//! reader can hop from block to block without inflating anything:
//!
//! ```text
//! offset  size  field
//! 0       2     ID1=31, ID2=139 (gzip magic)
//! 2       1     CM=8 (deflate)
//! 3       1     FLG=4 (FEXTRA)
//! 4       4     MTIME
//! 8       1     XFL
//! 9       1     OS
//! 10      2     XLEN (extra field length)
//! 12      XLEN  extra subfields; SI1='B' SI2='C' SLEN=2 BSIZE (total block size - 1)
//! ...           raw deflate data
//! -8      4     CRC32 of uncompressed data
//! -4      4     ISIZE (uncompressed length, at most 64 KB)
//! ```
//!
//! The file ends with a reserved 28-byte empty block ([`BGZF_EOF`]).
//!
//! # Parallelism
//!
//! Reading is block-at-a-time and single-threaded: random access only ever
//! needs one block. Writing compresses [`PARALLEL_BLOCK_COUNT`] blocks at a
//! time with rayon, which is where BGZF's independent blocks pay off.

use crate::error::{BiotabixError, Result};
use flate2::read::{DeflateDecoder, MultiGzDecoder};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::{debug, info};
use memmap2::Mmap;
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;

/// Memory-mapped file threshold (50 MB)
///
/// Data files at or above this size are memory-mapped when opened for
/// queries; smaller files go through a plain `BufReader`.
pub const MMAP_THRESHOLD: u64 = 50 * 1024 * 1024;

/// Maximum uncompressed size of a single BGZF block
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Uncompressed bytes per block written by [`BgzfWriter`]
///
/// 60 KB leaves headroom so that even incompressible input stays under the
/// 64 KB compressed-size ceiling imposed by the 16-bit BSIZE field.
pub const BGZF_BLOCK_SIZE: usize = 60 * 1024;

/// Number of blocks compressed in parallel by [`BgzfWriter`]
///
/// Memory stays bounded at roughly 8 × 60 KB uncompressed plus the same
/// again compressed, regardless of output size.
pub const PARALLEL_BLOCK_COUNT: usize = 8;

/// The reserved BGZF end-of-file marker: an empty block
pub const BGZF_EOF: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, // header
    6, 0, 66, 67, 2, 0, 27, 0, // XLEN=6, BC subfield, BSIZE=27
    3, 0, // empty deflate stream
    0, 0, 0, 0, // CRC32
    0, 0, 0, 0, // ISIZE
];

/// Gzip fixed header up to and including XLEN
const GZIP_HEADER_LEN: usize = 12;

/// CRC32 + ISIZE trailer
const GZIP_TRAILER_LEN: usize = 8;

/// Anything that can back a seekable BGZF reader
pub trait SeekRead: Read + Seek + Send {}

impl<T: Read + Seek + Send> SeekRead for T {}

/// A complete compressed block as read from disk
#[derive(Debug, Clone)]
pub(crate) struct RawBlock {
    /// Compressed file offset of the block
    pub offset: u64,
    /// Complete block bytes (header, deflate data, trailer)
    pub bytes: Vec<u8>,
    /// Start of the deflate payload within `bytes`
    payload_start: usize,
}

impl RawBlock {
    /// Total compressed size of the block
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Read as many bytes as are available, up to `buf.len()`
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

/// Read one BGZF block from the current position of `reader`
///
/// `offset` is the compressed file offset the reader is positioned at and
/// is only used for bookkeeping and error messages. Returns `Ok(None)` at a
/// clean end of file (no bytes left at a block boundary).
pub(crate) fn read_block<R: Read>(reader: &mut R, offset: u64) -> Result<Option<RawBlock>> {
    let mut header = [0u8; GZIP_HEADER_LEN];
    let n = read_up_to(reader, &mut header)?;
    if n == 0 {
        return Ok(None);
    }
    if n < GZIP_HEADER_LEN {
        return Err(BiotabixError::corrupt_block(
            offset,
            format!("truncated block header ({} of {} bytes)", n, GZIP_HEADER_LEN),
        ));
    }

    if header[0] != 31 || header[1] != 139 {
        return Err(BiotabixError::corrupt_block(
            offset,
            format!(
                "invalid gzip magic bytes: expected [31, 139], got [{}, {}]",
                header[0], header[1]
            ),
        ));
    }
    if header[2] != 8 {
        return Err(BiotabixError::corrupt_block(
            offset,
            format!("unsupported compression method {}", header[2]),
        ));
    }
    if header[3] & 0x04 == 0 {
        return Err(BiotabixError::corrupt_block(
            offset,
            "missing FEXTRA flag (plain gzip, not BGZF)",
        ));
    }

    let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
    let mut extra = vec![0u8; xlen];
    if read_up_to(reader, &mut extra)? < xlen {
        return Err(BiotabixError::corrupt_block(offset, "truncated extra field"));
    }

    // Walk the extra subfields looking for BC
    let mut bsize: Option<u16> = None;
    let mut pos = 0;
    while pos + 4 <= xlen {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;

        if si1 == 66 && si2 == 67 && slen == 2 {
            if pos + 6 > xlen {
                return Err(BiotabixError::corrupt_block(offset, "incomplete BSIZE field"));
            }
            bsize = Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
            break;
        }

        pos += 4 + slen;
    }

    let block_size = match bsize {
        Some(bs) => bs as usize + 1,
        None => {
            return Err(BiotabixError::corrupt_block(
                offset,
                "no BC subfield in extra field",
            ))
        }
    };

    let payload_start = GZIP_HEADER_LEN + xlen;
    if block_size < payload_start + GZIP_TRAILER_LEN {
        return Err(BiotabixError::corrupt_block(
            offset,
            format!(
                "declared block size {} smaller than header and trailer ({})",
                block_size,
                payload_start + GZIP_TRAILER_LEN
            ),
        ));
    }

    let mut bytes = Vec::with_capacity(block_size);
    bytes.extend_from_slice(&header);
    bytes.extend_from_slice(&extra);
    bytes.resize(block_size, 0);
    let got = read_up_to(reader, &mut bytes[payload_start..])?;
    if got < block_size - payload_start {
        return Err(BiotabixError::corrupt_block(
            offset,
            format!(
                "truncated block: declared {} bytes, file holds {}",
                block_size,
                payload_start + got
            ),
        ));
    }

    Ok(Some(RawBlock {
        offset,
        bytes,
        payload_start,
    }))
}

/// Inflate a block into `out`, validating ISIZE and CRC32
pub(crate) fn inflate_block(block: &RawBlock, out: &mut Vec<u8>) -> Result<()> {
    let len = block.bytes.len();
    let trailer = &block.bytes[len - GZIP_TRAILER_LEN..];
    let expected_crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let isize = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]) as usize;

    if isize > MAX_BLOCK_SIZE {
        return Err(BiotabixError::corrupt_block(
            block.offset,
            format!("ISIZE {} exceeds BGZF maximum {}", isize, MAX_BLOCK_SIZE),
        ));
    }

    out.clear();
    out.reserve(isize);
    let payload = &block.bytes[block.payload_start..len - GZIP_TRAILER_LEN];
    DeflateDecoder::new(payload)
        .read_to_end(out)
        .map_err(|e| BiotabixError::corrupt_block(block.offset, format!("inflate failed: {}", e)))?;

    if out.len() != isize {
        return Err(BiotabixError::corrupt_block(
            block.offset,
            format!("inflated {} bytes but ISIZE declares {}", out.len(), isize),
        ));
    }

    let crc = crc32fast::hash(out);
    if crc != expected_crc {
        return Err(BiotabixError::corrupt_block(
            block.offset,
            format!("CRC32 mismatch: expected {:08x}, got {:08x}", expected_crc, crc),
        ));
    }

    Ok(())
}

/// Compress a single block to BGZF format
///
/// MTIME is fixed at zero so identical input always yields identical bytes.
pub(crate) fn compress_block(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(data)?;
    let deflated = deflate.finish()?;

    let mut block = Vec::with_capacity(deflated.len() + 26);

    block.push(31); // ID1
    block.push(139); // ID2
    block.push(8); // CM (deflate)
    block.push(4); // FLG (FEXTRA)
    block.extend_from_slice(&[0, 0, 0, 0]); // MTIME
    block.push(0); // XFL
    block.push(255); // OS (unknown)

    block.extend_from_slice(&6u16.to_le_bytes()); // XLEN=6
    block.push(66); // SI1='B'
    block.push(67); // SI2='C'
    block.extend_from_slice(&2u16.to_le_bytes()); // SLEN=2
    let bsize_pos = block.len();
    block.extend_from_slice(&0u16.to_le_bytes()); // BSIZE placeholder

    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());

    let total = block.len();
    if total > MAX_BLOCK_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("compressed block of {} bytes exceeds BGZF limit", total),
        ));
    }
    let bsize = (total - 1) as u16;
    block[bsize_pos..bsize_pos + 2].copy_from_slice(&bsize.to_le_bytes());

    Ok(block)
}

/// Parallel BGZF writer
///
/// Buffers input until [`PARALLEL_BLOCK_COUNT`] blocks of
/// [`BGZF_BLOCK_SIZE`] bytes are pending, compresses them in parallel with
/// rayon, then writes them in order. Call [`finish`](Self::finish) to flush
/// the tail and append the EOF marker; dropping the writer without finishing
/// loses buffered data.
///
/// # Example
///
/// ```no_run
/// use biotabix::io::compression::BgzfWriter;
/// use std::fs::File;
/// use std::io::Write;
///
/// # fn main() -> std::io::Result<()> {
/// let mut writer = BgzfWriter::new(File::create("features.gtf.gz")?);
/// writer.write_all(b"chr1\tsrc\tgene\t101\t200\t.\t+\t.\tgene_id \"g1\";\n")?;
/// writer.finish()?;
/// # Ok(())
/// # }
/// ```
pub struct BgzfWriter<W: Write> {
    writer: W,
    /// Full uncompressed blocks waiting to be compressed
    pending: Vec<Vec<u8>>,
    /// Block currently being filled
    current: Vec<u8>,
}

impl<W: Write> BgzfWriter<W> {
    /// Create a new BGZF writer
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            pending: Vec::with_capacity(PARALLEL_BLOCK_COUNT),
            current: Vec::with_capacity(BGZF_BLOCK_SIZE),
        }
    }

    fn flush_blocks(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let compressed: Vec<_> = self
            .pending
            .par_iter()
            .map(|block| compress_block(block))
            .collect::<io::Result<Vec<_>>>()?;

        for block in compressed {
            self.writer.write_all(&block)?;
        }

        self.pending.clear();
        Ok(())
    }

    /// Flush all data, write the EOF marker and return the inner writer
    pub fn finish(mut self) -> io::Result<W> {
        if !self.current.is_empty() {
            let block = std::mem::take(&mut self.current);
            self.pending.push(block);
        }
        self.flush_blocks()?;
        self.writer.write_all(&BGZF_EOF)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut remaining = buf;

        while !remaining.is_empty() {
            let space = BGZF_BLOCK_SIZE - self.current.len();
            let to_copy = remaining.len().min(space);

            self.current.extend_from_slice(&remaining[..to_copy]);
            remaining = &remaining[to_copy..];

            if self.current.len() >= BGZF_BLOCK_SIZE {
                let block =
                    std::mem::replace(&mut self.current, Vec::with_capacity(BGZF_BLOCK_SIZE));
                self.pending.push(block);

                if self.pending.len() >= PARALLEL_BLOCK_COUNT {
                    self.flush_blocks()?;
                }
            }
        }

        Ok(buf.len())
    }

    /// Flushes the underlying writer only; partial blocks stay buffered so
    /// that block boundaries do not depend on flush timing.
    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Check whether the file at `path` starts with a BGZF block header
pub fn is_bgzf<P: AsRef<Path>>(path: P) -> Result<bool> {
    let mut file = File::open(path.as_ref())?;
    let mut header = [0u8; 16];
    let n = read_up_to(&mut file, &mut header)?;
    Ok(n == 16
        && header[0] == 31
        && header[1] == 139
        && header[3] & 0x04 != 0
        && header[12] == 66
        && header[13] == 67)
}

/// Open a local data file for random access
///
/// Files of at least [`MMAP_THRESHOLD`] bytes are memory-mapped, which
/// avoids copying whole blocks through a read buffer on large inputs;
/// smaller files use a buffered reader. Every call returns an independent
/// source.
pub(crate) fn open_local_file(path: &Path) -> Result<Box<dyn SeekRead>> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();

    if file_size >= MMAP_THRESHOLD {
        // SAFETY: data files are treated as read-only for the lifetime of a
        // query; concurrent truncation by another process is unsupported.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Box::new(io::Cursor::new(mmap)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// BGZF-compress `src` into `dst`
///
/// `src` may be plain text or (multi-member) gzip; gzip input is decoded
/// first, so re-compressing a `.gz` produced by plain `gzip` yields a
/// proper BGZF file. An existing `dst` is only replaced when `force` is set.
///
/// # Example
///
/// ```no_run
/// use biotabix::io::compression::compress_file;
///
/// # fn main() -> biotabix::Result<()> {
/// compress_file("features.gtf", "features.gtf.gz", false)?;
/// # Ok(())
/// # }
/// ```
pub fn compress_file<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dst: Q, force: bool) -> Result<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if dst.exists() && !force {
        return Err(BiotabixError::FileExists(dst.to_path_buf()));
    }

    let mut file = File::open(src)?;
    let mut magic = [0u8; 2];
    let n = read_up_to(&mut file, &mut magic)?;
    file.rewind()?;

    let mut input: Box<dyn Read> = if n == 2 && magic == [31, 139] {
        debug!("{}: gzip input, decoding before recompression", src.display());
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    let mut writer = BgzfWriter::new(BufWriter::new(File::create(dst)?));
    let copied = io::copy(&mut input, &mut writer)?;
    writer.finish()?.flush()?;

    info!(
        "compressed {} ({} bytes) to {}",
        src.display(),
        copied,
        dst.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn bgzf_bytes(data: &[u8]) -> Vec<u8> {
        let mut writer = BgzfWriter::new(Vec::new());
        writer.write_all(data).unwrap();
        writer.finish().unwrap()
    }

    #[test]
    fn test_compress_block_layout() {
        let block = compress_block(b"chr1\t100\t200\n").unwrap();

        assert_eq!(block[0], 31);
        assert_eq!(block[1], 139);
        assert_eq!(block[3] & 0x04, 0x04);
        assert_eq!(u16::from_le_bytes([block[10], block[11]]), 6);
        assert_eq!(block[12], 66);
        assert_eq!(block[13], 67);

        let bsize = u16::from_le_bytes([block[16], block[17]]) as usize;
        assert_eq!(bsize + 1, block.len());
    }

    #[test]
    fn test_read_and_inflate_block() {
        let data = b"chr1\t100\t200\nchr1\t150\t300\n";
        let block = compress_block(data).unwrap();

        let raw = read_block(&mut Cursor::new(&block), 0).unwrap().unwrap();
        assert_eq!(raw.size(), block.len() as u64);

        let mut out = Vec::new();
        inflate_block(&raw, &mut out).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_read_block_clean_eof() {
        let empty: &[u8] = &[];
        assert!(read_block(&mut Cursor::new(empty), 0).unwrap().is_none());
    }

    #[test]
    fn test_eof_marker_is_empty_block() {
        let raw = read_block(&mut Cursor::new(&BGZF_EOF[..]), 0)
            .unwrap()
            .unwrap();
        let mut out = vec![1, 2, 3];
        inflate_block(&raw, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_bad_magic_is_corrupt_block() {
        let mut block = compress_block(b"data\n").unwrap();
        block[0] = 0;
        let err = read_block(&mut Cursor::new(&block), 42).unwrap_err();
        assert!(matches!(err, BiotabixError::CorruptBlock { offset: 42, .. }));
    }

    #[test]
    fn test_plain_gzip_rejected() {
        let mut block = compress_block(b"data\n").unwrap();
        block[3] = 0;
        let err = read_block(&mut Cursor::new(&block), 0).unwrap_err();
        assert!(matches!(err, BiotabixError::CorruptBlock { .. }));
    }

    #[test]
    fn test_truncated_block_is_corrupt() {
        let block = compress_block(b"some longer line of data\n").unwrap();
        let truncated = &block[..block.len() - 5];
        let err = read_block(&mut Cursor::new(truncated), 0).unwrap_err();
        assert!(matches!(err, BiotabixError::CorruptBlock { .. }));
    }

    #[test]
    fn test_bsize_smaller_than_header_is_corrupt() {
        let mut block = compress_block(b"x\n").unwrap();
        block[16..18].copy_from_slice(&10u16.to_le_bytes());
        let err = read_block(&mut Cursor::new(&block), 0).unwrap_err();
        assert!(matches!(err, BiotabixError::CorruptBlock { .. }));
    }

    #[test]
    fn test_crc_mismatch_is_corrupt() {
        let mut block = compress_block(b"checksum me\n").unwrap();
        let len = block.len();
        block[len - 8] ^= 0xFF;
        let raw = read_block(&mut Cursor::new(&block), 0).unwrap().unwrap();
        let err = inflate_block(&raw, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BiotabixError::CorruptBlock { .. }));
    }

    #[test]
    fn test_isize_mismatch_is_corrupt() {
        let mut block = compress_block(b"sized\n").unwrap();
        let len = block.len();
        block[len - 4..].copy_from_slice(&99u32.to_le_bytes());
        let raw = read_block(&mut Cursor::new(&block), 0).unwrap().unwrap();
        let err = inflate_block(&raw, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, BiotabixError::CorruptBlock { .. }));
    }

    #[test]
    fn test_writer_splits_into_blocks() {
        let data = vec![b'A'; BGZF_BLOCK_SIZE * 3 + 17];
        let compressed = bgzf_bytes(&data);

        let mut cursor = Cursor::new(&compressed);
        let mut offset = 0;
        let mut sizes = Vec::new();
        let mut total = Vec::new();
        while let Some(raw) = read_block(&mut cursor, offset).unwrap() {
            let mut out = Vec::new();
            inflate_block(&raw, &mut out).unwrap();
            sizes.push(out.len());
            total.extend_from_slice(&out);
            offset += raw.size();
        }

        assert_eq!(
            sizes,
            vec![BGZF_BLOCK_SIZE, BGZF_BLOCK_SIZE, BGZF_BLOCK_SIZE, 17, 0]
        );
        assert_eq!(total, data);
        assert!(compressed.ends_with(&BGZF_EOF));
    }

    #[test]
    fn test_writer_output_is_deterministic() {
        let mut data = Vec::new();
        for i in 0..20_000 {
            data.extend_from_slice(format!("chr1\t{}\t{}\n", i * 10, i * 10 + 5).as_bytes());
        }
        assert_eq!(bgzf_bytes(&data), bgzf_bytes(&data));
    }

    #[test]
    fn test_empty_writer_emits_only_eof_marker() {
        assert_eq!(bgzf_bytes(b""), BGZF_EOF.to_vec());
    }

    #[test]
    fn test_compress_file_plain_and_gzip_input() {
        use flate2::write::GzEncoder;

        let dir = TempDir::new().unwrap();
        let text = b"chr1\t1\t10\nchr2\t5\t15\n";

        let plain = dir.path().join("plain.bed");
        std::fs::write(&plain, text).unwrap();
        let from_plain = dir.path().join("plain.bed.gz");
        compress_file(&plain, &from_plain, false).unwrap();
        assert!(is_bgzf(&from_plain).unwrap());

        let gz = dir.path().join("gzip.bed.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(text).unwrap();
        encoder.finish().unwrap();
        assert!(!is_bgzf(&gz).unwrap());

        let from_gz = dir.path().join("regz.bed.gz");
        compress_file(&gz, &from_gz, false).unwrap();
        assert_eq!(
            std::fs::read(&from_plain).unwrap(),
            std::fs::read(&from_gz).unwrap()
        );
    }

    #[test]
    fn test_compress_file_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("in.txt");
        let dst = dir.path().join("in.txt.gz");
        std::fs::write(&src, b"line\n").unwrap();
        std::fs::write(&dst, b"existing").unwrap();

        let err = compress_file(&src, &dst, false).unwrap_err();
        assert!(matches!(err, BiotabixError::FileExists(_)));

        compress_file(&src, &dst, true).unwrap();
        assert!(is_bgzf(&dst).unwrap());
    }

    #[test]
    fn test_mmap_threshold_constant() {
        assert_eq!(MMAP_THRESHOLD, 50 * 1024 * 1024);
    }
}
