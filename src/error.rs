//! Error types for biotabix

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for biotabix operations
pub type Result<T> = std::result::Result<T, BiotabixError>;

/// Error types that can occur in biotabix
#[derive(Debug, Error)]
pub enum BiotabixError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed BGZF block (bad magic, inconsistent sizes, CRC mismatch)
    #[error("Corrupt BGZF block at offset {offset}: {msg}")]
    CorruptBlock {
        /// Compressed file offset of the block
        offset: u64,
        /// Error message
        msg: String,
    },

    /// Seek beyond the bounds of the compressed file or of a block
    #[error("Offset out of range ({offset:#x}): {msg}")]
    OutOfRange {
        /// Raw virtual offset that was requested
        offset: u64,
        /// Error message
        msg: String,
    },

    /// Input is not sorted the way the index requires
    #[error("Unsorted input at line {line}: {msg}")]
    SortOrder {
        /// Line number (1-based) where the violation was detected
        line: usize,
        /// Error message
        msg: String,
    },

    /// Index artifact with a bad magic, version or layout
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// Invalid range or region
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// A data line whose coordinate columns cannot be interpreted
    #[error("Invalid record at line {line}: {msg}")]
    InvalidRecord {
        /// Line number (1-based, 0 when unknown)
        line: usize,
        /// Error message
        msg: String,
    },

    /// Preset name not present in the preset table
    #[error("Unknown preset '{0}' (expected gff, bed, sam, vcf, psltbl or pileup)")]
    UnknownPreset(String),

    /// Refusing to overwrite an existing output without `force`
    #[error("Output file already exists: {0} (use force to overwrite)")]
    FileExists(PathBuf),

    /// File is not BGZF-compressed and cannot be indexed in place
    #[error("Not a BGZF file: {0}")]
    NotBgzf(PathBuf),
}

impl BiotabixError {
    pub(crate) fn corrupt_block(offset: u64, msg: impl Into<String>) -> Self {
        BiotabixError::CorruptBlock {
            offset,
            msg: msg.into(),
        }
    }
}
