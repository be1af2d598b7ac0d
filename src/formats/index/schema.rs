//! Column schemas describing where a line keeps its contig and coordinates.
//!
//! A [`TabixSchema`] is stored in every index so that queries interpret
//! lines exactly the way the builder did. [`Preset`] is the fixed table of
//! named schemas for common annotation formats.
//!
//! # Coordinate conversion
//!
//! Columns are numbered from 1. Whatever the source convention, extracted
//! intervals are 0-based half-open:
//!
//! | schema | start column `v` | end column `w` | no end column |
//! |---|---|---|---|
//! | 1-based (GFF, VCF, SAM) | `v - 1` | `w` | `v` |
//! | 0-based (BED) | `v` | `w` | `v + 1` |
//!
//! SAM records end at `pos + reference span of CIGAR`, VCF records at
//! `pos + len(REF)` unless the INFO column carries `END=`.

use crate::error::{BiotabixError, Result};
use crate::formats::index::binning::MAX_COORDINATE;
use crate::formats::primitives::Interval;
use std::fmt;
use std::str::FromStr;

/// Flag OR-ed into the stored format code for 0-based (UCSC) coordinates
pub const ZERO_BASED_FLAG: i32 = 0x10000;

/// File format types recognized by tabix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TbiFormat {
    /// Generic tab-delimited file
    Generic = 0,
    /// SAM format
    Sam = 1,
    /// VCF format
    Vcf = 2,
}

impl TbiFormat {
    /// Parse format from integer
    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(TbiFormat::Generic),
            1 => Ok(TbiFormat::Sam),
            2 => Ok(TbiFormat::Vcf),
            _ => Err(BiotabixError::CorruptIndex(format!(
                "Unknown TBI format code: {}",
                value
            ))),
        }
    }
}

/// Explicit column schema for a tab-delimited file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabixSchema {
    /// How the end coordinate is derived
    pub format: TbiFormat,
    /// Column holding the contig name (1-based)
    pub col_seq: usize,
    /// Column holding the start position (1-based)
    pub col_beg: usize,
    /// Column holding the end position (1-based, 0 = none)
    pub col_end: usize,
    /// Coordinates are 0-based half-open (BED/UCSC) rather than 1-based
    pub zero_based: bool,
    /// Lines starting with this byte are headers/comments
    pub meta_char: u8,
    /// Number of leading lines that are never indexed
    pub skip_lines: usize,
}

impl TabixSchema {
    /// Schema for a generic file with the given columns and convention
    pub fn generic(col_seq: usize, col_beg: usize, col_end: usize, zero_based: bool) -> Self {
        TabixSchema {
            format: TbiFormat::Generic,
            col_seq,
            col_beg,
            col_end,
            zero_based,
            meta_char: b'#',
            skip_lines: 0,
        }
    }

    /// Replace the comment marker
    pub fn with_meta_char(mut self, meta_char: u8) -> Self {
        self.meta_char = meta_char;
        self
    }

    /// Replace the number of leading lines to skip
    pub fn with_skip_lines(mut self, skip_lines: usize) -> Self {
        self.skip_lines = skip_lines;
        self
    }

    /// Check the column layout is usable.
    pub fn validate(&self) -> Result<()> {
        if self.col_seq == 0 || self.col_beg == 0 {
            return Err(BiotabixError::InvalidRecord {
                line: 0,
                msg: "sequence and start columns must be 1-based column numbers".to_string(),
            });
        }
        if self.col_seq == self.col_beg || self.col_seq == self.col_end {
            return Err(BiotabixError::InvalidRecord {
                line: 0,
                msg: format!(
                    "sequence column {} overlaps a coordinate column",
                    self.col_seq
                ),
            });
        }
        Ok(())
    }

    /// Format code as stored in the index header
    pub fn format_code(&self) -> i32 {
        let code = self.format as i32;
        if self.zero_based {
            code | ZERO_BASED_FLAG
        } else {
            code
        }
    }

    /// Rebuild a schema from the header fields of an index.
    pub fn from_header(
        format_code: i32,
        col_seq: i32,
        col_beg: i32,
        col_end: i32,
        meta: i32,
        skip: i32,
    ) -> Result<Self> {
        let format = TbiFormat::from_i32(format_code & !ZERO_BASED_FLAG)?;
        let column = |name: &str, value: i32| {
            usize::try_from(value).map_err(|_| {
                BiotabixError::CorruptIndex(format!("negative {} column: {}", name, value))
            })
        };
        let schema = TabixSchema {
            format,
            col_seq: column("sequence", col_seq)?,
            col_beg: column("start", col_beg)?,
            col_end: column("end", col_end)?,
            zero_based: format_code & ZERO_BASED_FLAG != 0,
            meta_char: u8::try_from(meta).map_err(|_| {
                BiotabixError::CorruptIndex(format!("meta character out of range: {}", meta))
            })?,
            skip_lines: column("skip", skip)?,
        };
        if schema.col_seq == 0 || schema.col_beg == 0 {
            return Err(BiotabixError::CorruptIndex(
                "sequence and start columns must be non-zero".to_string(),
            ));
        }
        Ok(schema)
    }

    /// Lines that carry no record: empty or starting with the meta character
    #[inline]
    pub fn is_meta(&self, line: &[u8]) -> bool {
        line.first().map_or(true, |&b| b == self.meta_char)
    }

    /// Extract contig and 0-based half-open interval from one data line.
    ///
    /// `line_no` (1-based) is only used for error reporting.
    pub fn parse_line<'a>(&self, line: &'a [u8], line_no: usize) -> Result<(&'a str, Interval)> {
        let text = std::str::from_utf8(line).map_err(|e| BiotabixError::InvalidRecord {
            line: line_no,
            msg: format!("line is not valid UTF-8: {}", e),
        })?;

        let fields: Vec<&str> = text.split('\t').collect();
        let field = |column: usize, name: &str| {
            column
                .checked_sub(1)
                .and_then(|i| fields.get(i))
                .copied()
                .ok_or_else(|| BiotabixError::InvalidRecord {
                    line: line_no,
                    msg: format!(
                        "missing {} column {} ({} columns present)",
                        name,
                        column,
                        fields.len()
                    ),
                })
        };
        let limit = MAX_COORDINATE as i64;
        let integer = |value: &str, name: &str| -> Result<i64> {
            let n = value
                .trim()
                .parse::<i64>()
                .map_err(|_| BiotabixError::InvalidRecord {
                    line: line_no,
                    msg: format!("{} column is not an integer: '{}'", name, value),
                })?;
            if n.abs_diff(0) > MAX_COORDINATE {
                return Err(BiotabixError::InvalidRecord {
                    line: line_no,
                    msg: format!(
                        "{} {} is outside the indexable range of +/-{}",
                        name, n, MAX_COORDINATE
                    ),
                });
            }
            Ok(n)
        };

        let contig = field(self.col_seq, "sequence")?;
        if contig.is_empty() {
            return Err(BiotabixError::InvalidRecord {
                line: line_no,
                msg: "empty sequence name".to_string(),
            });
        }

        let pos = integer(field(self.col_beg, "start")?, "start")?;
        let (mut beg, mut end) = if self.zero_based {
            (pos, pos + 1)
        } else {
            (pos - 1, pos)
        };

        match self.format {
            TbiFormat::Generic => {
                if self.col_end > 0 {
                    end = integer(field(self.col_end, "end")?, "end")?;
                }
            }
            TbiFormat::Sam => {
                let span = cigar_reference_span(field(6, "CIGAR")?);
                if span > 0 {
                    end = beg.saturating_add(span);
                }
            }
            TbiFormat::Vcf => {
                let reference = field(4, "REF")?;
                if !reference.is_empty() {
                    end = beg.saturating_add(i64::try_from(reference.len()).unwrap_or(limit));
                }
                if let Some(info_end) = fields.get(7).and_then(|info| info_end(info)) {
                    if info_end > beg {
                        end = info_end;
                    }
                }
            }
        }

        // |pos| <= MAX_COORDINATE, so beg + 1 cannot overflow
        beg = beg.max(0);
        end = end.max(1).max(beg + 1);

        let (beg, end) = (beg as u64, end as u64);
        if end > MAX_COORDINATE {
            return Err(BiotabixError::InvalidRecord {
                line: line_no,
                msg: format!(
                    "end {} exceeds maximum indexable coordinate {}",
                    end, MAX_COORDINATE
                ),
            });
        }

        Ok((contig, Interval::new(beg, end)?))
    }
}

impl Default for TabixSchema {
    fn default() -> Self {
        Preset::Gff.schema()
    }
}

impl From<Preset> for TabixSchema {
    fn from(preset: Preset) -> Self {
        preset.schema()
    }
}

/// Reference length consumed by a CIGAR string (M, D, N, =, X)
///
/// Saturates instead of overflowing; oversized spans are rejected by the
/// coordinate limit afterwards.
fn cigar_reference_span(cigar: &str) -> i64 {
    let mut span: i64 = 0;
    let mut len: i64 = 0;
    for b in cigar.bytes() {
        if b.is_ascii_digit() {
            len = len.saturating_mul(10).saturating_add(i64::from(b - b'0'));
        } else {
            if matches!(b, b'M' | b'D' | b'N' | b'=' | b'X') {
                span = span.saturating_add(len);
            }
            len = 0;
        }
    }
    span
}

/// Value of `END=` in a VCF INFO column
fn info_end(info: &str) -> Option<i64> {
    info.split(';')
        .find_map(|entry| entry.strip_prefix("END="))
        .and_then(|value| value.parse().ok())
}

/// Named column schemas for common formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    /// GFF/GTF: contig 1, start 4, end 5, 1-based
    Gff,
    /// BED: contig 1, start 2, end 3, 0-based
    Bed,
    /// PSL table: contig 15, start 17, end 18, 0-based
    Psltbl,
    /// SAM: contig 3, position 4, end from CIGAR, `@` headers
    Sam,
    /// VCF: contig 1, position 2, end from REF / INFO END
    Vcf,
    /// Samtools pileup: contig 1, position 2, single base
    Pileup,
}

impl Preset {
    /// All presets, in table order
    pub const ALL: [Preset; 6] = [
        Preset::Gff,
        Preset::Bed,
        Preset::Psltbl,
        Preset::Sam,
        Preset::Vcf,
        Preset::Pileup,
    ];

    /// Preset name as accepted by [`FromStr`]
    pub fn name(self) -> &'static str {
        match self {
            Preset::Gff => "gff",
            Preset::Bed => "bed",
            Preset::Psltbl => "psltbl",
            Preset::Sam => "sam",
            Preset::Vcf => "vcf",
            Preset::Pileup => "pileup",
        }
    }

    /// The schema this preset stands for
    pub fn schema(self) -> TabixSchema {
        match self {
            Preset::Gff => TabixSchema::generic(1, 4, 5, false),
            Preset::Bed => TabixSchema::generic(1, 2, 3, true),
            Preset::Psltbl => TabixSchema::generic(15, 17, 18, true),
            Preset::Sam => TabixSchema {
                format: TbiFormat::Sam,
                col_seq: 3,
                col_beg: 4,
                col_end: 0,
                zero_based: false,
                meta_char: b'@',
                skip_lines: 0,
            },
            Preset::Vcf => TabixSchema {
                format: TbiFormat::Vcf,
                col_seq: 1,
                col_beg: 2,
                col_end: 0,
                zero_based: false,
                meta_char: b'#',
                skip_lines: 0,
            },
            Preset::Pileup => TabixSchema::generic(1, 2, 0, false),
        }
    }
}

impl FromStr for Preset {
    type Err = BiotabixError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gff" | "gtf" | "gff3" => Ok(Preset::Gff),
            "bed" => Ok(Preset::Bed),
            "psltbl" => Ok(Preset::Psltbl),
            "sam" => Ok(Preset::Sam),
            "vcf" => Ok(Preset::Vcf),
            "pileup" => Ok(Preset::Pileup),
            _ => Err(BiotabixError::UnknownPreset(s.to_string())),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
