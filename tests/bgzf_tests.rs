//! Integration tests for BGZF compression and seekable reading

use biotabix::io::compression::{compress_file, is_bgzf, BGZF_EOF};
use biotabix::{
    tabix_compress, tabix_index, BgzfReader, BiotabixError, IndexOptions, Preset, TabixReader,
    VirtualOffset,
};
use std::fs::{self, File};
use std::io::{Read, Write};
use tempfile::TempDir;

fn numbered_lines(n: usize) -> String {
    (0..n)
        .map(|i| format!("chr1\t{}\t{}\tfeature_{:06}\n", i * 10, i * 10 + 5, i))
        .collect()
}

#[test]
fn test_compressed_file_decodes_to_original() {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("lines.bed");
    let gz = dir.path().join("lines.bed.gz");
    let text = numbered_lines(20_000);
    fs::write(&plain, &text).unwrap();

    tabix_compress(&plain, &gz, false).unwrap();
    assert!(is_bgzf(&gz).unwrap());
    assert!(!is_bgzf(&plain).unwrap());

    let bytes = fs::read(&gz).unwrap();
    assert_eq!(&bytes[bytes.len() - 28..], &BGZF_EOF);

    // Standard gzip tooling reads the concatenated members
    let mut decoded = String::new();
    flate2::read::MultiGzDecoder::new(File::open(&gz).unwrap())
        .read_to_string(&mut decoded)
        .unwrap();
    assert_eq!(decoded, text);

    // And so does the seekable reader
    let mut reader = BgzfReader::new(File::open(&gz).unwrap()).unwrap();
    let mut via_reader = String::new();
    reader.read_to_string(&mut via_reader).unwrap();
    assert_eq!(via_reader, text);
}

#[test]
fn test_virtual_offsets_address_lines() {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("lines.bed");
    let gz = dir.path().join("lines.bed.gz");
    fs::write(&plain, numbered_lines(20_000)).unwrap();
    compress_file(&plain, &gz, false).unwrap();

    let mut reader = BgzfReader::new(File::open(&gz).unwrap()).unwrap();
    let mut offsets: Vec<VirtualOffset> = Vec::new();
    let mut line = Vec::new();
    loop {
        let offset = reader.virtual_position();
        if !reader.read_line(&mut line).unwrap() {
            break;
        }
        offsets.push(offset);
    }
    assert_eq!(offsets.len(), 20_000);

    // Offsets are strictly increasing in file order
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));

    // Jump around backwards and forwards
    for &i in &[19_999usize, 3, 15_000, 0, 8_191] {
        reader.seek(offsets[i]).unwrap();
        reader.read_line(&mut line).unwrap();
        let text = String::from_utf8(line.clone()).unwrap();
        assert!(text.ends_with(&format!("feature_{:06}", i)), "{}", text);
    }
}

#[test]
fn test_seek_beyond_file_is_out_of_range() {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("lines.bed");
    let gz = dir.path().join("lines.bed.gz");
    fs::write(&plain, numbered_lines(10)).unwrap();
    compress_file(&plain, &gz, false).unwrap();

    let mut reader = BgzfReader::new(File::open(&gz).unwrap()).unwrap();
    let len = reader.compressed_len();
    assert_eq!(len, fs::metadata(&gz).unwrap().len());

    // The very end of the file is a valid position with nothing to read
    reader.seek(VirtualOffset::new(len, 0)).unwrap();
    let mut line = Vec::new();
    assert!(!reader.read_line(&mut line).unwrap());

    let err = reader.seek(VirtualOffset::new(len + 1, 0)).unwrap_err();
    assert!(matches!(err, BiotabixError::OutOfRange { .. }));
}

#[test]
fn test_corrupt_data_block_surfaces_error() {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("lines.bed");
    fs::write(&plain, numbered_lines(20_000)).unwrap();
    let data = tabix_index(&plain, &IndexOptions::preset(Preset::Bed)).unwrap();

    // Damage the deflate payload of the first block
    let mut bytes = fs::read(&data).unwrap();
    bytes[100] ^= 0xFF;
    bytes[101] ^= 0xFF;
    fs::write(&data, &bytes).unwrap();

    let reader = TabixReader::open(&data).unwrap();
    let results: Vec<_> = reader.fetch(None, None, None).unwrap().collect();
    let last = results.last().unwrap();
    assert!(
        matches!(last, Err(BiotabixError::CorruptBlock { offset: 0, .. })),
        "{:?}",
        last
    );
    // The error ends the sequence
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
}

#[test]
fn test_missing_eof_marker_tolerated() {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("lines.bed");
    let gz = dir.path().join("lines.bed.gz");
    let text = numbered_lines(100);
    fs::write(&plain, &text).unwrap();
    compress_file(&plain, &gz, false).unwrap();

    let mut bytes = fs::read(&gz).unwrap();
    bytes.truncate(bytes.len() - BGZF_EOF.len());
    let trimmed = dir.path().join("trimmed.bed.gz");
    File::create(&trimmed).unwrap().write_all(&bytes).unwrap();

    let mut reader = BgzfReader::new(File::open(&trimmed).unwrap()).unwrap();
    let mut decoded = String::new();
    reader.read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, text);
}

#[test]
fn test_compress_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("lines.bed");
    let gz = dir.path().join("lines.bed.gz");
    fs::write(&plain, numbered_lines(10)).unwrap();

    tabix_compress(&plain, &gz, false).unwrap();
    assert!(matches!(
        tabix_compress(&plain, &gz, false),
        Err(BiotabixError::FileExists(_))
    ));
    tabix_compress(&plain, &gz, true).unwrap();
}
