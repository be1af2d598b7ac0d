//! Tabix Query Performance Benchmarks
//!
//! Compares indexed region queries against a full scan with filtering.
//!
//! # Benchmarks
//!
//! - `index_load`: load the `.tbi` artifact
//! - `indexed_query/small_region`: 10 Kbp window through the index
//! - `indexed_query/medium_region`: 1 Mbp window through the index
//! - `full_scan/small_region`: decompress everything, filter the same 10 Kbp
//! - `index_build`: build the index from the compressed file
//!
//! The fixture (200K BED records over two contigs) is generated into a
//! temporary directory before measuring.

use biotabix::formats::index::TbiIndex;
use biotabix::{tabix_index, IndexOptions, Preset, TabixReader};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const RECORDS_PER_CONTIG: u64 = 100_000;

fn make_fixture(dir: &Path) -> PathBuf {
    let mut text = String::new();
    for contig in ["chr1", "chr2"] {
        for i in 0..RECORDS_PER_CONTIG {
            let start = i * 50;
            text.push_str(&format!(
                "{}\t{}\t{}\tfeature_{}\t{}\t+\n",
                contig,
                start,
                start + 120,
                i,
                i % 1000
            ));
        }
    }
    let plain = dir.join("bench.bed");
    fs::write(&plain, text).expect("Failed to write fixture");
    tabix_index(&plain, &IndexOptions::preset(Preset::Bed)).expect("Failed to index fixture")
}

fn count_lines(reader: &TabixReader, contig: &str, start: u64, end: u64) -> usize {
    reader
        .fetch(Some(contig), Some(start), Some(end))
        .expect("Failed to create query")
        .map(|r| r.expect("Failed to read record"))
        .count()
}

fn bench_tabix(c: &mut Criterion) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let data = make_fixture(dir.path());
    let index_path = biotabix::io::tabix::default_index_path(&data);
    let reader = TabixReader::open(&data).expect("Failed to open indexed file");

    c.bench_function("index_load", |b| {
        b.iter(|| TbiIndex::from_path(black_box(&index_path)).expect("Failed to load index"));
    });

    let mut group = c.benchmark_group("indexed_query");
    // ~200 records per 10 Kbp window
    group.throughput(Throughput::Elements(200));
    group.bench_function("small_region", |b| {
        b.iter(|| count_lines(&reader, black_box("chr1"), 2_500_000, 2_510_000));
    });
    group.throughput(Throughput::Elements(20_000));
    group.bench_function("medium_region", |b| {
        b.iter(|| count_lines(&reader, black_box("chr2"), 1_000_000, 2_000_000));
    });
    group.finish();

    let mut group = c.benchmark_group("full_scan");
    group.throughput(Throughput::Elements(2 * RECORDS_PER_CONTIG));
    group.bench_function("small_region", |b| {
        b.iter(|| {
            reader
                .fetch(None, None, None)
                .expect("Failed to create scan")
                .map(|r| r.expect("Failed to read record"))
                .filter(|line| {
                    let mut fields = line.split('\t');
                    let contig = fields.next().unwrap_or("");
                    let start: u64 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
                    let end: u64 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(0);
                    contig == "chr1" && start < 2_510_000 && end > 2_500_000
                })
                .count()
        });
    });
    group.finish();

    c.bench_function("index_build", |b| {
        b.iter(|| TbiIndex::build(black_box(&data), &Preset::Bed.schema()).expect("Failed to build"));
    });
}

criterion_group! {
    name = tabix_benches;
    config = Criterion::default()
        .sample_size(30)
        .measurement_time(std::time::Duration::from_secs(10));
    targets = bench_tabix
}

criterion_main!(tabix_benches);
