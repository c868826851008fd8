use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use geodex::segment::{decode_vbyte, encode_vbyte};
use geodex::{Document, GeometricConfig, GeometricIndex, MergeMode, QueryNode};

const WORDS: [&str; 12] = [
    "rust", "memory", "safety", "segment", "merge", "index", "query", "posting", "block", "radix",
    "flush", "extent",
];

fn make_document(number: u64) -> Document {
    let terms = (0..40).map(|i| WORDS[((number as usize) * 7 + i * 3) % WORDS.len()]);
    Document::new(format!("doc-{}", number), number).with_terms(terms)
}

fn config(dir: &TempDir, block_size: u64, mode: MergeMode) -> GeometricConfig {
    GeometricConfig::new(dir.path())
        .with_block_size(block_size)
        .with_radix(3)
        .with_merge_mode(mode)
}

fn build_index(dir: &TempDir, documents: u64, block_size: u64) -> GeometricIndex {
    let index = GeometricIndex::open(config(dir, block_size, MergeMode::Deferred)).unwrap();
    for n in 0..documents {
        index.process(make_document(n)).unwrap();
    }
    index
}

fn bench_ingest(c: &mut Criterion) {
    let documents = 2_000u64;
    let mut group = c.benchmark_group("ingest");
    group.throughput(Throughput::Elements(documents));
    group.sample_size(10);
    for &block_size in &[100u64, 500, 2_000] {
        group.bench_with_input(
            BenchmarkId::from_parameter(block_size),
            &block_size,
            |b, &block_size| {
                b.iter(|| {
                    let dir = TempDir::new().unwrap();
                    let index =
                        GeometricIndex::open(config(&dir, block_size, MergeMode::Geometric))
                            .unwrap();
                    for n in 0..documents {
                        index.process(make_document(n)).unwrap();
                    }
                    black_box(index.close().unwrap());
                });
            },
        );
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let documents = 5_000u64;
    // more blocks means more shards to fan out over
    let mut envs = Vec::new();
    for &block_size in &[5_000u64, 1_000, 250] {
        let dir = TempDir::new().unwrap();
        let index = build_index(&dir, documents, block_size);
        envs.push((block_size, dir, index));
    }

    let bag = QueryNode::bag_of_words(["rust", "memory", "radix"]);
    let phrase = QueryNode::phrase(["memory", "segment"]);

    let mut group = c.benchmark_group("search");
    for (_block_size, _dir, index) in envs.iter() {
        let shards = index.segment_count() + 1;
        group.bench_with_input(
            BenchmarkId::new("bag_of_words", shards),
            index,
            |b, index| {
                b.iter(|| black_box(index.evaluate(&bag, 10).unwrap()));
            },
        );
        group.bench_with_input(
            BenchmarkId::new("phrase", shards),
            index,
            |b, index| {
                b.iter(|| black_box(index.evaluate(&phrase, 10).unwrap()));
            },
        );
    }
    group.finish();
}

fn bench_vbyte(c: &mut Criterion) {
    let values: Vec<u64> = (0..10_000u64).map(|i| i * i).collect();
    let mut encoded = Vec::new();
    for &v in &values {
        encode_vbyte(v, &mut encoded);
    }

    c.bench_function("vbyte_decode", |b| {
        b.iter(|| {
            let mut pos = 0;
            let mut sum = 0u64;
            while pos < encoded.len() {
                sum = sum.wrapping_add(decode_vbyte(&encoded, &mut pos).unwrap());
            }
            black_box(sum)
        });
    });
}

criterion_group!(benches, bench_ingest, bench_search, bench_vbyte);
criterion_main!(benches);
