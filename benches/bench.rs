//! Criterion benchmarks for the Sarissa postings format.
//!
//! Covers the hot paths of the codec:
//! - Packed block encoding and decoding
//! - Writing the postings of a term
//! - Full scans and skip-based advances over a written term

use std::hint::black_box;
use std::sync::Arc;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sarissa_postings::codec::packed::{BLOCK_SIZE, PackedCodec};
use sarissa_postings::postings::{
    DocIdIterator, FieldInfo, FieldInfos, IndexOptions, IntBlockTermState, NO_MORE_DOCS,
    PostingsEnum, PostingsFlags, PostingsFormatConfig, PostingsReader, PostingsWriter,
    SegmentReadState, SegmentWriteState, TermStats,
};
use sarissa_postings::storage::memory::MemoryStorage;
use sarissa_postings::storage::structured::{ByteBuffer, ByteSliceReader};

/// Generate sorted doc ids with their freqs and positions.
fn generate_postings(count: usize) -> Vec<(u32, Vec<u32>)> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut doc = 0;
    (0..count)
        .map(|_| {
            doc += rng.random_range(1..16);
            let freq = rng.random_range(1..5);
            let mut position = 0;
            let positions = (0..freq)
                .map(|_| {
                    position += rng.random_range(1..20);
                    position
                })
                .collect();
            (doc, positions)
        })
        .collect()
}

fn write_segment(
    field: &FieldInfo,
    postings: &[(u32, Vec<u32>)],
) -> (SegmentReadState, IntBlockTermState) {
    let storage = Arc::new(MemoryStorage::new_default());
    let state = SegmentWriteState::new(storage, "_0", FieldInfos::new(vec![field.clone()]));
    let mut writer = PostingsWriter::new(&state, PostingsFormatConfig::default()).unwrap();
    writer.set_field(field);
    writer.start_term(None);

    let mut ttf = 0;
    for (doc, positions) in postings {
        writer.start_doc(*doc, positions.len() as u32).unwrap();
        if field.index_options.has_positions() {
            for &position in positions {
                writer.add_position(position, None, -1, -1).unwrap();
            }
        }
        writer.finish_doc();
        ttf += positions.len() as u64;
    }
    let term = writer
        .finish_term(TermStats::new(postings.len() as u32, ttf))
        .unwrap();
    writer.close().unwrap();
    (SegmentReadState::from(&state), term)
}

/// Benchmark packed block encoding and decoding.
fn bench_packed_blocks(c: &mut Criterion) {
    let mut group = c.benchmark_group("packed_blocks");
    group.throughput(Throughput::Elements(BLOCK_SIZE as u64));

    let mut rng = StdRng::seed_from_u64(7);
    let mut values = [0u32; BLOCK_SIZE];
    for value in &mut values {
        *value = rng.random_range(0..1 << 11);
    }

    let mut codec = PackedCodec::new();
    group.bench_function("encode_block", |b| {
        let mut out = ByteBuffer::new();
        b.iter(|| {
            out.clear();
            codec.encode(black_box(&values), &mut out).unwrap();
            black_box(out.len())
        })
    });

    let mut encoded = ByteBuffer::new();
    codec.encode(&values, &mut encoded).unwrap();
    let bytes = encoded.into_inner();
    group.bench_function("decode_block", |b| {
        let mut decoded = [0u32; BLOCK_SIZE];
        b.iter(|| {
            let mut input = ByteSliceReader::new(black_box(&bytes));
            codec.decode(&mut input, &mut decoded).unwrap();
            black_box(decoded[BLOCK_SIZE - 1])
        })
    });

    group.finish();
}

/// Benchmark writing the postings of a term.
fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("postings_write");
    let postings = generate_postings(10_000);
    group.throughput(Throughput::Elements(postings.len() as u64));

    let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositions);
    group.bench_function("write_term_with_positions", |b| {
        b.iter(|| black_box(write_segment(&field, &postings)))
    });

    group.finish();
}

/// Benchmark iteration over a written term.
fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("postings_read");
    let postings = generate_postings(100_000);

    let field = FieldInfo::new("body", 0, IndexOptions::DocsAndFreqsAndPositions);
    let (read_state, term) = write_segment(&field, &postings);
    let reader = PostingsReader::open(&read_state, PostingsFormatConfig::default()).unwrap();

    group.throughput(Throughput::Elements(postings.len() as u64));
    group.bench_function("scan_docs_and_freqs", |b| {
        b.iter(|| {
            let mut iter = reader.postings(&field, &term, PostingsFlags::FREQS).unwrap();
            let mut sum = 0u64;
            while iter.next_doc().unwrap() != NO_MORE_DOCS {
                sum += iter.freq().unwrap() as u64;
            }
            black_box(sum)
        })
    });

    group.bench_function("scan_positions", |b| {
        b.iter(|| {
            let mut iter = reader.postings(&field, &term, PostingsFlags::POSITIONS).unwrap();
            let mut sum = 0u64;
            while iter.next_doc().unwrap() != NO_MORE_DOCS {
                for _ in 0..iter.freq().unwrap() {
                    sum += iter.next_position().unwrap() as u64;
                }
            }
            black_box(sum)
        })
    });

    // Every 1000th doc, as a conjunction with a sparse clause would.
    let targets: Vec<u32> = postings.iter().step_by(1_000).map(|(doc, _)| *doc).collect();
    group.throughput(Throughput::Elements(targets.len() as u64));
    group.bench_function("advance_sparse", |b| {
        b.iter(|| {
            let mut iter = reader.postings(&field, &term, PostingsFlags::FREQS).unwrap();
            for &target in &targets {
                black_box(iter.advance(target).unwrap());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_packed_blocks, bench_write, bench_read);
criterion_main!(benches);
