//! Benchmark: streaming digest throughput per algorithm and chunk size

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs;
use tempfile::TempDir;

use filedrop_core::{CancelToken, DigestAlgorithm, StreamHasher};

const SIZE: usize = 1024 * 1024; // 1MB

fn bench_digest_reader(c: &mut Criterion) {
    let data: Vec<u8> = (0..SIZE).map(|i| (i % 251) as u8).collect();
    let cancel = CancelToken::new();

    let mut group = c.benchmark_group("digest_reader_1mb");
    group.throughput(Throughput::Bytes(SIZE as u64));
    for algorithm in [DigestAlgorithm::Sha256, DigestAlgorithm::Blake3] {
        let hasher = StreamHasher::new(algorithm);
        group.bench_with_input(BenchmarkId::from_parameter(algorithm), &data, |b, data| {
            b.iter(|| hasher.digest_reader(black_box(&data[..]), &cancel).unwrap())
        });
    }
    group.finish();
}

fn bench_chunk_size(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("blob");
    fs::write(&path, vec![b'X'; SIZE]).unwrap();
    let cancel = CancelToken::new();

    let mut group = c.benchmark_group("digest_file_chunk");
    group.throughput(Throughput::Bytes(SIZE as u64));
    for chunk in [4 * 1024, 64 * 1024, 1024 * 1024] {
        let hasher = StreamHasher::new(DigestAlgorithm::Sha256).with_chunk_size(chunk);
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &path, |b, path| {
            b.iter(|| hasher.digest_file(black_box(path), &cancel).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_digest_reader, bench_chunk_size);
criterion_main!(benches);
