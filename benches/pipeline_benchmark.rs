use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use eureka::archive::{self, ArchiveEntry};
use eureka::{crypto, SymmetricKey};

fn benchmark_seal_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal_open");

    let sizes = [("1KB", 1024), ("64KB", 64 * 1024), ("1MB", 1024 * 1024)];

    for (name, size) in sizes {
        let stream = archive::encode(&[ArchiveEntry::file("payload.bin", vec![0u8; size])]).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("seal", name), &stream, |b, stream| {
            b.iter(|| {
                // Every seal needs its own key.
                let key = SymmetricKey::generate().unwrap();
                crypto::seal(black_box(stream), &key).unwrap()
            });
        });

        let key = SymmetricKey::generate().unwrap();
        let blob = crypto::seal(&stream, &key).unwrap();
        group.bench_with_input(BenchmarkId::new("open", name), &blob, |b, blob| {
            b.iter(|| crypto::open(black_box(blob.as_bytes()), &key).unwrap());
        });

        group.bench_with_input(BenchmarkId::new("decode", name), &stream, |b, stream| {
            b.iter(|| archive::decode(black_box(stream)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_seal_open);
criterion_main!(benches);
