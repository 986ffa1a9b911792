//! Snapshot codec benchmarks
//!
//! Measures encode/store and load/decode cost of the snapshot codec, raw
//! versus gzip, for snapshots of increasing size. Document contents come
//! from a seeded RNG so runs are comparable.
//!
//! ```bash
//! cargo bench --bench codec_benchmarks
//! cargo bench --bench codec_benchmarks -- "codec_read"
//! ```

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use docvault_core::{
    BackupKind, CollectionSnapshot, DocumentRecord, MemoryBackupStore, Snapshot, SnapshotMetadata,
    StorageCodec,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;

const BENCH_SEED: u64 = 0x5EED_D0C5;

const DOCUMENT_COUNTS: [usize; 3] = [100, 1_000, 10_000];

fn build_snapshot(documents: usize) -> Snapshot {
    let mut rng = StdRng::seed_from_u64(BENCH_SEED);
    let created_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let products = (0..documents)
        .map(|i| {
            let data = json!({
                "sku": format!("SKU-{i:06}"),
                "price": rng.gen_range(1.0..500.0),
                "stock": rng.gen_range(0..10_000),
                "tags": ["catalog", "bench"],
            });
            DocumentRecord::new(format!("p{i}"), data.as_object().cloned().unwrap_or_default())
        })
        .collect();
    let categories = (0..documents / 10)
        .map(|i| {
            let data = json!({ "name": format!("category {i}"), "rank": rng.gen::<u32>() });
            DocumentRecord::new(format!("c{i}"), data.as_object().cloned().unwrap_or_default())
        })
        .collect();

    Snapshot::new(
        SnapshotMetadata::new("full_1704067200000", BackupKind::Full, created_at),
        vec![
            CollectionSnapshot::captured("products", products),
            CollectionSnapshot::captured("categories", categories),
        ],
    )
}

fn fresh_codec() -> StorageCodec {
    StorageCodec::new(Arc::new(MemoryBackupStore::new()))
}

fn codec_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_write");

    for count in DOCUMENT_COUNTS {
        let snapshot = build_snapshot(count);
        group.throughput(Throughput::Elements(count as u64));

        for (label, compress) in [("raw", false), ("gzip", true)] {
            group.bench_with_input(BenchmarkId::new(label, count), &snapshot, |b, snapshot| {
                // Keys are write-once, so every iteration gets its own store
                b.iter_batched(
                    fresh_codec,
                    |codec| black_box(codec.write(snapshot, compress).unwrap()),
                    BatchSize::SmallInput,
                )
            });
        }
    }

    group.finish();
}

fn codec_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_read");

    for count in DOCUMENT_COUNTS {
        let snapshot = build_snapshot(count);
        group.throughput(Throughput::Elements(count as u64));

        for (label, compress) in [("raw", false), ("gzip", true)] {
            let codec = fresh_codec();
            let written = codec.write(&snapshot, compress).unwrap();

            group.bench_with_input(BenchmarkId::new(label, count), &written.key, |b, key| {
                b.iter(|| black_box(codec.read_with_digest(key).unwrap()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, codec_write, codec_read);
criterion_main!(benches);
