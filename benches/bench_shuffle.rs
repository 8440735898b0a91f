//! Criterion benches for the queue hot paths and the table pipelines.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use sluice::queue::{BatchedRing, QueueConsumer, QueueProducer, SectionQueue, ShuffleQueue};
use sluice::{HashKind, PartitionedTable};

fn bench_queue_roundtrip<Q: ShuffleQueue>(c: &mut Criterion, name: &str) {
    let mut group = c.benchmark_group(name);
    const BATCH: u64 = 1024;
    group.throughput(Throughput::Elements(BATCH));
    group.bench_function("enqueue_dequeue_1k", |b| {
        let (mut tx, mut rx) = Q::pair(2048).unwrap();
        b.iter(|| {
            for k in 1..=BATCH {
                while tx.enqueue(black_box(k)).is_err() {}
            }
            for _ in 0..BATCH {
                while rx.dequeue().is_err() {}
            }
        });
    });
    group.finish();
}

fn bench_table_insert(c: &mut Criterion) {
    let keys: Vec<u64> = (1..=10_000u64).map(|k| (k % 4096) + 1).collect();
    let mut group = c.benchmark_group("table");
    group.throughput(Throughput::Elements(keys.len() as u64));

    group.bench_function("insert_batch_pipelined", |b| {
        b.iter(|| {
            let mut t = PartitionedTable::new(16_384, 0, HashKind::Xxh3, 64, false, false).unwrap();
            t.insert_batch(black_box(&keys));
            t.flush_inserts();
            black_box(t.fill())
        });
    });

    group.bench_function("insert_one_scalar", |b| {
        b.iter(|| {
            let mut t = PartitionedTable::new(16_384, 0, HashKind::Xxh3, 64, false, false).unwrap();
            for &k in &keys {
                t.insert_one(black_box(k));
            }
            black_box(t.fill())
        });
    });

    group.finish();
}

fn bench_queues(c: &mut Criterion) {
    bench_queue_roundtrip::<BatchedRing>(c, "batched_ring");
    bench_queue_roundtrip::<SectionQueue>(c, "section_queue");
}

criterion_group!(benches, bench_queues, bench_table_insert);
criterion_main!(benches);
