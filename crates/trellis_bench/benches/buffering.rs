//! Write buffer benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;
use trellis_bench::utils::{generate_ids, NullWriter};
use trellis_core::{BackpressureController, SystemClock, WriteBuffer, WriteBufferConfig};

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn buffer(max_buffer_size: usize) -> WriteBuffer<u64> {
    WriteBuffer::new(
        "bench",
        Arc::new(NullWriter),
        Arc::new(BackpressureController::default()),
        Arc::new(SystemClock),
        WriteBufferConfig::new()
            .max_buffer_size(max_buffer_size)
            .min_flush_size(1),
    )
    .unwrap()
}

/// Benchmark adds over id pools of varying overlap.
fn bench_add(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("add");

    for distinct in [10, 1_000, 100_000].iter() {
        let ids = generate_ids(10_000, *distinct);
        group.throughput(Throughput::Elements(ids.len() as u64));
        group.bench_with_input(BenchmarkId::new("distinct", distinct), &ids, |b, ids| {
            b.to_async(&rt).iter(|| async move {
                let buf = buffer(1_000);
                for (i, id) in ids.iter().enumerate() {
                    buf.add(id.as_str(), black_box(i as u64)).await;
                }
                buf.force_flush().await
            });
        });
    }

    group.finish();
}

/// Benchmark draining a full buffer.
fn bench_drain(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("drain");

    for size in [100, 1_000, 5_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let buf = buffer(size + 1);
                for i in 0..size {
                    buf.add(format!("id-{i}"), i as u64).await;
                }
                black_box(buf.force_flush().await)
            });
        });
    }

    group.finish();
}

/// Benchmark concurrent writers sharing one buffer.
fn bench_concurrent_add(c: &mut Criterion) {
    let rt = runtime();

    c.bench_function("concurrent_add_4x1000", |b| {
        b.to_async(&rt).iter(|| async {
            let buf = buffer(500);
            let handles: Vec<_> = (0..4)
                .map(|task| {
                    let buf = buf.clone();
                    tokio::spawn(async move {
                        for op in 0..1_000u64 {
                            buf.add(format!("id-{}", op % 300), task * 1_000 + op).await;
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }
            buf.shutdown().await
        });
    });
}

criterion_group!(benches, bench_add, bench_drain, bench_concurrent_add);

criterion_main!(benches);
