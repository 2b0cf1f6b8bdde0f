//! Routing benchmarks for vigil-core.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use vigil_core::Router;

fn bench_route_reading(c: &mut Criterion) {
    let router = Router::new();

    let mut group = c.benchmark_group("route");
    group.throughput(Throughput::Elements(1));
    group.bench_function("quiet_reading", |b| {
        b.iter(|| router.route(black_box("dht/temperature"), black_box(b"25.5")))
    });
    group.bench_function("status", |b| {
        b.iter(|| router.route(black_box("led/status"), black_box(b"on")))
    });
    group.bench_function("unknown_topic", |b| {
        b.iter(|| router.route(black_box("sensor/pressure"), black_box(b"1013")))
    });
    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let router = Router::new();
    for i in 0..20 {
        router.route("gas/value", i.to_string().as_bytes());
        router.route("dht/humidity", i.to_string().as_bytes());
    }

    c.bench_function("snapshot_full_window", |b| b.iter(|| router.snapshot()));
}

criterion_group!(benches, bench_route_reading, bench_snapshot);
criterion_main!(benches);
