//! Codec benchmarks for vigil-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use vigil_protocol::{codec, Topic};

fn bench_parse_reading(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_reading");
    group.bench_function("integer", |b| {
        b.iter(|| codec::parse_reading(black_box(b"4500")))
    });
    group.bench_function("decimal_with_newline", |b| {
        b.iter(|| codec::parse_reading(black_box(b"  25.5\n")))
    });
    group.bench_function("malformed", |b| {
        b.iter(|| codec::reading_or_nan(black_box(b"NaN")))
    });
    group.finish();
}

fn bench_topic_lookup(c: &mut Criterion) {
    c.bench_function("topic_lookup", |b| {
        b.iter(|| Topic::parse(black_box("dht/humidity")))
    });
}

criterion_group!(benches, bench_parse_reading, bench_topic_lookup);
criterion_main!(benches);
