//! Benchmarks for payload building and the enqueue path.
//!
//! Covers the per-tick hot path: normalizing signal groups into a record,
//! computing a diff against the previous tick, serializing to NDJSON, and
//! handing the payload to the worker.
//!
//! Run with `cargo bench --features benchmark`.

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use serde_json::{Value, json};
use std::hint::black_box;

use telegraph::test_utils::MockTransport;
use telegraph::{StreamConfig, StreamPayloadBuilder, WorkerManager};

fn wide_signals(tick: u64) -> Vec<(String, Value)> {
    vec![
        ("agents".to_string(), json!({"alice": {"energy": 0.9, "tick": tick}, "bob": {"energy": 0.4}})),
        ("world".to_string(), json!({"weather": "clear", "time_of_day": tick % 24})),
        ("queues".to_string(), json!({"fridge": 3, "shower": 1, "stove": 0})),
        ("economy".to_string(), json!({"prices": {"meal": 4.5, "coffee": 2.0}})),
        ("events".to_string(), json!([{"kind": "affordance", "actor": "alice"}])),
    ]
}

fn bench_snapshot_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_build");
    let mut builder = StreamPayloadBuilder::new("1.0", false);

    group.bench_function("snapshot", |b| {
        let mut tick = 0;
        b.iter(|| {
            tick += 1;
            let record = builder.build(black_box(tick), wide_signals(tick));
            black_box(record.to_payload().unwrap())
        })
    });
    group.finish();
}

fn bench_diff_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("payload_build");
    let mut builder = StreamPayloadBuilder::new("1.0", true);
    builder.build(0, wide_signals(0));

    group.bench_function("diff_single_field_change", |b| {
        let mut tick = 0;
        b.iter(|| {
            tick += 1;
            // only `world.time_of_day` and agent ticks change between calls
            let record = builder.build(black_box(tick), wide_signals(tick));
            black_box(record.to_payload().unwrap())
        })
    });
    group.finish();
}

fn bench_enqueue_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    let mock = MockTransport::new();
    let config = StreamConfig {
        worker_poll_seconds: 0.01,
        backoff_seconds: 0.0,
        ..StreamConfig::default()
    };
    let worker = WorkerManager::new(&config, Box::new(mock)).expect("worker construction");
    worker.start().expect("worker start");

    let mut builder = StreamPayloadBuilder::new("1.0", false);
    let payload = builder.build(1, wide_signals(1)).to_payload().unwrap();
    group.throughput(Throughput::Bytes(payload.len() as u64));

    group.bench_function("enqueue_and_flush", |b| {
        let mut tick = 0;
        b.iter(|| {
            tick += 1;
            let record = builder.build(tick, wide_signals(tick));
            worker.enqueue(record.to_payload().unwrap());
        })
    });
    group.finish();
    worker.close();
}

criterion_group!(benches, bench_snapshot_build, bench_diff_build, bench_enqueue_path);
criterion_main!(benches);
