//! Aggregation benchmarks
//!
//! Measures parsing and metric derivation over result files of typical size.
//!
//! Run with: cargo bench --bench aggregations

use bench_publish::metrics::{aggregate, parse_records, BenchmarkRecord, Choice};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const SMALL_SIZE: usize = 80; // MT-Bench question count
const MEDIUM_SIZE: usize = 5_000;

#[allow(clippy::cast_precision_loss)]
fn records(n: usize) -> Vec<BenchmarkRecord> {
    (0..n)
        .map(|i| {
            let turns = 2;
            let wall: Vec<f64> = (0..turns).map(|t| 1.0 + (i + t) as f64 * 0.01).collect();
            let steps: Vec<f64> = (0..turns).map(|t| 50.0 + t as f64).collect();
            let tokens: Vec<f64> = (0..turns).map(|t| 200.0 + (i % 7 + t) as f64).collect();
            let accept: Vec<f64> = (0..100).map(|s| ((i + s) % 5) as f64).collect();
            BenchmarkRecord::with_choice(Choice::new(wall, steps, tokens, accept))
        })
        .collect()
}

fn jsonl(n: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records(n) {
        let choice = &record.choices()[0];
        let line = serde_json::json!({
            "choices": [{
                "wall_time": choice.wall_time(),
                "decoding_steps": choice.decoding_steps(),
                "new_tokens": choice.new_tokens(),
                "accept_lengths": choice.accept_lengths(),
            }]
        });
        out.extend_from_slice(line.to_string().as_bytes());
        out.push(b'\n');
    }
    out
}

/// Benchmark metric derivation over parsed records
fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");

    for size in [SMALL_SIZE, MEDIUM_SIZE] {
        let data = records(size);
        group.bench_with_input(BenchmarkId::new("records", size), &data, |b, data| {
            b.iter(|| aggregate(black_box(data), "mt_bench"));
        });
    }

    group.finish();
}

/// Benchmark parsing plus derivation, as done per uploaded file
fn bench_parse_and_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_and_aggregate");

    for size in [SMALL_SIZE, MEDIUM_SIZE] {
        let bytes = jsonl(size);
        group.bench_with_input(BenchmarkId::new("jsonl", size), &bytes, |b, bytes| {
            b.iter(|| {
                let parsed = parse_records(black_box(bytes));
                aggregate(&parsed.records, "mt_bench")
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate, bench_parse_and_aggregate);
criterion_main!(benches);
