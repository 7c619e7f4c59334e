// SPDX-License-Identifier: MIT OR Apache-2.0
//! Benchmarks for canonical JSON serialisation and digest truncation.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use std::collections::BTreeMap;

use peac_canon::{TruncateThreshold, canonicalize, digest, sha256_hex};

fn flat_object(fields: usize) -> serde_json::Value {
    let map: BTreeMap<String, serde_json::Value> = (0..fields)
        .map(|i| (format!("field_{i:04}"), json!(i)))
        .collect();
    serde_json::to_value(map).unwrap()
}

fn nested_object(depth: usize) -> serde_json::Value {
    let mut value = json!({"leaf": true});
    for i in 0..depth {
        value = json!({format!("level_{i}"): value});
    }
    value
}

fn bench_canonicalize_flat(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize_flat");
    for size in [10, 100, 1000] {
        let value = flat_object(size);
        let len = serde_json::to_string(&value).unwrap().len();
        group.throughput(Throughput::Bytes(len as u64));
        group.bench_with_input(BenchmarkId::new("fields", size), &value, |b, v| {
            b.iter(|| canonicalize(black_box(v)).unwrap());
        });
    }
    group.finish();
}

fn bench_canonicalize_nested(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize_nested");
    for depth in [5, 20, 50] {
        let value = nested_object(depth);
        group.bench_with_input(BenchmarkId::new("depth", depth), &value, |b, v| {
            b.iter(|| canonicalize(black_box(v)).unwrap());
        });
    }
    group.finish();
}

fn bench_sha256_hex(c: &mut Criterion) {
    let mut group = c.benchmark_group("sha256_hex");
    for &size in &[64usize, 1024, 65536] {
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("bytes", size), &data, |b, d| {
            b.iter(|| sha256_hex(black_box(d)));
        });
    }
    group.finish();
}

fn bench_digest_truncation(c: &mut Criterion) {
    let mut group = c.benchmark_group("digest_truncation");
    for &size in &[4096usize, 128 * 1024, 2 * 1024 * 1024] {
        let data: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("kib64", size), &data, |b, d| {
            b.iter(|| digest(black_box(d), TruncateThreshold::Kib64));
        });
        group.bench_with_input(BenchmarkId::new("mib1", size), &data, |b, d| {
            b.iter(|| digest(black_box(d), TruncateThreshold::Mib1));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_canonicalize_flat,
    bench_canonicalize_nested,
    bench_sha256_hex,
    bench_digest_truncation,
);
criterion_main!(benches);
