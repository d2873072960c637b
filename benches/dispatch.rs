// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Callback dispatch benchmarks.
//
// Run with:
//   cargo bench --bench dispatch
//
// Groups:
//   call_all: CallbackManager::call over N registered callbacks
//   call_by_name: NameCallbackManager::call hitting one name among N
//   add_remove: register then unregister (with wait) one callback

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use libsync::{CallbackManager, NameCallbackManager};

const COUNTS: &[usize] = &[1, 16, 256];

fn bench_call_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_all");

    for &n in COUNTS {
        for concurrent in [false, true] {
            let mgr: CallbackManager<u64> = CallbackManager::new(0, concurrent);
            let sink = Arc::new(AtomicU64::new(0));
            for _ in 0..n {
                let s = Arc::clone(&sink);
                mgr.add_callback(move |v| {
                    s.fetch_add(*v, Ordering::Relaxed);
                });
            }
            let label = if concurrent { "shared" } else { "exclusive" };
            group.throughput(Throughput::Elements(n as u64));
            group.bench_with_input(BenchmarkId::new(label, n), &n, |b, _| {
                b.iter(|| black_box(mgr.call(black_box(&1))));
            });
        }
    }

    group.finish();
}

fn bench_call_by_name(c: &mut Criterion) {
    let mut group = c.benchmark_group("call_by_name");

    for &n in COUNTS {
        let mgr: NameCallbackManager<u32, u64> = NameCallbackManager::default();
        let sink = Arc::new(AtomicU64::new(0));
        for name in 0..n as u32 {
            let s = Arc::clone(&sink);
            mgr.add_callback(name, move |v| {
                s.fetch_add(*v, Ordering::Relaxed);
            });
        }
        let target = (n / 2) as u32;
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| black_box(mgr.call(black_box(&target), &1)));
        });
    }

    group.finish();
}

fn bench_add_remove(c: &mut Criterion) {
    let mgr: CallbackManager = CallbackManager::default();
    c.bench_function("add_remove", |b| {
        b.iter(|| {
            let id = mgr.add_callback(|_| {});
            black_box(mgr.remove_callback(id, true))
        });
    });
}

criterion_group!(benches, bench_call_all, bench_call_by_name, bench_add_remove);
criterion_main!(benches);
