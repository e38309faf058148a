//! Registry and pointer guard benchmarks.
//!
//! Run with: cargo bench --bench bridge_bench

use std::ffi::c_void;
use std::mem;

use cephlink_bridge::{with_sizes, Callbacks, Hint, PtrGuard, Sizer};
use cephlink_config::GuardConfig;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("add_remove", |b| {
        let cbks: Callbacks<u64> = Callbacks::new();
        b.iter(|| {
            let token = cbks.add(black_box(42u64));
            cbks.remove(token);
        });
    });

    for live in [16usize, 1024, 65536] {
        let cbks: Callbacks<u64> = Callbacks::new();
        let tokens: Vec<_> = (0..live as u64).map(|v| cbks.add(v)).collect();
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("lookup", live), &tokens, |b, tokens| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % tokens.len();
                black_box(cbks.lookup(tokens[i]))
            });
        });
    }

    group.finish();
}

fn bench_guard(c: &mut Criterion) {
    let mut group = c.benchmark_group("ptrguard");
    let config = GuardConfig::default();

    group.bench_function("store_release", |b| {
        let cell = unsafe { libc::calloc(1, mem::size_of::<*mut c_void>()) } as *mut *mut c_void;
        assert!(!cell.is_null());
        let mut value = 0u64;
        let addr = &mut value as *mut u64 as *mut c_void;
        b.iter(|| {
            let mut guard = unsafe { PtrGuard::with_config(cell, addr, (), &config) }.unwrap();
            guard.release();
        });
        unsafe { libc::free(cell as *mut c_void) };
    });

    group.finish();
}

fn bench_sizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry");

    group.bench_function("sizer_exhaust_1k", |b| {
        b.iter(|| {
            let mut sizer = Sizer::new_ev(1, 1024, ());
            while sizer.should_continue() {
                let _ = sizer.update(Err(()));
            }
            black_box(sizer.size())
        });
    });

    group.bench_function("with_sizes_1k", |b| {
        b.iter(|| {
            let mut calls = 0;
            with_sizes(1, black_box(1024), |_| {
                calls += 1;
                Hint::DoubleSize
            });
            black_box(calls)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_registry, bench_guard, bench_sizer);
criterion_main!(benches);
