//! # Lock Arbitration Benchmark
//!
//! Measures the coordination overhead on the paths a simulation tick hits:
//! - Uncontended acquire/release of one entity
//! - Re-entrant acquire of an already held entity
//! - Acquiring a batch of entities and dropping them with unlock_all
//! - Contended hand-off between worker threads
//!
//! Run with: `cargo bench --package oroboros_sync`

// Benchmarks don't need docs and may have intentionally unused code
#![allow(missing_docs)]
#![allow(dead_code)]

use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oroboros_sync::{Lockable, SyncConfig, SyncContext, WaitStrategy};

fn context(strategy: WaitStrategy) -> SyncContext {
    SyncContext::new(SyncConfig {
        wait_strategy: strategy,
        ..SyncConfig::default()
    })
    .expect("valid config")
}

/// Benchmark: acquire + release with nobody else around.
fn bench_uncontended(c: &mut Criterion) {
    let ctx = context(WaitStrategy::Yield);
    let lockable = Lockable::new_in(&ctx);
    let arbiter = ctx.register_arbiter("bench").expect("arbiter");

    c.bench_function("acquire_release_uncontended", |b| {
        b.iter(|| {
            lockable.acquire_with(&arbiter).expect("acquire");
            lockable.release_with(&arbiter);
        });
    });

    c.bench_function("acquire_reentrant", |b| {
        lockable.acquire_with(&arbiter).expect("acquire");
        b.iter(|| {
            lockable.acquire_with(black_box(&arbiter)).expect("acquire");
        });
        lockable.release_with(&arbiter);
    });
}

/// Benchmark: lock N entities, then drop them all at once.
fn bench_batch_unlock_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_unlock_all");

    for count in [8usize, 64, 512] {
        let ctx = context(WaitStrategy::Yield);
        let arbiter = ctx.register_arbiter("bench").expect("arbiter");
        let lockables: Vec<Lockable> = (0..count).map(|_| Lockable::new_in(&ctx)).collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                for l in &lockables {
                    l.acquire_with(&arbiter).expect("acquire");
                }
                black_box(arbiter.unlock_all())
            });
        });
    }

    group.finish();
}

/// Benchmark: two threads ping-ponging the same entity.
fn bench_contended_handoff(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_handoff");
    group.sample_size(20);

    for strategy in [WaitStrategy::Yield, WaitStrategy::Spin, WaitStrategy::Park] {
        group.bench_function(format!("{strategy:?}"), |b| {
            b.iter(|| {
                let ctx = context(strategy);
                let shared = Arc::new(Lockable::new_in(&ctx));

                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let ctx = ctx.clone();
                        let shared = Arc::clone(&shared);
                        thread::spawn(move || {
                            let _worker = ctx.enter_worker().expect("worker");
                            for _ in 0..200 {
                                shared.acquire().expect("acquire");
                                shared.release();
                            }
                        })
                    })
                    .collect();

                for h in handles {
                    h.join().expect("join");
                }
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_uncontended,
    bench_batch_unlock_all,
    bench_contended_handoff,
);

criterion_main!(benches);
