//! Many workers grabbing overlapping entity sets in arbitrary order.
//!
//! Every worker marks an entity busy only after all its acquires returned.
//! A second marker on the same entity means two threads owned it at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use oroboros_sync::{Lockable, SyncConfig, SyncContext, WaitStrategy};

const WORKERS: usize = 4;
const ROUNDS: usize = 300;
const ENTITIES: usize = 5;

struct Entity {
    sync: Lockable,
    busy: AtomicUsize,
    touched: AtomicUsize,
}

fn run(strategy: WaitStrategy) {
    let ctx = SyncContext::new(SyncConfig {
        wait_strategy: strategy,
        park_timeout_us: 100,
        ..SyncConfig::default()
    })
    .unwrap();

    let entities: Arc<Vec<Entity>> = Arc::new(
        (0..ENTITIES)
            .map(|_| Entity {
                sync: Lockable::new_in(&ctx),
                busy: AtomicUsize::new(0),
                touched: AtomicUsize::new(0),
            })
            .collect(),
    );

    let handles: Vec<_> = (0..WORKERS)
        .map(|w| {
            let ctx = ctx.clone();
            let entities = Arc::clone(&entities);
            thread::spawn(move || {
                let worker = ctx.enter_worker().unwrap();
                worker.arbiter().push_priority(10 + (w % 2) as i32);

                for round in 0..ROUNDS {
                    // Opposite orders on neighbouring workers.
                    let first = (w + round) % ENTITIES;
                    let second = (first + 1 + w % 2) % ENTITIES;
                    let picked = if w % 2 == 0 { [first, second] } else { [second, first] };

                    for &i in &picked {
                        entities[i].sync.acquire().unwrap();
                    }

                    for &i in &picked {
                        assert!(worker.arbiter().owns(&entities[i].sync));
                        assert_eq!(entities[i].busy.fetch_add(1, Ordering::SeqCst), 0);
                    }
                    thread::yield_now();
                    for &i in &picked {
                        entities[i].touched.fetch_add(1, Ordering::Relaxed);
                        entities[i].busy.fetch_sub(1, Ordering::SeqCst);
                    }

                    worker.arbiter().unlock_all();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let touched: usize = entities.iter().map(|e| e.touched.load(Ordering::Relaxed)).sum();
    assert_eq!(touched, WORKERS * ROUNDS * 2);
    assert!(entities.iter().all(|e| !e.sync.is_locked()));

    let stats = ctx.stats();
    assert!(stats.acquisitions >= (WORKERS * ROUNDS * 2) as u64);
    println!("{strategy:?}: {stats:?}");
}

#[test]
fn test_single_ownership_under_contention_yield() {
    run(WaitStrategy::Yield);
}

#[test]
fn test_single_ownership_under_contention_park() {
    run(WaitStrategy::Park);
}
