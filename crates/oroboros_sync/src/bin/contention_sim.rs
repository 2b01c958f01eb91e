//! # Contention Simulation
//!
//! Spins up a worker pool over a shared world of critters and maps and
//! pushes interaction jobs through it. Each job locks the critters and the
//! map involved, in whatever order the job lists them, so lock ordering is
//! left entirely to the arbitration rules.
//!
//! Optional first argument: path to a TOML sync config.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver};
use oroboros_sync::{Lockable, SyncConfig, SyncContext, SyncResult};

/// Worker threads in the pool.
const WORKERS: usize = 8;
/// Critters in the world.
const CRITTERS: usize = 64;
/// Maps in the world.
const MAPS: usize = 4;
/// Interaction jobs pushed through the pool.
const JOBS: usize = 50_000;
/// Priority used for map transfers.
const TRANSFER_PRIORITY: i32 = 90;

/// A shared world entity: the lock tag plus some mutable state.
struct Entity {
    sync: Lockable,
    value: AtomicI64,
}

impl Entity {
    fn new(ctx: &SyncContext) -> Self {
        Self {
            sync: Lockable::new_in(ctx),
            value: AtomicI64::new(0),
        }
    }
}

struct World {
    critters: Vec<Entity>,
    maps: Vec<Entity>,
}

/// One unit of simulation work.
#[derive(Clone, Copy, Debug)]
enum Job {
    /// Critter `a` hits critter `b` on `map`.
    Attack { a: usize, b: usize, map: usize },
    /// Critter moves from one map to another.
    Transfer { critter: usize, from: usize, to: usize },
}

impl Job {
    fn generate(seq: usize) -> Self {
        let a = (seq * 7) % CRITTERS;
        let b = (seq * 13 + 5) % CRITTERS;
        if seq % 10 == 0 {
            Job::Transfer {
                critter: a,
                from: seq % MAPS,
                to: (seq + 1) % MAPS,
            }
        } else {
            Job::Attack {
                a,
                b: if a == b { (b + 1) % CRITTERS } else { b },
                map: seq % MAPS,
            }
        }
    }
}

fn run_job(world: &World, ctx: &SyncContext, job: Job) -> SyncResult<()> {
    let arbiter = ctx.current_arbiter()?;
    match job {
        Job::Attack { a, b, map } => {
            world.critters[a].sync.acquire()?;
            world.critters[b].sync.acquire()?;
            world.maps[map].sync.acquire()?;

            world.critters[b].value.fetch_sub(1, Ordering::Relaxed);
            world.critters[a].value.fetch_add(1, Ordering::Relaxed);
            world.maps[map].value.fetch_add(1, Ordering::Relaxed);
        }
        Job::Transfer { critter, from, to } => {
            let _critical = arbiter.elevate(TRANSFER_PRIORITY);
            world.maps[from].sync.acquire()?;
            world.critters[critter].sync.acquire()?;
            world.maps[to].sync.acquire()?;

            world.maps[from].value.fetch_sub(1, Ordering::Relaxed);
            world.maps[to].value.fetch_add(1, Ordering::Relaxed);
        }
    }
    // Locks are held until the end of the job, like a logic cycle.
    arbiter.unlock_all();
    Ok(())
}

fn worker_loop(world: &World, ctx: &SyncContext, jobs: &Receiver<Job>) -> SyncResult<usize> {
    let _worker = ctx.enter_worker()?;
    let mut done = 0;
    while let Ok(job) = jobs.recv() {
        run_job(world, ctx, job)?;
        done += 1;
    }
    Ok(done)
}

fn load_config() -> SyncResult<SyncConfig> {
    match std::env::args().nth(1) {
        Some(path) => SyncConfig::from_toml_file(path),
        None => Ok(SyncConfig::default()),
    }
}

fn main() -> SyncResult<()> {
    let config = load_config()?;
    println!("=== OROBOROS Sync Contention Simulation ===");
    println!("Config: {config:?}");

    let ctx = SyncContext::new(config)?;
    let world = Arc::new(World {
        critters: (0..CRITTERS).map(|_| Entity::new(&ctx)).collect(),
        maps: (0..MAPS).map(|_| Entity::new(&ctx)).collect(),
    });

    let (tx, rx) = bounded::<Job>(1024);
    let start = Instant::now();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let (world, ctx, rx) = (Arc::clone(&world), ctx.clone(), rx.clone());
            thread::Builder::new()
                .name(format!("logic-{i}"))
                .spawn(move || worker_loop(&world, &ctx, &rx))
                .expect("failed to spawn logic thread")
        })
        .collect();
    drop(rx);

    for seq in 0..JOBS {
        if tx.send(Job::generate(seq)).is_err() {
            break;
        }
    }
    drop(tx);

    let mut completed = 0;
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.join() {
            Ok(Ok(done)) => completed += done,
            Ok(Err(e)) => eprintln!("worker {i} failed: {e}"),
            Err(_) => eprintln!("worker {i} panicked"),
        }
    }

    let elapsed = start.elapsed();
    let stats = ctx.stats();
    let balance: i64 = world.critters.iter().map(|c| c.value.load(Ordering::Relaxed)).sum();
    let population: i64 = world.maps.iter().map(|m| m.value.load(Ordering::Relaxed)).sum();

    println!("Jobs completed:     {completed} / {JOBS}");
    println!("Elapsed:            {elapsed:?}");
    println!("Jobs/sec:           {:.0}", completed as f64 / elapsed.as_secs_f64());
    println!("Acquisitions:       {}", stats.acquisitions);
    println!("Contended:          {} ({:.2}%)", stats.contended, stats.contention_ratio() * 100.0);
    println!("Preemptions:        {}", stats.preemptions);
    println!("Retry iterations:   {}", stats.retry_iterations);
    println!("Releases:           {}", stats.releases);
    println!("Critter balance:    {balance} (expected 0)");
    println!("Map activity:       {population}");
    Ok(())
}
