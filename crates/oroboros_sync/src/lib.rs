//! # OROBOROS Sync
//!
//! Cooperative object locking for the multi-threaded world simulation.
//!
//! Creatures, locations, maps and shared variables are touched by a fixed
//! pool of worker threads. Instead of one blocking mutex per entity, every
//! entity carries a [`Lockable`] tag and every worker thread owns an
//! [`Arbiter`]. A single coordination lock per [`SyncContext`] guards the
//! who-owns-what bookkeeping.
//!
//! ## Locking Rules
//!
//! 1. **Single owner** - a lockable belongs to at most one arbiter
//! 2. **Active work is never interrupted** - only a parked arbiter can lose
//!    a lockable, and only to an equal or higher priority requester
//! 3. **No lock ordering** - entities are acquired in any order; a stalled
//!    thread hands its objects over instead of deadlocking
//! 4. **Clean shutdown** - [`Arbiter::unlock_all`] (or dropping a
//!    [`WorkerGuard`]) clears everything a thread held
//!
//! There is no fairness between equal priorities and no timeout on a
//! blocked acquire.
//!
//! ## Example
//!
//! ```rust,ignore
//! use oroboros_sync::{Lockable, SyncContext};
//!
//! let ctx = SyncContext::global();
//! let _worker = ctx.enter_worker()?;
//!
//! let critter = Lockable::new();
//! let map = Lockable::new();
//!
//! critter.acquire()?;
//! map.acquire()?;
//! // mutate critter and map state
//! map.release();
//! critter.release();
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod arbiter;
pub mod config;
pub mod context;
mod coordinator;
pub mod error;
pub mod lockable;
pub mod registry;
pub mod stats;

pub use arbiter::{Arbiter, PriorityGuard};
pub use config::{SyncConfig, WaitStrategy, DEFAULT_PRIORITY};
pub use context::{SyncContext, WorkerGuard};
pub use error::{SyncError, SyncResult};
pub use lockable::{LockGuard, Lockable, LockableId};
pub use registry::ArbiterId;
pub use stats::SyncStats;
