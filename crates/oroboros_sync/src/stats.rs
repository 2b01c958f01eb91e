//! Contention counters for a sync context.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a context's lock statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Lockables taken, immediately or after waiting.
    pub acquisitions: u64,
    /// Acquires that had to park.
    pub contended: u64,
    /// Lockables taken away from a parked arbiter.
    pub preemptions: u64,
    /// Rescans performed by parked acquires.
    pub retry_iterations: u64,
    /// Releases that cleared ownership.
    pub releases: u64,
    /// Releases by an arbiter that did not own the lockable.
    pub ignored_releases: u64,
    /// Arbiters registered so far.
    pub arbiters: u64,
}

impl SyncStats {
    /// Fraction of acquisitions that had to wait.
    #[must_use]
    pub fn contention_ratio(&self) -> f64 {
        if self.acquisitions == 0 {
            0.0
        } else {
            self.contended as f64 / self.acquisitions as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct SyncCounters {
    acquisitions: AtomicU64,
    contended: AtomicU64,
    preemptions: AtomicU64,
    retry_iterations: AtomicU64,
    releases: AtomicU64,
    ignored_releases: AtomicU64,
    arbiters: AtomicU64,
}

impl SyncCounters {
    #[inline]
    pub(crate) fn acquired(&self, count: u64) {
        self.acquisitions.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn contended(&self) {
        self.contended.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn preempted(&self, count: u64) {
        self.preemptions.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn retried(&self) {
        self.retry_iterations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn released(&self, count: u64) {
        self.releases.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn ignored_release(&self) {
        self.ignored_releases.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn arbiter_registered(&self) {
        self.arbiters.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SyncStats {
        SyncStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            retry_iterations: self.retry_iterations.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            ignored_releases: self.ignored_releases.load(Ordering::Relaxed),
            arbiters: self.arbiters.load(Ordering::Relaxed),
        }
    }
}
