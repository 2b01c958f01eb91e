//! # Coordination Lock & Preemption Algorithm
//!
//! All ownership bookkeeping of a context sits behind one mutex. The mutex
//! guards who-owns-what only, never the entities' payload, and is held for
//! single check/mutation steps, never across a wait.
//!
//! ## Claim Rules
//!
//! ```text
//! owner(L) = none            → take it
//! owner(L) = me              → nothing to do
//! owner(L) = X, X parked,
//!   prio(me) >= prio(X)      → preempt: L moves from X.owned to X.waiting
//! otherwise                  → park on L and rescan until claimable
//! ```
//!
//! An arbiter that is actively working is never preempted. Only an arbiter
//! that is itself stalled on something else can lose objects, and those
//! objects land in its waiting set so it takes them back on its next scan.
//! Lock acquisition order between entities is therefore irrelevant.
//!
//! Equal priorities may preempt each other. There is no fairness among
//! them and a blocked acquire has no timeout.

use std::collections::HashMap;
use std::hint;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::config::{SyncConfig, WaitStrategy};
use crate::error::SyncResult;
use crate::lockable::LockableId;
use crate::registry::{ArbiterId, Registry};
use crate::stats::SyncCounters;

/// Outcome of a single claim attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Claim {
    /// The lockable was free and is now ours.
    Taken,
    /// We already held it.
    AlreadyOwned,
    /// Taken away from the given parked arbiter.
    Preempted(ArbiterId),
    /// Held by the given arbiter and not preemptable.
    Blocked(ArbiterId),
}

/// Ownership bookkeeping guarded by the coordination lock.
#[derive(Debug)]
pub(crate) struct CoordState {
    pub(crate) registry: Registry,
    owners: HashMap<LockableId, ArbiterId>,
}

impl CoordState {
    pub(crate) fn new(max_arbiters: usize) -> Self {
        Self {
            registry: Registry::new(max_arbiters),
            owners: HashMap::new(),
        }
    }

    #[inline]
    pub(crate) fn owner_of(&self, id: LockableId) -> Option<ArbiterId> {
        self.owners.get(&id).copied()
    }

    fn can_preempt(&self, requester: ArbiterId, holder: ArbiterId) -> bool {
        let holder_slot = self.registry.slot(holder);
        holder_slot.is_waiting && self.registry.slot(requester).priority >= holder_slot.priority
    }

    fn assign(&mut self, me: ArbiterId, id: LockableId) {
        self.owners.insert(id, me);
        let slot = self.registry.slot_mut(me);
        slot.waiting.remove(&id);
        slot.owned.insert(id);
    }

    fn preempt(&mut self, me: ArbiterId, victim: ArbiterId, id: LockableId) {
        let victim_slot = self.registry.slot_mut(victim);
        victim_slot.owned.remove(&id);
        victim_slot.waiting.insert(id);
        self.assign(me, id);
    }

    /// One claim attempt on `id` for `me`. Never parks.
    pub(crate) fn claim(&mut self, me: ArbiterId, id: LockableId) -> Claim {
        match self.owner_of(id) {
            None => {
                self.assign(me, id);
                Claim::Taken
            }
            Some(holder) if holder == me => Claim::AlreadyOwned,
            Some(holder) if self.can_preempt(me, holder) => {
                self.preempt(me, holder, id);
                Claim::Preempted(holder)
            }
            Some(holder) => Claim::Blocked(holder),
        }
    }

    /// Marks `me` as parked and wanting `id`.
    pub(crate) fn park(&mut self, me: ArbiterId, id: LockableId) {
        let slot = self.registry.slot_mut(me);
        slot.is_waiting = true;
        slot.waiting.insert(id);
    }

    /// Tries every lockable `me` is waiting for once.
    ///
    /// Returns `(claimed, preempted)`.
    pub(crate) fn rescan(&mut self, me: ArbiterId) -> (u64, u64) {
        let pending: Vec<LockableId> = self.registry.slot(me).waiting.iter().copied().collect();
        let mut claimed = 0;
        let mut preempted = 0;

        for id in pending {
            match self.owner_of(id) {
                None => {
                    self.assign(me, id);
                    claimed += 1;
                }
                Some(holder) if holder == me => {
                    self.registry.slot_mut(me).waiting.remove(&id);
                }
                Some(holder) if self.can_preempt(me, holder) => {
                    self.preempt(me, holder, id);
                    preempted += 1;
                }
                Some(_) => {}
            }
        }

        (claimed, preempted)
    }

    /// Clears ownership of `id` if `me` holds it, then drops stale references.
    ///
    /// Returns whether `me` was the owner.
    pub(crate) fn release(&mut self, me: ArbiterId, id: LockableId) -> bool {
        let released = if self.owner_of(id) == Some(me) {
            self.owners.remove(&id);
            self.registry.slot_mut(me).owned.remove(&id);
            true
        } else {
            false
        };

        // A preempted copy in our own bucket must not be reclaimed on resume.
        self.registry.slot_mut(me).waiting.remove(&id);
        self.scrub_stale(id);
        released
    }

    /// Removes `id` from the owned set of every arbiter that is not its owner.
    fn scrub_stale(&mut self, id: LockableId) {
        let owner = self.owner_of(id);
        for (arbiter, slot) in self.registry.slots_mut() {
            if Some(arbiter) != owner {
                slot.owned.remove(&id);
            }
        }
    }

    /// Releases everything `me` owns. The waiting set is left alone.
    pub(crate) fn unlock_all(&mut self, me: ArbiterId) -> usize {
        let owned: Vec<LockableId> = self.registry.slot_mut(me).owned.drain().collect();
        for id in &owned {
            if self.owner_of(*id) == Some(me) {
                self.owners.remove(id);
            }
        }
        owned.len()
    }

    /// Forgets `id` entirely. Used when the lockable is dropped.
    pub(crate) fn purge(&mut self, id: LockableId) {
        self.owners.remove(&id);
        for (_, slot) in self.registry.slots_mut() {
            slot.owned.remove(&id);
            slot.waiting.remove(&id);
        }
    }

    pub(crate) fn owned(&self, me: ArbiterId) -> Vec<LockableId> {
        let mut ids: Vec<LockableId> = self.registry.slot(me).owned.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn waiting(&self, me: ArbiterId) -> Vec<LockableId> {
        let mut ids: Vec<LockableId> = self.registry.slot(me).waiting.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// The coordination lock plus the wait machinery around it.
#[derive(Debug)]
pub(crate) struct Coordinator {
    state: Mutex<CoordState>,
    wake: Condvar,
    strategy: WaitStrategy,
    park_timeout: Duration,
    stall_warn_iterations: u64,
}

impl Coordinator {
    pub(crate) fn new(config: &SyncConfig) -> Self {
        Self {
            state: Mutex::new(CoordState::new(config.max_arbiters)),
            wake: Condvar::new(),
            strategy: config.wait_strategy,
            park_timeout: Duration::from_micros(config.park_timeout_us),
            stall_warn_iterations: config.stall_warn_iterations,
        }
    }

    /// Takes the coordination lock for a read or a short mutation.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, CoordState> {
        self.state.lock()
    }

    pub(crate) fn register(&self, name: String, priority: i32) -> SyncResult<ArbiterId> {
        self.state.lock().registry.register(name, priority)
    }

    /// Blocks until `me` owns `id`. Returns false if it already did.
    pub(crate) fn acquire(&self, me: ArbiterId, id: LockableId, counters: &SyncCounters) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.registry.contains(me));

        match state.claim(me, id) {
            Claim::Taken => {
                counters.acquired(1);
                trace!(arbiter = %me, lockable = %id, "acquired");
                return true;
            }
            Claim::AlreadyOwned => return false,
            Claim::Preempted(victim) => {
                counters.acquired(1);
                counters.preempted(1);
                debug!(arbiter = %me, lockable = %id, victim = %victim, "preempted parked holder");
                return true;
            }
            Claim::Blocked(holder) => {
                debug!(arbiter = %me, lockable = %id, holder = %holder, "parking");
            }
        }

        state.park(me, id);
        counters.contended();
        drop(state);

        // We just became preemptable.
        self.wake.notify_all();
        self.wait_until_drained(me, counters);
        true
    }

    /// Single attempt. Returns whether `me` owns `id` afterwards.
    pub(crate) fn try_acquire(&self, me: ArbiterId, id: LockableId, counters: &SyncCounters) -> bool {
        let mut state = self.state.lock();
        match state.claim(me, id) {
            Claim::Taken => {
                counters.acquired(1);
                true
            }
            Claim::AlreadyOwned => true,
            Claim::Preempted(victim) => {
                counters.acquired(1);
                counters.preempted(1);
                debug!(arbiter = %me, lockable = %id, victim = %victim, "preempted parked holder");
                true
            }
            Claim::Blocked(_) => false,
        }
    }

    pub(crate) fn release(&self, me: ArbiterId, id: LockableId, counters: &SyncCounters) -> bool {
        let released = self.state.lock().release(me, id);
        if released {
            counters.released(1);
            trace!(arbiter = %me, lockable = %id, "released");
            self.wake.notify_all();
        } else {
            counters.ignored_release();
            trace!(arbiter = %me, lockable = %id, "release ignored, not the owner");
        }
        released
    }

    pub(crate) fn unlock_all(&self, me: ArbiterId, counters: &SyncCounters) -> usize {
        let count = self.state.lock().unlock_all(me);
        if count > 0 {
            counters.released(count as u64);
            debug!(arbiter = %me, count, "unlocked all");
            self.wake.notify_all();
        }
        count
    }

    pub(crate) fn purge(&self, id: LockableId) {
        self.state.lock().purge(id);
        self.wake.notify_all();
    }

    pub(crate) fn suspend(&self, me: ArbiterId) {
        self.state.lock().registry.slot_mut(me).is_waiting = true;
        debug!(arbiter = %me, "suspended");
        self.wake.notify_all();
    }

    /// Clears the parked flag and takes back everything preempted meanwhile.
    pub(crate) fn resume(&self, me: ArbiterId, counters: &SyncCounters) {
        let mut state = self.state.lock();
        state.registry.slot_mut(me).is_waiting = false;
        if state.registry.slot(me).waiting.is_empty() {
            debug!(arbiter = %me, "resumed");
            return;
        }

        let (claimed, preempted) = state.rescan(me);
        counters.acquired(claimed + preempted);
        counters.preempted(preempted);

        let backlog = state.registry.slot(me).waiting.len();
        if backlog == 0 {
            debug!(arbiter = %me, reclaimed = claimed + preempted, "resumed");
            return;
        }

        debug!(arbiter = %me, backlog, "resuming with backlog, parking");
        state.registry.slot_mut(me).is_waiting = true;
        counters.contended();
        drop(state);

        self.wake.notify_all();
        self.wait_until_drained(me, counters);
    }

    /// Retry loop of a parked arbiter. Returns once its waiting set is empty.
    fn wait_until_drained(&self, me: ArbiterId, counters: &SyncCounters) {
        let mut state = self.state.lock();
        let mut iterations: u64 = 0;

        loop {
            self.pause(&mut state);

            let (claimed, preempted) = state.rescan(me);
            counters.acquired(claimed + preempted);
            if preempted > 0 {
                counters.preempted(preempted);
                debug!(arbiter = %me, preempted, "preempted parked holders while waiting");
            }

            let slot = state.registry.slot_mut(me);
            if slot.waiting.is_empty() {
                slot.is_waiting = false;
                trace!(arbiter = %me, iterations, "wait finished");
                return;
            }

            iterations += 1;
            counters.retried();
            if iterations == self.stall_warn_iterations {
                warn!(
                    arbiter = %me,
                    name = %slot.name,
                    waiting = slot.waiting.len(),
                    iterations,
                    "acquire stalled, holder neither parks nor releases"
                );
            }
        }
    }

    /// Gives other threads a chance to change ownership.
    ///
    /// The coordination lock is free for the whole pause.
    fn pause(&self, state: &mut MutexGuard<'_, CoordState>) {
        match self.strategy {
            WaitStrategy::Yield => MutexGuard::unlocked(state, thread::yield_now),
            WaitStrategy::Spin => MutexGuard::unlocked(state, hint::spin_loop),
            WaitStrategy::Park => {
                let _ = self.wake.wait_for(state, self.park_timeout);
            }
        }
    }
}
