//! # Arbiter
//!
//! The per-thread owner of lockables. Each worker thread has exactly one
//! arbiter per context, created on first use and never destroyed. It
//! carries the owned set, the waiting set, a priority and a stack of
//! saved priorities for scoped elevation.
//!
//! An `Arbiter` value is only a handle (context + registry index); all
//! state lives under the context's coordination lock.

use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::lockable::{Lockable, LockableId};
use crate::registry::ArbiterId;

/// Handle to an arbiter in a [`SyncContext`].
#[derive(Clone, Debug)]
pub struct Arbiter {
    context: SyncContext,
    id: ArbiterId,
}

impl Arbiter {
    pub(crate) fn new(context: SyncContext, id: ArbiterId) -> Self {
        Self { context, id }
    }

    /// The calling thread's arbiter in the global context.
    ///
    /// Created and registered on the first call from each thread.
    ///
    /// # Errors
    ///
    /// [`SyncError::RegistryFull`](crate::SyncError::RegistryFull) when the
    /// registry has no room left. The thread must then stay away from
    /// shared entities.
    pub fn for_current_thread() -> SyncResult<Self> {
        SyncContext::global().current_arbiter()
    }

    /// Registry handle.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ArbiterId {
        self.id
    }

    /// Owning context.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Name given at registration (thread name for thread-bound arbiters).
    #[must_use]
    pub fn name(&self) -> String {
        self.context.coordinator().lock().registry.slot(self.id).name.clone()
    }

    /// Current priority.
    #[must_use]
    pub fn priority(&self) -> i32 {
        self.context.coordinator().lock().registry.slot(self.id).priority
    }

    /// Number of active priority elevations.
    #[must_use]
    pub fn priority_depth(&self) -> usize {
        self.context
            .coordinator()
            .lock()
            .registry
            .slot(self.id)
            .priority_stack
            .len()
    }

    /// Whether the arbiter is parked (wants something it does not hold).
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.context.coordinator().lock().registry.slot(self.id).is_waiting
    }

    /// Lockables currently owned, sorted by id.
    #[must_use]
    pub fn owned(&self) -> Vec<LockableId> {
        self.context.coordinator().lock().owned(self.id)
    }

    /// Lockables wanted but not held, sorted by id.
    #[must_use]
    pub fn waiting(&self) -> Vec<LockableId> {
        self.context.coordinator().lock().waiting(self.id)
    }

    /// Whether this arbiter currently owns `lockable`.
    #[must_use]
    pub fn owns(&self, lockable: &Lockable) -> bool {
        self.context.same_as(lockable.context()) && lockable.owner() == Some(self.id)
    }

    /// Saves the current priority and switches to `priority`.
    pub fn push_priority(&self, priority: i32) {
        self.context
            .coordinator()
            .lock()
            .registry
            .slot_mut(self.id)
            .push_priority(priority);
    }

    /// Restores the priority saved by the matching [`push_priority`](Self::push_priority).
    ///
    /// Returns the restored priority, or `None` (and changes nothing) when
    /// no elevation is active.
    pub fn pop_priority(&self) -> Option<i32> {
        self.context
            .coordinator()
            .lock()
            .registry
            .slot_mut(self.id)
            .pop_priority()
    }

    /// Raises the priority until the returned guard is dropped.
    ///
    /// ```rust,ignore
    /// let arbiter = Arbiter::for_current_thread()?;
    /// {
    ///     let _critical = arbiter.elevate(90);
    ///     map.sync.acquire()?;
    ///     // resist preemption while moving the critter between maps
    /// }
    /// ```
    pub fn elevate(&self, priority: i32) -> PriorityGuard {
        self.push_priority(priority);
        PriorityGuard {
            arbiter: self.clone(),
        }
    }

    /// Marks the arbiter as parked without waiting on anything.
    ///
    /// While suspended, equal or higher priority arbiters may take its
    /// lockables; they accumulate in the waiting set until [`resume`](Self::resume).
    pub fn suspend(&self) {
        self.context.coordinator().suspend(self.id);
    }

    /// Clears the parked flag and blocks until everything taken during the
    /// suspension is owned again.
    pub fn resume(&self) {
        self.context
            .coordinator()
            .resume(self.id, self.context.counters());
    }

    /// Releases every owned lockable. The waiting set is untouched.
    ///
    /// Returns how many lockables were released. Call at worker shutdown
    /// or top-level error recovery.
    pub fn unlock_all(&self) -> usize {
        self.context
            .coordinator()
            .unlock_all(self.id, self.context.counters())
    }
}

impl PartialEq for Arbiter {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.context.same_as(&other.context)
    }
}

impl Eq for Arbiter {}

/// Scoped priority elevation; restores the previous priority on drop.
#[must_use = "the priority is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PriorityGuard {
    arbiter: Arbiter,
}

impl Drop for PriorityGuard {
    fn drop(&mut self) {
        self.arbiter.pop_priority();
    }
}
