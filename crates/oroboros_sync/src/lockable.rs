//! # Lockable Handle
//!
//! The tag embedded in every shared entity (creature, location, map,
//! shared variable). It records nothing but an id; who owns it lives in the
//! context's coordination state.
//!
//! ```rust,ignore
//! struct Critter {
//!     sync: Lockable,
//!     hp: AtomicI32,
//! }
//!
//! critter.sync.acquire()?;
//! critter.hp.fetch_sub(damage, Ordering::Relaxed);
//! critter.sync.release();
//! ```
//!
//! The lockable does not guard the entity's fields. Callers must hold it
//! for the full duration of any cross-thread-visible mutation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::arbiter::Arbiter;
use crate::context::SyncContext;
use crate::error::SyncResult;
use crate::registry::ArbiterId;

static NEXT_LOCKABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Lockable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockableId(u64);

impl LockableId {
    #[inline]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lockable#{}", self.0)
    }
}

/// Advisory single-owner lock attached to a shared entity.
///
/// Dropping a lockable removes every trace of it from the bookkeeping,
/// including pending waits on it.
pub struct Lockable {
    id: LockableId,
    context: SyncContext,
}

impl Lockable {
    /// Creates a lockable in the global context.
    #[must_use]
    pub fn new() -> Self {
        Self::new_in(SyncContext::global())
    }

    /// Creates a lockable in the given context.
    #[must_use]
    pub fn new_in(context: &SyncContext) -> Self {
        Self {
            id: LockableId::from_raw(NEXT_LOCKABLE_ID.fetch_add(1, Ordering::Relaxed)),
            context: context.clone(),
        }
    }

    /// Returns the lockable's id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> LockableId {
        self.id
    }

    /// Returns the context this lockable belongs to.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Blocks until the calling thread's arbiter owns this lockable.
    ///
    /// Re-acquiring a held lockable is a no-op. While blocked, the thread
    /// counts as parked and may lose other lockables to equal or higher
    /// priority arbiters; those are taken back before this returns.
    ///
    /// No-op when the context is in single-threaded mode.
    ///
    /// # Errors
    ///
    /// [`SyncError::RegistryFull`](crate::SyncError::RegistryFull) if no
    /// arbiter could be created for this thread.
    pub fn acquire(&self) -> SyncResult<()> {
        if !self.context.is_enabled() {
            return Ok(());
        }
        let arbiter = self.context.current_arbiter()?;
        self.acquire_as(&arbiter);
        Ok(())
    }

    /// Same as [`acquire`](Self::acquire) with an explicit arbiter.
    ///
    /// # Errors
    ///
    /// [`SyncError::ForeignArbiter`](crate::SyncError::ForeignArbiter) if
    /// the arbiter belongs to another context.
    pub fn acquire_with(&self, arbiter: &Arbiter) -> SyncResult<()> {
        self.context.check_arbiter(arbiter)?;
        if self.context.is_enabled() {
            self.acquire_as(arbiter);
        }
        Ok(())
    }

    /// One non-blocking attempt. Returns whether the caller now owns it.
    ///
    /// # Errors
    ///
    /// [`SyncError::RegistryFull`](crate::SyncError::RegistryFull) if no
    /// arbiter could be created for this thread.
    pub fn try_acquire(&self) -> SyncResult<bool> {
        if !self.context.is_enabled() {
            return Ok(true);
        }
        let arbiter = self.context.current_arbiter()?;
        Ok(self.try_acquire_as(&arbiter))
    }

    /// Same as [`try_acquire`](Self::try_acquire) with an explicit arbiter.
    ///
    /// # Errors
    ///
    /// [`SyncError::ForeignArbiter`](crate::SyncError::ForeignArbiter) if
    /// the arbiter belongs to another context.
    pub fn try_acquire_with(&self, arbiter: &Arbiter) -> SyncResult<bool> {
        self.context.check_arbiter(arbiter)?;
        if !self.context.is_enabled() {
            return Ok(true);
        }
        Ok(self.try_acquire_as(arbiter))
    }

    /// Releases the lockable if the calling thread owns it.
    ///
    /// Releasing something the thread does not own is silently ignored.
    pub fn release(&self) {
        if !self.context.is_enabled() {
            return;
        }
        match self.context.bound_arbiter() {
            Some(arbiter) => {
                self.context
                    .coordinator()
                    .release(arbiter.id(), self.id, self.context.counters());
            }
            None => self.context.counters().ignored_release(),
        }
    }

    /// Same as [`release`](Self::release) with an explicit arbiter.
    pub fn release_with(&self, arbiter: &Arbiter) {
        if !self.context.is_enabled() || self.context.check_arbiter(arbiter).is_err() {
            return;
        }
        self.context
            .coordinator()
            .release(arbiter.id(), self.id, self.context.counters());
    }

    /// Acquires and returns a guard that releases on drop.
    ///
    /// If the lockable was already held by the caller, the guard is inert:
    /// dropping it leaves the earlier claim in place.
    ///
    /// # Errors
    ///
    /// [`SyncError::RegistryFull`](crate::SyncError::RegistryFull) if no
    /// arbiter could be created for this thread.
    pub fn lock(&self) -> SyncResult<LockGuard<'_>> {
        if !self.context.is_enabled() {
            return Ok(LockGuard {
                lockable: self,
                arbiter: None,
            });
        }
        let arbiter = self.context.current_arbiter()?;
        let fresh = self.acquire_as(&arbiter);
        Ok(LockGuard {
            lockable: self,
            arbiter: fresh.then_some(arbiter),
        })
    }

    /// Same as [`lock`](Self::lock) with an explicit arbiter.
    ///
    /// # Errors
    ///
    /// [`SyncError::ForeignArbiter`](crate::SyncError::ForeignArbiter) if
    /// the arbiter belongs to another context.
    pub fn lock_with(&self, arbiter: &Arbiter) -> SyncResult<LockGuard<'_>> {
        self.context.check_arbiter(arbiter)?;
        let fresh = self.context.is_enabled() && self.acquire_as(arbiter);
        Ok(LockGuard {
            lockable: self,
            arbiter: fresh.then(|| arbiter.clone()),
        })
    }

    /// Current owner, if any.
    #[must_use]
    pub fn owner(&self) -> Option<ArbiterId> {
        self.context.coordinator().lock().owner_of(self.id)
    }

    /// Whether any arbiter owns this lockable.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }

    /// Returns false when the arbiter already held the lockable.
    fn acquire_as(&self, arbiter: &Arbiter) -> bool {
        self.context
            .coordinator()
            .acquire(arbiter.id(), self.id, self.context.counters())
    }

    fn try_acquire_as(&self, arbiter: &Arbiter) -> bool {
        self.context
            .coordinator()
            .try_acquire(arbiter.id(), self.id, self.context.counters())
    }
}

impl Default for Lockable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Lockable {
    fn drop(&mut self) {
        self.context.coordinator().purge(self.id);
    }
}

impl fmt::Debug for Lockable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lockable")
            .field("id", &self.id)
            .field("context", &self.context.id())
            .finish()
    }
}

/// Scoped ownership of a [`Lockable`], released on drop.
#[must_use = "the lockable is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard<'a> {
    lockable: &'a Lockable,
    arbiter: Option<Arbiter>,
}

impl LockGuard<'_> {
    /// The guarded lockable.
    #[must_use]
    pub fn lockable(&self) -> &Lockable {
        self.lockable
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Some(arbiter) = &self.arbiter {
            self.lockable.release_with(arbiter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;

    fn context() -> SyncContext {
        SyncContext::new(SyncConfig::default()).unwrap()
    }

    #[test]
    fn test_ids_are_unique() {
        let ctx = context();
        let a = Lockable::new_in(&ctx);
        let b = Lockable::new_in(&ctx);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_acquire_release_current_thread() {
        let ctx = context();
        let lockable = Lockable::new_in(&ctx);

        lockable.acquire().unwrap();
        let me = ctx.current_arbiter().unwrap();
        assert_eq!(lockable.owner(), Some(me.id()));

        lockable.acquire().unwrap();
        assert_eq!(me.owned(), vec![lockable.id()]);

        lockable.release();
        assert!(!lockable.is_locked());
        assert!(me.owned().is_empty());
    }

    #[test]
    fn test_release_without_arbiter_is_ignored() {
        let ctx = context();
        let lockable = Lockable::new_in(&ctx);

        lockable.release();
        assert_eq!(ctx.arbiter_count(), 0);
        assert_eq!(ctx.stats().ignored_releases, 1);
    }

    #[test]
    fn test_release_by_other_arbiter_is_ignored() {
        let ctx = context();
        let lockable = Lockable::new_in(&ctx);
        let a = ctx.register_arbiter("a").unwrap();
        let b = ctx.register_arbiter("b").unwrap();

        lockable.acquire_with(&a).unwrap();
        lockable.release_with(&b);
        assert_eq!(lockable.owner(), Some(a.id()));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let ctx = context();
        let lockable = Lockable::new_in(&ctx);

        {
            let guard = lockable.lock().unwrap();
            assert!(guard.lockable().is_locked());
        }

        assert!(!lockable.is_locked());
    }

    #[test]
    fn test_guard_on_held_lockable_keeps_claim() {
        let ctx = context();
        let lockable = Lockable::new_in(&ctx);
        let a = ctx.register_arbiter("a").unwrap();

        lockable.acquire_with(&a).unwrap();
        {
            let _guard = lockable.lock_with(&a).unwrap();
        }
        assert_eq!(lockable.owner(), Some(a.id()));
        assert_eq!(a.owned(), vec![lockable.id()]);

        lockable.release_with(&a);
        assert!(!lockable.is_locked());
    }

    #[test]
    fn test_nested_guards_release_with_outermost() {
        let ctx = context();
        let lockable = Lockable::new_in(&ctx);

        let outer = lockable.lock().unwrap();
        {
            let _inner = lockable.lock().unwrap();
        }
        assert!(lockable.is_locked());

        drop(outer);
        assert!(!lockable.is_locked());
    }

    #[test]
    fn test_try_acquire_blocked_by_active_holder() {
        let ctx = context();
        let lockable = Lockable::new_in(&ctx);
        let a = ctx.register_arbiter("a").unwrap();
        let b = ctx.register_arbiter("b").unwrap();
        b.push_priority(100);

        assert!(lockable.try_acquire_with(&a).unwrap());
        assert!(!lockable.try_acquire_with(&b).unwrap());
        assert_eq!(lockable.owner(), Some(a.id()));
        assert!(b.waiting().is_empty());
        assert!(!b.is_waiting());
    }

    #[test]
    fn test_foreign_arbiter_rejected() {
        let ctx = context();
        let other = context();
        let lockable = Lockable::new_in(&ctx);
        let stranger = other.register_arbiter("stranger").unwrap();

        assert!(lockable.acquire_with(&stranger).is_err());
        assert!(lockable.try_acquire_with(&stranger).is_err());
        assert!(!lockable.is_locked());
    }

    #[test]
    fn test_drop_purges_bookkeeping() {
        let ctx = context();
        let a = ctx.register_arbiter("a").unwrap();
        let id = {
            let lockable = Lockable::new_in(&ctx);
            lockable.acquire_with(&a).unwrap();
            lockable.id()
        };

        assert!(!a.owned().contains(&id));
    }

    #[test]
    fn test_bypass_mode_is_noop() {
        let ctx = SyncContext::new(SyncConfig::single_threaded()).unwrap();
        let lockable = Lockable::new_in(&ctx);

        lockable.acquire().unwrap();
        assert!(lockable.try_acquire().unwrap());
        {
            let _guard = lockable.lock().unwrap();
        }
        lockable.release();

        assert!(!lockable.is_locked());
        assert_eq!(ctx.arbiter_count(), 0);
        assert_eq!(ctx.stats(), crate::SyncStats::default());
    }
}
