//! # Arbiter Registry
//!
//! Every arbiter of a context lives in one dense table, addressed by
//! [`ArbiterId`]. Slots are never removed: an arbiter is drained at thread
//! shutdown, not destroyed, so an id stays valid for the context lifetime.
//!
//! The registry is only touched while the coordination lock is held.

use std::collections::HashSet;
use std::fmt;

use crate::error::{SyncError, SyncResult};
use crate::lockable::LockableId;

/// Handle to an arbiter inside its context's registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArbiterId(u32);

impl ArbiterId {
    /// Raw registry index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw id value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ArbiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "arbiter#{}", self.0)
    }
}

/// Bookkeeping for one arbiter.
#[derive(Debug)]
pub(crate) struct ArbiterSlot {
    pub(crate) name: String,
    pub(crate) owned: HashSet<LockableId>,
    pub(crate) waiting: HashSet<LockableId>,
    pub(crate) priority: i32,
    pub(crate) priority_stack: Vec<i32>,
    pub(crate) is_waiting: bool,
}

impl ArbiterSlot {
    fn new(name: String, priority: i32) -> Self {
        Self {
            name,
            owned: HashSet::new(),
            waiting: HashSet::new(),
            priority,
            priority_stack: Vec::new(),
            is_waiting: false,
        }
    }

    pub(crate) fn push_priority(&mut self, priority: i32) {
        self.priority_stack.push(self.priority);
        self.priority = priority;
    }

    pub(crate) fn pop_priority(&mut self) -> Option<i32> {
        let previous = self.priority_stack.pop()?;
        self.priority = previous;
        Some(previous)
    }
}

/// Table of all arbiters in a context.
#[derive(Debug)]
pub(crate) struct Registry {
    slots: Vec<ArbiterSlot>,
    capacity: usize,
}

impl Registry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Adds a slot, failing once `capacity` arbiters exist.
    pub(crate) fn register(&mut self, name: String, priority: i32) -> SyncResult<ArbiterId> {
        if self.slots.len() >= self.capacity {
            return Err(SyncError::RegistryFull {
                capacity: self.capacity,
            });
        }
        let raw = u32::try_from(self.slots.len()).map_err(|_| SyncError::RegistryFull {
            capacity: self.capacity,
        })?;
        self.slots.push(ArbiterSlot::new(name, priority));
        Ok(ArbiterId(raw))
    }

    #[inline]
    pub(crate) fn contains(&self, id: ArbiterId) -> bool {
        id.index() < self.slots.len()
    }

    #[inline]
    pub(crate) fn slot(&self, id: ArbiterId) -> &ArbiterSlot {
        &self.slots[id.index()]
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, id: ArbiterId) -> &mut ArbiterSlot {
        &mut self.slots[id.index()]
    }

    pub(crate) fn slots_mut(&mut self) -> impl Iterator<Item = (ArbiterId, &mut ArbiterSlot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .map(|(index, slot)| (ArbiterId(index as u32), slot))
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}
