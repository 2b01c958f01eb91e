//! # Sync Error Types
//!
//! Failures that can surface from the object-locking subsystem.
//!
//! Contention is never an error here: a blocked `acquire` simply waits.
//! The only failures are setup problems (bad configuration, exhausted
//! registry) and mixing handles from different contexts.

use thiserror::Error;

/// Errors that can occur in the sync subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// No arbiter slot left for the calling thread.
    ///
    /// The thread must not touch shared entities without an arbiter.
    #[error("arbiter registry full: capacity {capacity}")]
    RegistryFull {
        /// Configured maximum number of arbiters.
        capacity: usize,
    },

    /// The arbiter belongs to a different sync context than the lockable.
    #[error("arbiter {arbiter} does not belong to this sync context")]
    ForeignArbiter {
        /// Index of the offending arbiter.
        arbiter: u32,
    },

    /// Configuration rejected by parsing or validation.
    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read sync configuration: {0}")]
    ConfigIo(String),

    /// The global context was already created.
    #[error("global sync context already initialized")]
    AlreadyInitialized,
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
