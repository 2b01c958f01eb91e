//! # Sync Context
//!
//! The service that ties the subsystem together: configuration, the
//! coordination lock, the arbiter registry, the single-threaded bypass
//! switch and statistics.
//!
//! ```text
//!   ┌──────────────────────── SyncContext ────────────────────────┐
//!   │  enabled (bypass switch)        SyncConfig                  │
//!   │  ┌───────────── Coordinator (one mutex) ─────────────────┐  │
//!   │  │  owners: LockableId → ArbiterId                       │  │
//!   │  │  Registry: [ArbiterSlot; n]  owned/waiting/priority   │  │
//!   │  └───────────────────────────────────────────────────────┘  │
//!   └─────────────────────────────────────────────────────────────┘
//!         ▲                    ▲                       ▲
//!     Worker 1             Worker 2                Worker N
//!   (thread-local        (thread-local           (thread-local
//!     Arbiter)             Arbiter)                Arbiter)
//! ```
//!
//! Most code uses the process-wide [`SyncContext::global`]. Separate
//! contexts are fully independent, which keeps tests and embedded
//! simulations isolated from each other.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::ptr;
use std::sync::{Arc, OnceLock, Weak};
use std::thread;

use tracing::{debug, info, warn};

use crate::arbiter::Arbiter;
use crate::config::SyncConfig;
use crate::coordinator::Coordinator;
use crate::error::{SyncError, SyncResult};
use crate::registry::ArbiterId;
use crate::stats::{SyncCounters, SyncStats};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL: OnceLock<SyncContext> = OnceLock::new();

thread_local! {
    /// Arbiters bound to this thread, one per live context.
    static BOUND_ARBITERS: RefCell<Vec<(Weak<ContextShared>, ArbiterId)>> =
        const { RefCell::new(Vec::new()) };
}

#[derive(Debug)]
struct ContextShared {
    id: u64,
    enabled: AtomicBool,
    config: SyncConfig,
    coordinator: Coordinator,
    counters: SyncCounters,
}

/// Shared handle to one locking domain.
///
/// Cloning is cheap; all clones refer to the same bookkeeping.
#[derive(Clone, Debug)]
pub struct SyncContext {
    shared: Arc<ContextShared>,
}

impl SyncContext {
    /// Creates an independent context.
    ///
    /// # Errors
    ///
    /// [`SyncError::InvalidConfig`] if the config fails validation.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SyncConfig) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            context = id,
            enabled = config.enabled,
            max_arbiters = config.max_arbiters,
            wait_strategy = ?config.wait_strategy,
            "sync context created"
        );
        Self {
            shared: Arc::new(ContextShared {
                id,
                enabled: AtomicBool::new(config.enabled),
                coordinator: Coordinator::new(&config),
                counters: SyncCounters::default(),
                config,
            }),
        }
    }

    /// The process-wide context, created with default config on first use.
    #[must_use]
    pub fn global() -> &'static SyncContext {
        GLOBAL.get_or_init(|| Self::build(SyncConfig::default()))
    }

    /// Creates the process-wide context from `config`.
    ///
    /// Must run before anything touches [`global`](Self::global).
    ///
    /// # Errors
    ///
    /// [`SyncError::AlreadyInitialized`] if the global context exists, or
    /// [`SyncError::InvalidConfig`] if the config fails validation.
    pub fn install_global(config: SyncConfig) -> SyncResult<&'static SyncContext> {
        config.validate()?;
        let mut installed = false;
        let context = GLOBAL.get_or_init(|| {
            installed = true;
            Self::build(config)
        });
        if installed {
            Ok(context)
        } else {
            Err(SyncError::AlreadyInitialized)
        }
    }

    /// Process-unique context id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Configuration the context was built with.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Whether acquire/release coordinate at all.
    #[inline]
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Flips the single-threaded bypass switch.
    ///
    /// Only flip it while no worker holds or waits for a lockable.
    pub fn set_enabled(&self, enabled: bool) {
        self.shared.enabled.store(enabled, Ordering::Release);
        info!(context = self.shared.id, enabled, "sync coordination switched");
    }

    /// Snapshot of the lock statistics.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.shared.counters.snapshot()
    }

    /// Number of registered arbiters.
    #[must_use]
    pub fn arbiter_count(&self) -> usize {
        self.shared.coordinator.lock().registry.len()
    }

    /// Registers a new arbiter that is not bound to any thread.
    ///
    /// For explicit injection: construct one per worker at startup and
    /// hand it to the `*_with` methods of [`Lockable`](crate::Lockable).
    ///
    /// # Errors
    ///
    /// [`SyncError::RegistryFull`] when `max_arbiters` is reached.
    pub fn register_arbiter(&self, name: impl Into<String>) -> SyncResult<Arbiter> {
        let name = name.into();
        let id = self
            .shared
            .coordinator
            .register(name.clone(), self.shared.config.default_priority)
            .map_err(|err| {
                warn!(context = self.shared.id, name = %name, "cannot register arbiter: {err}");
                err
            })?;

        self.shared.counters.arbiter_registered();
        debug!(context = self.shared.id, arbiter = %id, name = %name, "arbiter registered");
        Ok(Arbiter::new(self.clone(), id))
    }

    /// The calling thread's arbiter, created on first call.
    ///
    /// # Errors
    ///
    /// [`SyncError::RegistryFull`] when no arbiter could be created.
    pub fn current_arbiter(&self) -> SyncResult<Arbiter> {
        if let Some(arbiter) = self.bound_arbiter() {
            return Ok(arbiter);
        }

        let current = thread::current();
        let name = current
            .name()
            .map_or_else(|| format!("{:?}", current.id()), str::to_owned);
        let arbiter = self.register_arbiter(name)?;

        BOUND_ARBITERS.with(|bound| {
            bound
                .borrow_mut()
                .push((Arc::downgrade(&self.shared), arbiter.id()));
        });
        Ok(arbiter)
    }

    /// The calling thread's arbiter if one was already created.
    ///
    /// Bindings to contexts that have since been dropped are pruned here.
    #[must_use]
    pub fn bound_arbiter(&self) -> Option<Arbiter> {
        let me = Arc::as_ptr(&self.shared);
        BOUND_ARBITERS
            .with(|bound| {
                let mut bound = bound.borrow_mut();
                bound.retain(|(context, _)| context.strong_count() > 0);
                bound
                    .iter()
                    .find(|(context, _)| ptr::eq(context.as_ptr(), me))
                    .map(|&(_, id)| id)
            })
            .map(|id| Arbiter::new(self.clone(), id))
    }

    /// Binds the calling thread as a worker.
    ///
    /// The returned guard releases everything the thread owns when it is
    /// dropped, including during panic unwinding.
    ///
    /// ```rust,ignore
    /// thread::spawn(move || {
    ///     let _worker = ctx.enter_worker()?;
    ///     run_jobs();
    ///     Ok::<_, SyncError>(())
    /// });
    /// ```
    ///
    /// # Errors
    ///
    /// [`SyncError::RegistryFull`] when no arbiter could be created.
    pub fn enter_worker(&self) -> SyncResult<WorkerGuard> {
        Ok(WorkerGuard {
            arbiter: self.current_arbiter()?,
        })
    }

    /// Whether both handles refer to the same context.
    #[inline]
    #[must_use]
    pub fn same_as(&self, other: &SyncContext) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn check_arbiter(&self, arbiter: &Arbiter) -> SyncResult<()> {
        if self.same_as(arbiter.context()) {
            Ok(())
        } else {
            Err(SyncError::ForeignArbiter {
                arbiter: arbiter.id().raw(),
            })
        }
    }

    #[inline]
    pub(crate) fn coordinator(&self) -> &Coordinator {
        &self.shared.coordinator
    }

    #[inline]
    pub(crate) fn counters(&self) -> &SyncCounters {
        &self.shared.counters
    }
}

/// A worker thread's binding to its arbiter.
///
/// Dropping it calls [`Arbiter::unlock_all`]. Pending waits are not
/// resolved, only ownership is cleared.
#[derive(Debug)]
pub struct WorkerGuard {
    arbiter: Arbiter,
}

impl WorkerGuard {
    /// The worker's arbiter.
    #[inline]
    #[must_use]
    pub fn arbiter(&self) -> &Arbiter {
        &self.arbiter
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let released = self.arbiter.unlock_all();
        if thread::panicking() {
            warn!(arbiter = %self.arbiter.id(), released, "worker unwinding, released its locks");
        } else {
            debug!(arbiter = %self.arbiter.id(), released, "worker shut down");
        }
    }
}
