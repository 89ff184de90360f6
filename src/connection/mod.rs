//! Connection Manager - the single gate to the storage engine
//!
//! Every operation runs as:
//! 1. acquire the process-wide lock for the database directory
//! 2. on first use, run the startup reconciliation sequence
//! 3. open a fresh connection for this call only
//! 4. run the caller's operation (timed by the instrumentation)
//! 5. close the connection, then release the lock
//!
//! Steps 5 happen on every exit path, including a panicking operation: the
//! lease is declared after the lock guard and so is dropped first.
//!
//! Managers created for the same directory in one process share a single lock
//! and initialization state. The first manager to initialize decides which
//! configuration the startup sequence runs with.

pub mod lock;

pub use lock::{AcquireError, CancelSignal, ExclusiveLock, LockGuard};

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use crate::instrument::{Instrumentation, InstrumentationStats};
use crate::recovery::{ProcessLock, RecoveryController};
use crate::startup::{self, StartupReport};
use crate::storage::GraphStore;
use crate::{Config, Error, Result};

static ENGINES: OnceLock<lock::Registry<EngineState>> = OnceLock::new();

/// State guarded by the exclusivity lock
#[derive(Default)]
struct EngineState {
    init: InitGuard,
    process_lock: Option<ProcessLock>,
}

/// One-time initialization, re-armed only when recovery replaces the database
#[derive(Debug, Default)]
pub struct InitGuard {
    report: Option<StartupReport>,
}

impl InitGuard {
    pub fn get(&self) -> Option<&StartupReport> {
        self.report.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.report.is_some()
    }

    /// Run `init` unless a previous run succeeded. A failed run leaves the guard armed.
    pub fn get_or_try_init(
        &mut self,
        init: impl FnOnce() -> Result<StartupReport>,
    ) -> Result<&StartupReport> {
        let report = match self.report.take() {
            Some(report) => report,
            None => init()?,
        };
        Ok(self.report.insert(report))
    }

    pub fn reset(&mut self) {
        self.report = None;
    }
}

pub struct ConnectionManager {
    config: Config,
    engine: Arc<ExclusiveLock<EngineState>>,
    recovery: RecoveryController,
    instrumentation: Instrumentation,
    open_handles: Arc<AtomicUsize>,
}

impl ConnectionManager {
    /// The database path is made canonical here, creating the directory if
    /// needed, so every spelling of one directory shares one lock.
    pub fn new(mut config: Config) -> Result<Self> {
        config.validate()?;
        config.database = canonical_database_path(&config.database)?;
        let engine = lock::process_lock_for(&ENGINES, &config.database, EngineState::default);
        Ok(Self {
            recovery: RecoveryController::from_config(&config),
            instrumentation: Instrumentation::from_config(&config),
            open_handles: Arc::new(AtomicUsize::new(0)),
            engine,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the startup sequence now instead of on first use
    pub fn initialize(&self) -> Result<StartupReport> {
        let mut state = self.acquire("initialize", None)?;
        self.ensure_initialized(&mut state).cloned()
    }

    /// Run `op` with exclusive access to a fresh connection.
    ///
    /// Blocks until the lock is free (or the configured acquire timeout
    /// elapses). Statements that must be coherent belong in one call.
    pub fn with_connection<T, E>(
        &self,
        label: &str,
        op: impl FnOnce(&mut ConnectionLease) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        self.run(label, None, op)
    }

    /// Like [`with_connection`](Self::with_connection), giving up if `cancel`
    /// fires before the lock is acquired. A cancelled call never runs `op`.
    pub fn with_connection_cancellable<T, E>(
        &self,
        label: &str,
        cancel: &CancelSignal,
        op: impl FnOnce(&mut ConnectionLease) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        self.run(label, Some(cancel), op)
    }

    /// Leases currently open through this manager
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn instrumentation(&self) -> InstrumentationStats {
        self.instrumentation.stats()
    }

    fn run<T, E>(
        &self,
        label: &str,
        cancel: Option<&CancelSignal>,
        op: impl FnOnce(&mut ConnectionLease) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        let mut state = self.acquire(label, cancel)?;
        self.ensure_initialized(&mut state)?;
        let mut lease = self.open_lease(&mut state, label)?;

        let result = self.instrumentation.observe(label, || op(&mut lease));

        if let Err(e) = lease.release() {
            tracing::warn!(operation = label, error = %e, "failed to close connection");
        }
        drop(state);
        result
    }

    fn acquire(&self, label: &str, cancel: Option<&CancelSignal>) -> Result<LockGuard<'_, EngineState>> {
        self.engine
            .acquire(cancel, self.config.acquire_timeout())
            .map_err(|e| match e {
                AcquireError::Cancelled => {
                    tracing::debug!(operation = label, "lock acquisition cancelled");
                    Error::Cancelled {
                        label: label.to_string(),
                    }
                }
                AcquireError::TimedOut(waited) => {
                    tracing::warn!(operation = label, waited_ms = waited.as_millis() as u64, "lock acquisition timed out");
                    Error::LockTimeout {
                        label: label.to_string(),
                        waited_ms: waited.as_millis() as u64,
                    }
                }
            })
    }

    /// Errors from here are fatal unless retryable.
    fn ensure_initialized<'s>(&self, state: &'s mut EngineState) -> Result<&'s StartupReport> {
        self.bring_up(state).map_err(Error::into_startup_failure)
    }

    fn bring_up<'s>(&self, state: &'s mut EngineState) -> Result<&'s StartupReport> {
        if state.process_lock.is_none() {
            let path = self.config.lock_file_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            state.process_lock = Some(ProcessLock::acquire(&path, self.recovery.incidents())?);
        }

        let (config, recovery) = (&self.config, &self.recovery);
        state.init.get_or_try_init(|| {
            tracing::info!(database = %config.database.display(), "initializing database");
            startup::reconcile(config, recovery)
        })
    }

    fn open_lease(&self, state: &mut EngineState, label: &str) -> Result<ConnectionLease> {
        let (store, recovered) = self
            .recovery
            .open_with_recovery(&self.config.database, GraphStore::connect)?;

        let Some(outcome) = recovered else {
            return Ok(ConnectionLease::new(store, label, &self.open_handles));
        };

        // The database was replaced: the fresh one has no schema yet.
        store.close()?;
        tracing::warn!(operation = label, outcome = ?outcome, "database replaced at runtime; reinitializing");
        state.init.reset();
        self.ensure_initialized(state)?;
        let store = GraphStore::connect(&self.config.database)?;
        Ok(ConnectionLease::new(store, label, &self.open_handles))
    }
}

fn canonical_database_path(path: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(path)?;
    Ok(std::fs::canonicalize(path)?)
}

/// A connection scoped to one `with_connection` call
pub struct ConnectionLease {
    store: Option<GraphStore>,
    label: String,
    open_handles: Arc<AtomicUsize>,
}

impl ConnectionLease {
    fn new(store: GraphStore, label: &str, open_handles: &Arc<AtomicUsize>) -> Self {
        open_handles.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(operation = label, "connection opened");
        Self {
            store: Some(store),
            label: label.to_string(),
            open_handles: Arc::clone(open_handles),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn transaction(&mut self) -> rusqlite::Result<rusqlite::Transaction<'_>> {
        self.conn_mut().transaction()
    }

    /// Close now, reporting any error raised on close
    pub fn release(mut self) -> Result<()> {
        match self.store.take() {
            Some(store) => store.close(),
            None => Ok(()),
        }
    }
}

impl Deref for ConnectionLease {
    type Target = GraphStore;

    fn deref(&self) -> &GraphStore {
        self.store.as_ref().expect("lease holds its store until released")
    }
}

impl DerefMut for ConnectionLease {
    fn deref_mut(&mut self) -> &mut GraphStore {
        self.store.as_mut().expect("lease holds its store until released")
    }
}

impl Drop for ConnectionLease {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            if let Err(e) = store.close() {
                tracing::warn!(operation = %self.label, error = %e, "failed to close connection");
            }
        }
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(operation = %self.label, "connection closed");
    }
}
