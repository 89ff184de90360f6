//! # Graphkeeper - schema reconciliation and safe access for a single-writer graph store
//!
//! Graphkeeper sits in front of an embedded, single-writer storage engine and provides:
//! - A declarative schema descriptor (entity tables, relationship tables, typed columns)
//! - Live schema introspection and a strictly additive schema diff
//! - Pre-migration backups and an idempotent migration applier
//! - An exclusive-access connection broker with lazy first-use reconciliation
//! - Configurable recovery from open failures, with a durable incident log
//! - Slow-operation instrumentation

pub mod config;
pub mod schema;
pub mod storage;
pub mod migration;
pub mod backup;
pub mod recovery;
pub mod connection;
pub mod instrument;
pub mod startup;
pub mod ui;

// Re-exports for convenient access
pub use config::{Config, ReconcileScope, RecoveryStrategy};
pub use schema::{ColumnType, DescriptorError, LiveSchemaSnapshot, SchemaDescriptor, SchemaDiff};
pub use connection::{CancelSignal, ConnectionLease, ConnectionManager};
pub use backup::{BackupCoordinator, BackupRecord, BackupTrigger};
pub use recovery::{IncidentOutcome, RecoveryController, RecoveryIncident};
pub use startup::StartupReport;

/// Result type alias for Graphkeeper operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Graphkeeper operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("Reconciliation failed at '{operation}': {source}")]
    Reconciliation {
        operation: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Acquisition of the database lock for '{label}' was cancelled")]
    Cancelled { label: String },

    #[error("Timed out after {waited_ms} ms waiting for the database lock for '{label}'")]
    LockTimeout { label: String, waited_ms: u64 },

    #[error("Failed to open database at {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("Database at {path} is held by running process {pid}")]
    HeldByProcess { pid: u32, path: String },

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Acquisition failures the caller may retry as a regular per-request failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Cancelled { .. } | Error::LockTimeout { .. })
    }

    /// Failures after which the process must not accept traffic.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Descriptor(_)
                | Error::Reconciliation { .. }
                | Error::HeldByProcess { .. }
                | Error::Fatal(_)
                | Error::Config(_)
        )
    }

    /// A failure raised while bringing the database up. Anything that is not
    /// already fatal or retryable becomes fatal: the engine is not usable.
    pub fn into_startup_failure(self) -> Error {
        if self.is_fatal() || self.is_retryable() {
            self
        } else {
            Error::Fatal(format!("startup failed: {}", self))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failures_are_fatal() {
        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));
        assert!(!io.is_fatal());
        let escalated = io.into_startup_failure();
        assert!(escalated.is_fatal());
        assert_eq!(escalated.to_string(), "Fatal: startup failed: IO error: disk gone");

        let timeout = Error::LockTimeout { label: "init".into(), waited_ms: 5 };
        assert!(timeout.into_startup_failure().is_retryable());
    }
}
