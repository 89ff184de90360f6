//! Startup reconciliation sequence
//!
//! load descriptor -> open (with recovery) -> introspect -> diff -> close
//! -> backup -> reopen -> apply -> record state
//!
//! The backup runs while no engine handle is open. The reconciled state is
//! recorded only after every operation succeeded, and only for a full-scope
//! run, so a scoped or failed run never marks the descriptor as current.

use serde::Serialize;
use crate::backup::{BackupCoordinator, BackupRecord, BackupTrigger};
use crate::config::ReconcileScope;
use crate::migration;
use crate::recovery::{IncidentOutcome, RecoveryController};
use crate::schema::{compute_diff, LiveSchemaSnapshot, SchemaDescriptor, SchemaDiff};
use crate::storage::GraphStore;
use crate::{Config, Result};

/// What the startup sequence concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconcileStatus {
    /// Reconciliation is switched off by configuration
    Disabled,
    /// The recorded descriptor hash matched; the live schema was not inspected
    Unchanged,
    /// The live schema was inspected and nothing was missing
    AlreadyCurrent,
    /// Operations were applied
    Reconciled,
}

impl ReconcileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::Disabled => "disabled",
            ReconcileStatus::Unchanged => "unchanged",
            ReconcileStatus::AlreadyCurrent => "already current",
            ReconcileStatus::Reconciled => "reconciled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartupReport {
    pub schema_version: u64,
    pub content_hash: String,
    pub status: ReconcileStatus,
    pub scope: ReconcileScope,
    /// Operations that changed the schema
    pub applied: usize,
    /// Operations a concurrent process had already performed
    pub already_present: usize,
    /// Operations that changed the schema
    pub operations: Vec<String>,
    /// Operations found already in place
    pub present_operations: Vec<String>,
    pub backup: Option<BackupRecord>,
    /// Set when the database had to be recovered before it would open
    pub recovery: Option<IncidentOutcome>,
}

impl StartupReport {
    fn new(descriptor: &SchemaDescriptor, status: ReconcileStatus, scope: ReconcileScope) -> Self {
        Self {
            schema_version: descriptor.version,
            content_hash: descriptor.content_hash(),
            status,
            scope,
            applied: 0,
            already_present: 0,
            operations: Vec::new(),
            present_operations: Vec::new(),
            backup: None,
            recovery: None,
        }
    }
}

/// The diff the current descriptor implies for `store`, restricted to `scope`
pub fn plan(
    descriptor: &SchemaDescriptor,
    store: &GraphStore,
    scope: ReconcileScope,
) -> Result<(LiveSchemaSnapshot, SchemaDiff)> {
    let live = LiveSchemaSnapshot::introspect(store.conn())?;
    let diff = compute_diff(descriptor, &live).restrict(scope, &live);
    Ok((live, diff))
}

/// Run the full startup sequence against `config.database`.
///
/// The caller must hold exclusive access to the database directory.
pub fn reconcile(config: &Config, recovery: &RecoveryController) -> Result<StartupReport> {
    let descriptor = SchemaDescriptor::load(&config.schema)?;
    let scope = config.scope();

    let (store, recovered) = recovery.open_with_recovery(&config.database, GraphStore::open)?;

    if !config.reconcile {
        tracing::warn!(
            version = descriptor.version,
            "schema reconciliation disabled by configuration; live schema not checked"
        );
        store.close()?;
        let mut report = StartupReport::new(&descriptor, ReconcileStatus::Disabled, scope);
        report.recovery = recovered;
        return Ok(report);
    }

    let hash = descriptor.content_hash();
    if !config.force_reconcile {
        if let Some(state) = store.load_state()? {
            if state.content_hash == hash {
                tracing::info!(
                    version = descriptor.version,
                    hash = %hash,
                    reconciled_at = %state.reconciled_at,
                    "schema already current (descriptor unchanged since last reconciliation)"
                );
                store.close()?;
                let mut report = StartupReport::new(&descriptor, ReconcileStatus::Unchanged, scope);
                report.recovery = recovered;
                return Ok(report);
            }
        }
    }

    let (_, diff) = plan(&descriptor, &store, scope)?;
    if diff.is_empty() {
        if scope == ReconcileScope::All {
            store.record_state(descriptor.version, &hash)?;
        }
        store.close()?;
        tracing::info!(version = descriptor.version, hash = %hash, "schema already current");
        let mut report = StartupReport::new(&descriptor, ReconcileStatus::AlreadyCurrent, scope);
        report.recovery = recovered;
        return Ok(report);
    }

    tracing::info!(
        operations = diff.len(),
        scope = %scope,
        "reconciliation needed: {} operations",
        diff.len()
    );

    store.close()?;
    let backup = BackupCoordinator::from_config(config)
        .create_backup(&config.database, BackupTrigger::PreMigration)?;
    let store = GraphStore::open(&config.database)?;

    let applied = migration::apply(&store, &diff)?;
    if scope == ReconcileScope::All {
        store.record_state(descriptor.version, &hash)?;
    }
    store.close()?;

    tracing::info!(
        version = descriptor.version,
        applied = applied.applied,
        already_present = applied.already_present,
        "reconciled {} changes",
        applied.applied
    );

    let mut report = StartupReport::new(&descriptor, ReconcileStatus::Reconciled, scope);
    report.applied = applied.applied;
    report.already_present = applied.already_present;
    report.operations = applied.operations;
    report.present_operations = applied.present_operations;
    report.backup = backup;
    report.recovery = recovered;
    Ok(report)
}
