mod common;

use std::path::Path;
use graphkeeper::backup::{list_backups, BackupTrigger};
use graphkeeper::recovery::read_incidents;
use graphkeeper::storage::DATABASE_FILE;
use graphkeeper::{ConnectionManager, Error, IncidentOutcome, RecoveryStrategy};
use common::{config_with, corrupt, USER_WIDGET_OWNS};

fn corrupt_siblings(base: &Path) -> usize {
    std::fs::read_dir(base)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("graph.corrupt-"))
        .count()
}

#[test]
fn test_fail_fast_stops_without_retry() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_with(tmp.path(), USER_WIDGET_OWNS);
    corrupt(&config);
    let original = std::fs::read(config.database.join(DATABASE_FILE)).unwrap();

    let manager = ConnectionManager::new(config.clone()).unwrap();
    let err = manager.initialize().unwrap_err();
    assert!(matches!(err, Error::Fatal(_)));
    assert!(err.is_fatal());

    assert_eq!(std::fs::read(config.database.join(DATABASE_FILE)).unwrap(), original);
    assert_eq!(corrupt_siblings(tmp.path()), 0);
    let incidents = read_incidents(&config.incident_log_path()).unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].outcome, IncidentOutcome::Fatal);
}

#[test]
fn test_soft_rename_keeps_one_copy_aside() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_with(tmp.path(), USER_WIDGET_OWNS);
    config.recovery_strategy = RecoveryStrategy::SoftRename;
    corrupt(&config);

    let manager = ConnectionManager::new(config.clone()).unwrap();
    let report = manager.initialize().unwrap();
    assert!(matches!(report.recovery, Some(IncidentOutcome::RenamedAside { .. })));
    assert_eq!(report.applied, 3);
    assert_eq!(corrupt_siblings(tmp.path()), 1);

    let rows = manager
        .with_connection("fresh database", |lease| lease.count_rows("User"))
        .unwrap();
    assert_eq!(rows, 0);
}

#[test]
fn test_clear_rebuild_leaves_no_trace() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_with(tmp.path(), USER_WIDGET_OWNS);
    config.recovery_strategy = RecoveryStrategy::ClearRebuild;
    config.skip_backup = true;
    corrupt(&config);

    let manager = ConnectionManager::new(config.clone()).unwrap();
    let report = manager.initialize().unwrap();
    assert_eq!(report.recovery, Some(IncidentOutcome::Cleared));
    assert_eq!(corrupt_siblings(tmp.path()), 0);
    assert!(!config.backup_dir.exists());
    assert!(manager
        .with_connection("fresh database", |lease| lease.count_rows("OWNS"))
        .is_ok());
}

#[test]
fn test_clear_rebuild_backs_up_first() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_with(tmp.path(), USER_WIDGET_OWNS);
    config.recovery_strategy = RecoveryStrategy::ClearRebuild;
    corrupt(&config);

    ConnectionManager::new(config.clone()).unwrap().initialize().unwrap();
    let backups = list_backups(&config.backup_dir).unwrap();
    let triggers: Vec<_> = backups.iter().map(|b| b.trigger).collect();
    assert!(triggers.contains(&BackupTrigger::PreReset));
    assert!(triggers.contains(&BackupTrigger::PreMigration));
}

#[test]
fn test_runtime_open_failure_reinitializes() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_with(tmp.path(), USER_WIDGET_OWNS);
    config.recovery_strategy = RecoveryStrategy::SoftRename;
    let manager = ConnectionManager::new(config.clone()).unwrap();
    manager.initialize().unwrap();

    // No lease is open between calls, so the file can be clobbered underneath.
    corrupt(&config);
    let rows = manager
        .with_connection("after corruption", |lease| lease.count_rows("Widget"))
        .unwrap();
    assert_eq!(rows, 0);
    assert_eq!(corrupt_siblings(tmp.path()), 1);
    assert_eq!(manager.open_handles(), 0);

    let incidents = read_incidents(&config.incident_log_path()).unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].strategy_applied, "soft-rename");
}

#[cfg(unix)]
#[test]
fn test_database_held_by_live_process_is_refused() {
    use fs2::FileExt;
    use std::io::Write;

    let tmp = tempfile::tempdir().unwrap();
    let manager = ConnectionManager::new(config_with(tmp.path(), USER_WIDGET_OWNS)).unwrap();
    let config = manager.config().clone();
    let mut held = std::fs::File::create(config.lock_file_path()).unwrap();
    held.lock_exclusive().unwrap();
    write!(held, "4242").unwrap();

    match manager.initialize() {
        Err(err @ Error::HeldByProcess { .. }) => {
            assert!(err.is_fatal());
            assert!(matches!(err, Error::HeldByProcess { pid: 4242, .. }));
        }
        other => panic!("expected held-by-process, got {:?}", other.map(|r| r.status)),
    }
    assert!(!config.database.join(DATABASE_FILE).exists());
    assert!(read_incidents(&config.incident_log_path()).unwrap().is_empty());

    drop(held);
    let report = manager.initialize().unwrap();
    assert_eq!(report.applied, 3);
    let incidents = read_incidents(&config.incident_log_path()).unwrap();
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].outcome, IncidentOutcome::LockReclaimed);
}
