//! Recovery Controller - handles a database directory that will not open
//!
//! The strategy is chosen once from configuration:
//! - `fail-fast`: record the incident and stop
//! - `soft-rename`: move the directory to `<dir>.corrupt-<timestamp>` and start fresh
//! - `clear-rebuild`: take a pre-reset backup (when enabled), delete the directory, start fresh
//!
//! Every transition is appended to the incident log before control returns.
//! After a strategy runs the store is reopened exactly once.

pub mod incident;
pub mod lockfile;

pub use incident::{read_incidents, IncidentLog, IncidentOutcome, RecoveryIncident};
pub use lockfile::ProcessLock;

use std::path::{Path, PathBuf};
use chrono::Utc;
use crate::backup::{BackupCoordinator, BackupTrigger};
use crate::config::RecoveryStrategy;
use crate::{Config, Error, Result};

pub struct RecoveryController {
    strategy: RecoveryStrategy,
    incidents: IncidentLog,
    backups: BackupCoordinator,
}

impl RecoveryController {
    pub fn new(strategy: RecoveryStrategy, incidents: IncidentLog, backups: BackupCoordinator) -> Self {
        Self {
            strategy,
            incidents,
            backups,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.recovery_strategy,
            IncidentLog::new(config.incident_log_path()),
            BackupCoordinator::from_config(config),
        )
    }

    pub fn strategy(&self) -> RecoveryStrategy {
        self.strategy
    }

    pub fn incidents(&self) -> &IncidentLog {
        &self.incidents
    }

    /// Run `open` against `dir`, applying the strategy if it fails with an open error.
    ///
    /// Returns the opened value and, when recovery ran, the outcome recorded.
    /// Errors other than open failures pass through untouched.
    pub fn open_with_recovery<T>(
        &self,
        dir: &Path,
        mut open: impl FnMut(&Path) -> Result<T>,
    ) -> Result<(T, Option<IncidentOutcome>)> {
        let failure = match open(dir) {
            Ok(value) => return Ok((value, None)),
            Err(e @ Error::Open { .. }) => e,
            Err(e) => return Err(e),
        };

        let outcome = self.recover(dir, &failure)?;
        match open(dir) {
            Ok(value) => {
                tracing::info!(path = %dir.display(), strategy = %self.strategy, "database reinitialized after recovery");
                Ok((value, Some(outcome)))
            }
            Err(e) => {
                self.incidents.append(&RecoveryIncident::now(
                    format!("reopen after recovery failed: {}", e),
                    self.strategy.as_str(),
                    IncidentOutcome::ReopenFailed {
                        reason: e.to_string(),
                    },
                ))?;
                tracing::error!(path = %dir.display(), error = %e, "database still unusable after recovery");
                Err(Error::Fatal(format!(
                    "database at {} could not be reopened after {}: {}",
                    dir.display(),
                    self.strategy,
                    e
                )))
            }
        }
    }

    /// Apply the configured strategy to `dir` after `failure`.
    ///
    /// `Ok` means the directory is gone and a fresh database may be created.
    pub fn recover(&self, dir: &Path, failure: &Error) -> Result<IncidentOutcome> {
        self.recover_with(dir, failure, |from, to| std::fs::rename(from, to), |d| std::fs::remove_dir_all(d))
    }

    fn recover_with(
        &self,
        dir: &Path,
        failure: &Error,
        rename: impl FnOnce(&Path, &Path) -> std::io::Result<()>,
        remove: impl FnOnce(&Path) -> std::io::Result<()>,
    ) -> Result<IncidentOutcome> {
        let symptom = symptom_of(failure);
        tracing::error!(path = %dir.display(), symptom = %symptom, strategy = %self.strategy, "database open failed");

        match self.strategy {
            RecoveryStrategy::FailFast => {
                self.record(&symptom, IncidentOutcome::Fatal)?;
                Err(Error::Fatal(format!(
                    "database at {} failed to open and recovery strategy is fail-fast: {}",
                    dir.display(),
                    failure
                )))
            }
            RecoveryStrategy::SoftRename => {
                if !dir.exists() {
                    return self.fatal(&symptom, "nothing to rename aside", dir);
                }
                let aside = aside_path(dir);
                if let Err(e) = rename(dir, &aside) {
                    return self.fatal(&symptom, &format!("rename aside failed: {}", e), dir);
                }
                tracing::warn!(from = %dir.display(), to = %aside.display(), "moved unreadable database aside");
                let outcome = IncidentOutcome::RenamedAside { path: aside };
                self.record(&symptom, outcome.clone())?;
                Ok(outcome)
            }
            RecoveryStrategy::ClearRebuild => {
                if dir.exists() {
                    if let Err(e) = self.backups.create_backup(dir, BackupTrigger::PreReset) {
                        return self.fatal(&symptom, &format!("pre-reset backup failed: {}", e), dir);
                    }
                    if let Err(e) = remove(dir) {
                        return self.fatal(&symptom, &format!("delete failed: {}", e), dir);
                    }
                }
                tracing::warn!(path = %dir.display(), "deleted unreadable database");
                self.record(&symptom, IncidentOutcome::Cleared)?;
                Ok(IncidentOutcome::Cleared)
            }
        }
    }

    fn record(&self, symptom: &str, outcome: IncidentOutcome) -> Result<()> {
        self.incidents
            .append(&RecoveryIncident::now(symptom, self.strategy.as_str(), outcome))
    }

    fn fatal<T>(&self, symptom: &str, detail: &str, dir: &Path) -> Result<T> {
        self.record(&format!("{}; {}", symptom, detail), IncidentOutcome::Fatal)?;
        Err(Error::Fatal(format!(
            "recovery of {} with {} failed: {}",
            dir.display(),
            self.strategy,
            detail
        )))
    }
}

fn symptom_of(failure: &Error) -> String {
    match failure {
        Error::Open { reason, .. } => format!("open failed: {}", reason),
        other => other.to_string(),
    }
}

/// `<dir>.corrupt-<timestamp>`, made unique if already taken
fn aside_path(dir: &Path) -> PathBuf {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let mut name = dir.as_os_str().to_os_string();
    name.push(format!(".corrupt-{}", stamp));
    let candidate = PathBuf::from(&name);
    if !candidate.exists() {
        return candidate;
    }
    name.push(format!("-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{GraphStore, DATABASE_FILE};

    const GARBAGE: &[u8] = b"not a database ";

    fn corrupt_db(base: &Path) -> PathBuf {
        let dir = base.join("graph");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(DATABASE_FILE), GARBAGE.repeat(300)).unwrap();
        dir
    }

    fn controller(base: &Path, strategy: RecoveryStrategy, backups: bool) -> RecoveryController {
        RecoveryController::new(
            strategy,
            IncidentLog::new(base.join("incidents.jsonl")),
            BackupCoordinator::new(base.join("backups"), backups),
        )
    }

    fn siblings(base: &Path, prefix: &str) -> usize {
        std::fs::read_dir(base)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
            .count()
    }

    #[test]
    fn test_healthy_open_records_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let rc = controller(tmp.path(), RecoveryStrategy::FailFast, false);
        let (_, outcome) = rc.open_with_recovery(&tmp.path().join("graph"), GraphStore::open).unwrap();
        assert!(outcome.is_none());
        assert!(rc.incidents().read_all().unwrap().is_empty());
    }

    #[test]
    fn test_fail_fast() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = corrupt_db(tmp.path());
        let rc = controller(tmp.path(), RecoveryStrategy::FailFast, false);

        let mut attempts = 0;
        let result = rc.open_with_recovery(&dir, |d| {
            attempts += 1;
            GraphStore::open(d)
        });
        assert!(matches!(result, Err(Error::Fatal(_))));
        assert_eq!(attempts, 1);
        assert!(dir.join(DATABASE_FILE).exists());

        let incidents = rc.incidents().read_all().unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].outcome, IncidentOutcome::Fatal);
        assert_eq!(incidents[0].strategy_applied, "fail-fast");
        assert!(incidents[0].symptom.starts_with("open failed"));
    }

    #[test]
    fn test_soft_rename() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = corrupt_db(tmp.path());
        let rc = controller(tmp.path(), RecoveryStrategy::SoftRename, false);

        let (store, outcome) = rc.open_with_recovery(&dir, GraphStore::open).unwrap();
        assert_eq!(store.count_rows("_graph_relationships").unwrap(), 0);
        assert_eq!(siblings(tmp.path(), "graph.corrupt-"), 1);

        let Some(IncidentOutcome::RenamedAside { path }) = outcome else {
            panic!("expected rename outcome");
        };
        assert_eq!(
            std::fs::read(path.join(DATABASE_FILE)).unwrap(),
            GARBAGE.repeat(300)
        );
        assert_eq!(rc.incidents().read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_clear_rebuild() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = corrupt_db(tmp.path());
        let rc = controller(tmp.path(), RecoveryStrategy::ClearRebuild, false);

        let (store, outcome) = rc.open_with_recovery(&dir, GraphStore::open).unwrap();
        assert_eq!(outcome, Some(IncidentOutcome::Cleared));
        assert_eq!(store.count_rows("_graph_relationships").unwrap(), 0);
        assert_eq!(siblings(tmp.path(), "graph.corrupt-"), 0);
        assert!(!tmp.path().join("backups").exists());
    }

    #[test]
    fn test_clear_rebuild_backs_up_when_enabled() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = corrupt_db(tmp.path());
        let rc = controller(tmp.path(), RecoveryStrategy::ClearRebuild, true);

        rc.open_with_recovery(&dir, GraphStore::open).unwrap();
        let backups = crate::backup::list_backups(&tmp.path().join("backups")).unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].trigger, BackupTrigger::PreReset);
    }

    #[test]
    fn test_failed_move_aside_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = corrupt_db(tmp.path());
        let failure = Error::Open {
            path: dir.display().to_string(),
            reason: "file is not a database".into(),
        };
        let denied = || std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");

        let rc = controller(tmp.path(), RecoveryStrategy::SoftRename, false);
        let result = rc.recover_with(&dir, &failure, |_, _| Err(denied()), |_| unreachable!());
        assert!(matches!(result, Err(Error::Fatal(_))));

        let rc = controller(tmp.path(), RecoveryStrategy::ClearRebuild, false);
        let result = rc.recover_with(&dir, &failure, |_, _| unreachable!(), |_| Err(denied()));
        assert!(matches!(result, Err(Error::Fatal(_))));

        let incidents = rc.incidents().read_all().unwrap();
        assert_eq!(incidents.len(), 2);
        assert!(incidents.iter().all(|i| i.outcome == IncidentOutcome::Fatal));
        assert!(incidents[0].symptom.ends_with("rename aside failed: denied"));
        assert_eq!(incidents[1].strategy_applied, "clear-rebuild");
        assert!(incidents[1].symptom.ends_with("delete failed: denied"));
        assert!(dir.join(DATABASE_FILE).exists());
    }

    #[test]
    fn test_reopen_failure_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = corrupt_db(tmp.path());
        let rc = controller(tmp.path(), RecoveryStrategy::SoftRename, false);

        let result: Result<((), _)> = rc.open_with_recovery(&dir, |d| {
            Err(Error::Open {
                path: d.display().to_string(),
                reason: "still broken".into(),
            })
        });
        assert!(matches!(result, Err(Error::Fatal(_))));

        let incidents = rc.incidents().read_all().unwrap();
        assert_eq!(incidents.len(), 2);
        assert!(matches!(incidents[1].outcome, IncidentOutcome::ReopenFailed { .. }));
    }
}
