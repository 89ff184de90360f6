//! Backup Coordinator - directory snapshots taken before destructive or schema-changing work
//!
//! Each backup is a directory under the backup root named
//! `<UTC timestamp>_<trigger>`, holding a copy of the database directory and
//! a `backup.json` manifest. Archives are staged under `.tmp-<uuid>` and only
//! renamed into place once complete. This module never deletes archives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use crate::Result;

/// Manifest file written inside each archive
pub const MANIFEST_FILE: &str = "backup.json";

/// Subdirectory of an archive holding the copied database directory
pub const DATA_DIR: &str = "data";

/// Why a backup was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackupTrigger {
    PreMigration,
    PreReset,
    Manual,
}

impl BackupTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupTrigger::PreMigration => "pre-migration",
            BackupTrigger::PreReset => "pre-reset",
            BackupTrigger::Manual => "manual",
        }
    }
}

impl std::fmt::Display for BackupTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A completed backup. Never modified after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source_path: PathBuf,
    pub archive_path: PathBuf,
    pub trigger: BackupTrigger,
    pub size_bytes: u64,
}

pub struct BackupCoordinator {
    backup_root: PathBuf,
    enabled: bool,
}

impl BackupCoordinator {
    pub fn new(backup_root: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            backup_root: backup_root.into(),
            enabled,
        }
    }

    pub fn from_config(config: &crate::Config) -> Self {
        Self::new(config.backup_dir.clone(), !config.skip_backup)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Snapshot `source` unless backups are disabled.
    ///
    /// Returns `None` (and warns) when disabled. The caller must ensure no
    /// engine handle is open on `source` for the duration of the call.
    pub fn create_backup(&self, source: &Path, trigger: BackupTrigger) -> Result<Option<BackupRecord>> {
        if !self.enabled {
            tracing::warn!(
                source = %source.display(),
                trigger = %trigger,
                "backups are disabled by configuration; continuing without a backup"
            );
            return Ok(None);
        }
        self.snapshot(source, trigger).map(Some)
    }

    /// Snapshot `source` regardless of configuration
    pub fn snapshot(&self, source: &Path, trigger: BackupTrigger) -> Result<BackupRecord> {
        if !source.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("database directory {} does not exist", source.display()),
            )
            .into());
        }

        fs::create_dir_all(&self.backup_root)?;
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let staging = self.backup_root.join(format!(".tmp-{}", id));

        match self.stage(source, &staging, id, created_at, trigger) {
            Ok(record) => {
                tracing::info!(
                    archive = %record.archive_path.display(),
                    size_bytes = record.size_bytes,
                    trigger = %trigger,
                    "backup created"
                );
                Ok(record)
            }
            Err(e) => {
                if staging.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&staging) {
                        tracing::warn!(path = %staging.display(), error = %cleanup, "failed to remove partial backup");
                    }
                }
                Err(e)
            }
        }
    }

    fn stage(
        &self,
        source: &Path,
        staging: &Path,
        id: Uuid,
        created_at: DateTime<Utc>,
        trigger: BackupTrigger,
    ) -> Result<BackupRecord> {
        let size_bytes = copy_dir(source, &staging.join(DATA_DIR))?;

        let mut archive_path = self.backup_root.join(archive_name(created_at, trigger));
        if archive_path.exists() {
            let short = id.simple().to_string();
            archive_path = self.backup_root.join(format!(
                "{}_{}",
                archive_name(created_at, trigger),
                &short[..8]
            ));
        }

        let record = BackupRecord {
            id,
            created_at,
            source_path: source.to_path_buf(),
            archive_path: archive_path.clone(),
            trigger,
            size_bytes,
        };
        let manifest = serde_json::to_vec_pretty(&record)?;
        fs::write(staging.join(MANIFEST_FILE), manifest)?;
        fs::File::open(staging.join(MANIFEST_FILE))?.sync_all()?;

        fs::rename(staging, &archive_path)?;
        Ok(record)
    }
}

/// Archive directory name for a timestamp and trigger
pub fn archive_name(created_at: DateTime<Utc>, trigger: BackupTrigger) -> String {
    format!("{}_{}", created_at.format("%Y%m%dT%H%M%S%.3fZ"), trigger)
}

/// All completed backups under `root`, newest first. Staging directories are ignored.
pub fn list_backups(root: &Path) -> Result<Vec<BackupRecord>> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(".tmp-") || !entry.file_type()?.is_dir() {
            continue;
        }
        let manifest = entry.path().join(MANIFEST_FILE);
        match fs::read(&manifest) {
            Ok(bytes) => records.push(serde_json::from_slice::<BackupRecord>(&bytes)?),
            Err(e) => tracing::debug!(path = %manifest.display(), error = %e, "skipping directory without manifest"),
        }
    }
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(records)
}

/// Recursively copy a directory, returning the number of bytes copied
fn copy_dir(from: &Path, to: &Path) -> std::io::Result<u64> {
    fs::create_dir_all(to)?;
    let mut total = 0;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            total += fs::copy(entry.path(), &target)?;
            fs::File::open(&target)?.sync_all()?;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_source(base: &Path) -> PathBuf {
        let source = base.join("graph");
        fs::create_dir_all(source.join("nested")).unwrap();
        fs::write(source.join("graph.db"), b"0123456789").unwrap();
        fs::write(source.join("nested").join("side"), b"abc").unwrap();
        source
    }

    #[test]
    fn test_backup_copies_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let source = seeded_source(tmp.path());
        let coordinator = BackupCoordinator::new(tmp.path().join("backups"), true);

        let record = coordinator
            .create_backup(&source, BackupTrigger::PreMigration)
            .unwrap()
            .unwrap();
        assert_eq!(record.size_bytes, 13);
        assert!(record.archive_path.ends_with(archive_name(record.created_at, BackupTrigger::PreMigration)));
        assert!(record
            .archive_path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .ends_with("_pre-migration"));
        assert_eq!(
            fs::read(record.archive_path.join(DATA_DIR).join("nested").join("side")).unwrap(),
            b"abc"
        );

        let listed = list_backups(coordinator.backup_root()).unwrap();
        assert_eq!(listed, vec![record]);
    }

    #[test]
    fn test_disabled_backup_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let source = seeded_source(tmp.path());
        let coordinator = BackupCoordinator::new(tmp.path().join("backups"), false);
        assert!(coordinator.create_backup(&source, BackupTrigger::Manual).unwrap().is_none());
        assert!(!tmp.path().join("backups").exists());
    }

    #[test]
    fn test_failed_backup_leaves_nothing_visible() {
        let tmp = tempfile::tempdir().unwrap();
        let coordinator = BackupCoordinator::new(tmp.path().join("backups"), true);
        let missing = tmp.path().join("missing");
        assert!(coordinator.create_backup(&missing, BackupTrigger::Manual).is_err());
        assert!(list_backups(coordinator.backup_root()).unwrap().is_empty());
    }

    #[test]
    fn test_same_millisecond_backups_get_distinct_names() {
        let tmp = tempfile::tempdir().unwrap();
        let source = seeded_source(tmp.path());
        let coordinator = BackupCoordinator::new(tmp.path().join("backups"), true);

        let mut paths = std::collections::HashSet::new();
        for _ in 0..5 {
            let record = coordinator.snapshot(&source, BackupTrigger::Manual).unwrap();
            assert!(paths.insert(record.archive_path));
        }
        let leftovers: Vec<_> = fs::read_dir(coordinator.backup_root())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
