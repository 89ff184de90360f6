//! Append-only incident log (JSON Lines)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use crate::Result;

/// How a recovery transition ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncidentOutcome {
    /// The process must stop
    Fatal,
    /// The database directory was moved aside
    RenamedAside { path: PathBuf },
    /// The database directory was deleted
    Cleared,
    /// A lock file left behind by a dead process was taken over
    LockReclaimed,
    /// The replacement database could not be opened either
    ReopenFailed { reason: String },
}

impl std::fmt::Display for IncidentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentOutcome::Fatal => write!(f, "fatal"),
            IncidentOutcome::RenamedAside { path } => write!(f, "renamed aside to {}", path.display()),
            IncidentOutcome::Cleared => write!(f, "cleared"),
            IncidentOutcome::LockReclaimed => write!(f, "lock reclaimed"),
            IncidentOutcome::ReopenFailed { reason } => write!(f, "reopen failed: {}", reason),
        }
    }
}

/// One recovery transition. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryIncident {
    pub detected_at: DateTime<Utc>,
    pub symptom: String,
    pub strategy_applied: String,
    pub outcome: IncidentOutcome,
}

impl RecoveryIncident {
    pub fn now(symptom: impl Into<String>, strategy: impl Into<String>, outcome: IncidentOutcome) -> Self {
        Self {
            detected_at: Utc::now(),
            symptom: symptom.into(),
            strategy_applied: strategy.into(),
            outcome,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncidentLog {
    path: PathBuf,
}

impl IncidentLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append and fsync one incident
    pub fn append(&self, incident: &RecoveryIncident) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut line = serde_json::to_vec(incident)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        file.sync_all()?;

        tracing::warn!(
            symptom = %incident.symptom,
            strategy = %incident.strategy_applied,
            outcome = ?incident.outcome,
            log = %self.path.display(),
            "recovery incident recorded"
        );
        Ok(())
    }

    /// Every incident in the log, oldest first. A missing log is empty.
    pub fn read_all(&self) -> Result<Vec<RecoveryIncident>> {
        read_incidents(&self.path)
    }
}

pub fn read_incidents(path: &Path) -> Result<Vec<RecoveryIncident>> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut incidents = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        incidents.push(serde_json::from_str(&line)?);
    }
    Ok(incidents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_only_log() {
        let tmp = tempfile::tempdir().unwrap();
        let log = IncidentLog::new(tmp.path().join("logs").join("incidents.jsonl"));
        assert!(log.read_all().unwrap().is_empty());

        let first = RecoveryIncident::now("open failed: file is not a database", "fail-fast", IncidentOutcome::Fatal);
        let second = RecoveryIncident::now(
            "open failed: file is not a database",
            "soft-rename",
            IncidentOutcome::RenamedAside { path: PathBuf::from("/data/graph.corrupt-x") },
        );
        log.append(&first).unwrap();
        log.append(&second).unwrap();

        let all = log.read_all().unwrap();
        assert_eq!(all, vec![first, second]);

        let raw = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("\"kind\":\"renamed_aside\""));
    }
}
