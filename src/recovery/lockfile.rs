//! Process lock file next to the database directory
//!
//! The file carries an OS advisory lock for as long as a process serves the
//! database, plus the holder's PID for diagnostics. The lock conflicts across
//! processes and across separate handles within one process; the OS drops it
//! when the holder exits, however it exits.
//!
//! A clean release empties the file. A PID still present when the lock is
//! taken belongs to a holder that died, and is recorded as an incident.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use super::incident::{IncidentLog, IncidentOutcome, RecoveryIncident};
use crate::{Error, Result};

#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    file: File,
}

impl ProcessLock {
    pub fn acquire(path: &Path, incidents: &IncidentLog) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if !is_contended(&e) {
                return Err(e.into());
            }
            // Zero when the holder has not written its PID yet.
            let pid = read_pid(&mut file)?.unwrap_or(0);
            return Err(Error::HeldByProcess {
                pid,
                path: path.display().to_string(),
            });
        }

        if let Some(stale) = read_pid(&mut file)? {
            incidents.append(&RecoveryIncident::now(
                format!("lock held by stale process {}", stale),
                "reclaim-lock",
                IncidentOutcome::LockReclaimed,
            ))?;
        }

        let me = std::process::id();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(me.to_string().as_bytes())?;
        file.sync_all()?;
        tracing::debug!(path = %path.display(), pid = me, "process lock acquired");

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        // The OS lock goes with the handle; emptying the file marks the release as clean.
        if let Err(e) = self.file.set_len(0) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to clear process lock");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn read_pid(file: &mut File) -> Result<Option<u32>> {
    let mut contents = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut contents)?;
    Ok(contents.trim().parse().ok())
}
