//! Per-project file locking with stale-owner detection (spec §4.3).
//!
//! Grounded on shipit's `ShipitLock` (`src/release/lock.rs`), which tracks
//! ownership in a small file read back on every deploy; unlike shipit's
//! remote-host lock (read/written over SSH), this one lives on the local
//! filesystem under the data directory, and liveness is checked against
//! the local process table with `sysinfo` rather than assumed from a
//! remote session succeeding.

use std::io::Write;
use std::path::{Path, PathBuf};

use sysinfo::{Pid, System};

use crate::error::{Error, Result};

/// Held for the duration of an operation that must not run concurrently
/// with another instance of itself (a deploy, a rollback, a retirement
/// sweep). Dropping it releases the lock; `release()` lets callers check
/// for I/O errors explicitly.
pub struct Lock {
    path: PathBuf,
    released: bool,
}

impl Lock {
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        if !self.released && self.path.exists() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

pub struct LockManager {
    locks_dir: PathBuf,
}

impl LockManager {
    pub fn new(locks_dir: PathBuf) -> Self {
        Self { locks_dir }
    }

    /// Acquires the named lock within `scope` (e.g. scope "project",
    /// name the project name). The lock file holds the current
    /// process's PID as plain text (spec §15 open-question decision:
    /// no JSON envelope, just the PID, since nothing else needs to be
    /// recorded).
    ///
    /// Follows spec §4.3's four-step algorithm exactly so two racing
    /// acquirers can't both succeed: (1) exclusive create, fail-if-exists;
    /// (2) on success, write the pid and fsync; (3) on "already exists",
    /// read the owner pid and, if that process is dead, remove the file
    /// and retry step 1 once (the stale-lock path); (4) if the owner is
    /// still alive (on the first attempt, or after the retry), fail with
    /// `LockAcquireFailed`.
    pub fn acquire(&self, scope: &str, name: &str) -> Result<Lock> {
        let dir = self.locks_dir.join(scope);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{name}.lock"));

        if self.create_exclusive(&path)? {
            return Ok(Lock {
                path,
                released: false,
            });
        }

        let existing_pid = read_owner(&path)?;
        if let Some(pid) = existing_pid {
            if self.is_alive(pid) {
                return Err(Error::LockAcquireFailed(format!(
                    "{scope}/{name} held by pid {pid}"
                )));
            }
            tracing::warn!(scope, name, pid, "reclaiming lock from dead owner");
        }

        // Stale (or unreadable) owner: reclaim and retry exactly once. If
        // the retry also finds the file already there, another acquirer
        // won the race in the meantime.
        let _ = std::fs::remove_file(&path);
        if self.create_exclusive(&path)? {
            return Ok(Lock {
                path,
                released: false,
            });
        }
        Err(Error::LockAcquireFailed(format!(
            "{scope}/{name} contended while reclaiming a stale lock"
        )))
    }

    /// Attempts to create `path` exclusively (fail-if-exists, spec §4.3
    /// step 1) and, on success, writes the current process id into it and
    /// fsyncs before returning (step 2). Returns `Ok(false)` — not an
    /// error — when the file already exists, so the caller can fall
    /// through to the stale-owner check instead of treating contention as
    /// an I/O failure.
    fn create_exclusive(&self, path: &Path) -> Result<bool> {
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(Error::Io(e)),
        };
        file.write_all(std::process::id().to_string().as_bytes())?;
        file.sync_all()?;
        Ok(true)
    }

    fn is_alive(&self, pid: u32) -> bool {
        is_process_alive(pid)
    }

    /// Path the lock file for `scope`/`name` would live at, without
    /// acquiring it. Used by crash recovery (spec §4.1) to check whether
    /// a deployment's owning process is still alive.
    pub fn lock_path(&self, scope: &str, name: &str) -> PathBuf {
        self.locks_dir.join(scope).join(format!("{name}.lock"))
    }
}

fn read_owner(path: &Path) -> Result<Option<u32>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content.trim().parse::<u32>().ok()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

/// True iff a process with this pid currently exists.
pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
    system.process(Pid::from_u32(pid)).is_some()
}

/// Reads the owner pid recorded in the lock file at `path`, if any.
pub fn read_lock_owner(path: &Path) -> Result<Option<u32>> {
    read_owner(path)
}
