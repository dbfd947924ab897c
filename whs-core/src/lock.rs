//! Process lock for the dispatcher (§3 Lock, §4.5, §4.1 `Start()`).
//!
//! A PID-stamped file at `<config_dir>/dispatcher.lock`. Stale locks (pid no
//! longer alive) are reclaimed automatically; a live lock makes `acquire`
//! fail with `AlreadyRunning` (§7, §8 E6).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DispatcherError;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockFile {
    pid: u32,
    #[serde(rename = "startedAt")]
    started_at: chrono::DateTime<chrono::Utc>,
}

/// RAII guard: holds the dispatcher lock file and removes it on drop so the
/// lock is released on every exit path, including panics (§4.5 invariants).
pub struct DispatcherLock {
    path: PathBuf,
}

impl DispatcherLock {
    /// Acquire the lock at `path`.
    ///
    /// - No file present: write our pid, succeed.
    /// - File present, pid not alive: remove it and retry (stale reclaim).
    /// - File present, pid alive: fail with `AlreadyRunning`.
    pub fn acquire(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Ok(contents) = fs::read_to_string(path) {
            if let Ok(existing) = serde_json::from_str::<LockFile>(&contents) {
                if is_pid_alive(existing.pid) {
                    return Err(DispatcherError::already_running(existing.pid).into());
                }
                // Stale: the recorded pid is dead. Reclaim below.
                let _ = fs::remove_file(path);
            }
        }

        let lock = LockFile {
            pid: std::process::id(),
            started_at: chrono::Utc::now(),
        };
        fs::write(path, serde_json::to_string(&lock)?)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Read the lock file without acquiring it, for `status`/diagnostics.
    pub fn peek(path: &Path) -> Option<(u32, chrono::DateTime<chrono::Utc>)> {
        let contents = fs::read_to_string(path).ok()?;
        let lock: LockFile = serde_json::from_str(&contents).ok()?;
        Some((lock.pid, lock.started_at))
    }

    pub fn release(self) {
        drop(self);
    }
}

impl Drop for DispatcherLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn is_pid_alive(pid: u32) -> bool {
    // SAFETY: kill(pid, 0) only probes for existence; it never sends a signal.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[cfg(not(unix))]
fn is_pid_alive(_pid: u32) -> bool {
    false
}
