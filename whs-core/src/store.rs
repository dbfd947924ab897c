//! State Store: persists `DispatcherState` to `state.json` (§4.5).
//!
//! Writes go through a temp-file-then-rename so a reader never observes a
//! partial file — POSIX `rename(2)` within one directory is atomic.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use crate::state::DispatcherState;

fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut f = fs::File::create(&tmp)?;
    f.write_all(content.as_bytes())?;
    f.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Filesystem-backed `state.json` store.
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load persisted state, or an empty state if the file is absent,
    /// unparseable, or a schema mismatch (§4.5, §8 boundary behaviors).
    pub fn load(&self) -> DispatcherState {
        match fs::read_to_string(&self.path) {
            Ok(json) => DispatcherState::load_or_empty(&json),
            Err(_) => DispatcherState::empty(),
        }
    }

    /// Persist `state` atomically. Called after every Active-Work mutation
    /// (§4.5 invariants, §5 ordering guarantees).
    pub fn save(&self, state: &DispatcherState) -> Result<()> {
        let json = serde_json::to_string_pretty(state).context("serializing dispatcher state")?;
        atomic_write(&self.path, &json).context("writing state.json")
    }
}
