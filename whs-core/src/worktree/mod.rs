//! Worktree Adapter: isolates each running step in its own git worktree
//! (§5 "Each worktree is an exclusive resource for one worker at a time,
//! keyed by (project, sourceIssueId)", §6 "Worktree adapter").
//!
//! The reference codebase this design builds on isolates agent runs with
//! Docker containers instead; this adapter replaces that isolation boundary
//! with a worktree-per-step model while keeping the same CLI-shell-out port
//! shape used for the tracker.

pub mod cli;

use anyhow::Result;
use std::path::PathBuf;

/// The port the Dispatcher uses to manage per-step worktrees (§6).
pub trait WorktreeGateway {
    /// Create the worktree for `branch` off `base_branch` if it doesn't
    /// already exist, returning its absolute path.
    fn ensure(&self, project: &str, branch: &str, base_branch: &str) -> Result<PathBuf>;
    fn list(&self, project: &str) -> Result<Vec<PathBuf>>;
    fn remove(&self, project: &str, branch: &str, force: bool) -> Result<()>;
    fn get_main(&self, project: &str) -> Result<PathBuf>;
    fn has_uncommitted_changes(&self, project: &str, branch: &str) -> Result<bool>;
    fn is_integrated(&self, project: &str, branch: &str) -> Result<bool>;
}
