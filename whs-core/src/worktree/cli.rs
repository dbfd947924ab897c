//! CLI-backed `WorktreeGateway`: shells out to the configured worktree binary.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::{Command, Stdio};

use super::WorktreeGateway;

pub struct CliWorktreeGateway {
    binary: String,
}

impl CliWorktreeGateway {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn output(&self, args: &[&str]) -> Result<String> {
        let out = Command::new(&self.binary)
            .args(args)
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("failed to run: {} {}", self.binary, args.join(" ")))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            anyhow::bail!("{} {} failed: {stderr}", self.binary, args.join(" "));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn status(&self, args: &[&str]) -> bool {
        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl WorktreeGateway for CliWorktreeGateway {
    fn ensure(&self, project: &str, branch: &str, base_branch: &str) -> Result<PathBuf> {
        let out = self.output(&["ensure", project, branch, "--base", base_branch])?;
        Ok(PathBuf::from(out))
    }

    fn list(&self, project: &str) -> Result<Vec<PathBuf>> {
        let out = self.output(&["list", project])?;
        Ok(out.lines().map(PathBuf::from).collect())
    }

    fn remove(&self, project: &str, branch: &str, force: bool) -> Result<()> {
        let mut args = vec!["remove", project, branch];
        if force {
            args.push("--force");
        }
        self.output(&args)?;
        Ok(())
    }

    fn get_main(&self, project: &str) -> Result<PathBuf> {
        let out = self.output(&["main", project])?;
        Ok(PathBuf::from(out))
    }

    fn has_uncommitted_changes(&self, project: &str, branch: &str) -> Result<bool> {
        Ok(self.status(&["is-dirty", project, branch]))
    }

    fn is_integrated(&self, project: &str, branch: &str) -> Result<bool> {
        Ok(self.status(&["is-integrated", project, branch]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonexistent_binary_surfaces_as_error_not_panic() {
        let gateway = CliWorktreeGateway::new("definitely-not-a-real-worktree-binary");
        assert!(gateway.ensure("acme", "step-1", "main").is_err());
    }

    #[test]
    fn nonexistent_binary_status_checks_default_to_false() {
        let gateway = CliWorktreeGateway::new("definitely-not-a-real-worktree-binary");
        assert!(!gateway.has_uncommitted_changes("acme", "step-1").unwrap());
        assert!(!gateway.is_integrated("acme", "step-1").unwrap());
    }
}
