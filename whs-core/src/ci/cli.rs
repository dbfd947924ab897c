//! CLI-backed `CiGateway`: shells out to the configured worktree binary's
//! host forge CLI (e.g. `gh pr checks`), parsing a single status word.

use anyhow::{Context, Result};
use std::process::{Command, Stdio};

use super::CiGateway;
use crate::model::CiStatus;

pub struct CliCiGateway {
    binary: String,
}

impl CliCiGateway {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl CiGateway for CliCiGateway {
    fn check_status(&self, project: &str, pr: u64) -> Result<CiStatus> {
        let pr_arg = pr.to_string();
        let out = Command::new(&self.binary)
            .args(["ci-status", project, &pr_arg])
            .stderr(Stdio::piped())
            .output()
            .with_context(|| format!("failed to run: {} ci-status {project} {pr}", self.binary))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            anyhow::bail!("{} ci-status {project} {pr} failed: {stderr}", self.binary);
        }
        let word = String::from_utf8_lossy(&out.stdout).trim().to_string();
        CiStatus::parse(&word)
            .with_context(|| format!("unrecognized CI status {word:?} from {}", self.binary))
    }
}
