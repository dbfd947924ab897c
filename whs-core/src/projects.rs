//! Project registry (§6 `add`/`remove`/`list`): the set of source
//! repositories the dispatcher scans for ready work, persisted at
//! `<config_dir>/projects.json`.
//!
//! One registered project per tracked repository, looked up by name when the
//! Dispatcher resolves a step's worktree and tracker labels.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::{IsolationMode, Project};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectRecord {
    name: String,
    path: PathBuf,
    #[serde(rename = "defaultBranch")]
    default_branch: String,
    #[serde(rename = "isolationMode")]
    isolation_mode: String,
    #[serde(rename = "rolesDir")]
    roles_dir: PathBuf,
}

impl ProjectRecord {
    fn from_project(p: &Project) -> Self {
        Self {
            name: p.name.clone(),
            path: p.path.clone(),
            default_branch: p.default_branch.clone(),
            isolation_mode: p.isolation_mode.as_str().to_string(),
            roles_dir: p.roles_dir.clone(),
        }
    }

    fn into_project(self) -> Project {
        let isolation_mode = match self.isolation_mode.as_str() {
            "stealth" => IsolationMode::Stealth,
            _ => IsolationMode::Committed,
        };
        Project {
            name: self.name,
            path: self.path,
            default_branch: self.default_branch,
            isolation_mode,
            roles_dir: self.roles_dir,
        }
    }
}

/// Registered-project store backed by a single JSON file.
pub struct ProjectRegistry {
    path: PathBuf,
}

impl ProjectRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn read(&self) -> Result<Vec<ProjectRecord>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let records: Vec<ProjectRecord> = serde_json::from_str(&contents)
                    .with_context(|| format!("failed to parse {}", self.path.display()))?;
                Ok(records)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.path.display())),
        }
    }

    fn write(&self, records: &[ProjectRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(records)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    pub fn list(&self) -> Result<Vec<Project>> {
        Ok(self.read()?.into_iter().map(ProjectRecord::into_project).collect())
    }

    /// Register a new project by name. Fails if the name is already taken —
    /// the same duplicate-rejection the reference registry enforces.
    pub fn add(&self, project: Project) -> Result<()> {
        let mut records = self.read()?;
        if records.iter().any(|r| r.name == project.name) {
            anyhow::bail!("project '{}' is already registered", project.name);
        }
        records.push(ProjectRecord::from_project(&project));
        self.write(&records)
    }

    /// Remove a project by name. Fails if no project with that name exists.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut records = self.read()?;
        let before = records.len();
        records.retain(|r| r.name != name);
        if records.len() == before {
            anyhow::bail!("no project named '{}' is registered", name);
        }
        self.write(&records)
    }

    pub fn get(&self, name: &str) -> Result<Option<Project>> {
        Ok(self
            .read()?
            .into_iter()
            .find(|r| r.name == name)
            .map(ProjectRecord::into_project))
    }
}

/// Infer a project name from a filesystem path: its final component.
pub fn name_from_path(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
        .with_context(|| format!("cannot infer a project name from {}", path.display()))
}
