//! Tracker Adapter: the port the Workflow Service and Dispatcher use to read
//! and mutate issues in the orchestrator tracker (§4.2 labelling rules, §6
//! "Tracker adapter — invoked operations").
//!
//! Generic over whatever tracker binary is configured — no GitHub-specific
//! type ever crosses this trait.

pub mod cli;

use anyhow::Result;

use crate::model::{Issue, IssueStatus, IssueType};

/// Filters accepted by `list_ready` (§6).
#[derive(Debug, Clone, Default)]
pub struct ReadyFilter {
    pub issue_type: Option<IssueType>,
    pub priority_min: Option<u8>,
    pub priority_max: Option<u8>,
    pub label_any: Vec<String>,
    pub label_all: Vec<String>,
    pub label_none: Vec<String>,
    pub parent: Option<String>,
    pub status: Option<IssueStatus>,
}

/// Fields accepted by `create` (§6).
#[derive(Debug, Clone, Default)]
pub struct NewIssue {
    pub title: String,
    pub issue_type: IssueType,
    pub priority: u8,
    pub parent: Option<String>,
    pub labels: Vec<String>,
    pub description: String,
}

/// Fields accepted by `update` (§6); `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<IssueStatus>,
    pub priority: Option<u8>,
    pub label_add: Vec<String>,
    pub label_remove: Vec<String>,
}

/// Result of `daemon status` (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonStatus {
    Running,
    Stopped,
}

/// The port the core depends on for every tracker operation (§6). Concrete
/// adapters shell out to a configured external binary; tests use an
/// in-memory fake.
pub trait TrackerGateway {
    fn list_ready(&self, filter: &ReadyFilter) -> Result<Vec<Issue>>;
    fn list(&self, filter: &ReadyFilter) -> Result<Vec<Issue>>;
    fn show(&self, id: &str) -> Result<Issue>;
    fn create(&self, issue: &NewIssue) -> Result<Issue>;
    fn update(&self, id: &str, update: &IssueUpdate) -> Result<()>;
    fn close(&self, id: &str, reason: &str) -> Result<()>;
    fn comment(&self, id: &str, text: &str) -> Result<()>;
    fn add_dep(&self, child: &str, parent: &str) -> Result<()>;
    fn remove_dep(&self, child: &str, parent: &str) -> Result<()>;
    fn init(&self, stealth: bool, prefix: Option<&str>) -> Result<()>;
    fn config_get(&self, key: &str) -> Result<Option<String>>;
    fn config_set(&self, key: &str, value: &str) -> Result<()>;
    fn daemon_start(&self) -> Result<()>;
    fn daemon_stop(&self) -> Result<()>;
    fn daemon_status(&self) -> Result<DaemonStatus>;
    fn is_initialized(&self) -> Result<bool>;
}
