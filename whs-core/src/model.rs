//! Core data types shared by every component: tracker issues, projects, and
//! the canonical enumerations the workflow state machine is built from.

use std::fmt;

/// Status of a tracker issue (source issue or orchestrator-tracker record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl IssueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for IssueStatus {
    fn default() -> Self {
        Self::Open
    }
}

/// Type of a tracker issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueType {
    Task,
    Epic,
    Bug,
    Feature,
    Chore,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Epic => "epic",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Chore => "chore",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task" => Some(Self::Task),
            "epic" => Some(Self::Epic),
            "bug" => Some(Self::Bug),
            "feature" => Some(Self::Feature),
            "chore" => Some(Self::Chore),
            _ => None,
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for IssueType {
    fn default() -> Self {
        Self::Task
    }
}

/// CI status recorded on a workflow step awaiting a PR check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CiStatus {
    Pending,
    Passed,
    Failed,
}

impl CiStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Passed => "passed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Failed)
    }
}

impl fmt::Display for CiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Isolation mode a project runs its worktrees under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationMode {
    /// Agent commits land on the branch normally.
    Committed,
    /// Agent work is kept off the project's normal history until review.
    Stealth,
}

impl IsolationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Stealth => "stealth",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "committed" => Some(Self::Committed),
            "stealth" => Some(Self::Stealth),
            _ => None,
        }
    }
}

impl fmt::Display for IsolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tracker record: a source issue, a workflow epic, a workflow step, or a
/// question record. The core treats all four uniformly — the distinction is
/// carried entirely by `labels` and `issue_type` (§3, §4.2 labelling rules).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: u8,
    pub issue_type: IssueType,
    pub status: IssueStatus,
    pub labels: Vec<String>,
    pub dependencies: Vec<String>,
    pub parent: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Issue {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn label_with_prefix(&self, prefix: &str) -> Option<&str> {
        self.labels
            .iter()
            .find_map(|l| l.strip_prefix(prefix))
    }
}

/// A source repository the dispatcher scans for ready work (§3 Project).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub name: String,
    pub path: std::path::PathBuf,
    pub default_branch: String,
    pub isolation_mode: IsolationMode,
    pub roles_dir: std::path::PathBuf,
}

/// The terminal instruction an agent's hand-off names for `next_agent`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAgent {
    Role(String),
    Done,
    Blocked,
}

impl NextAgent {
    /// Roles the hand-off parser accepts as-is (§4.4).
    pub const KNOWN_ROLES: &'static [&'static str] = &[
        "implementation",
        "quality_review",
        "release_manager",
        "ux_specialist",
        "architect",
        "planner",
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DONE" => Some(Self::Done),
            "BLOCKED" => Some(Self::Blocked),
            role if Self::KNOWN_ROLES.contains(&role) => Some(Self::Role(role.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Role(r) => r,
            Self::Done => "DONE",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for NextAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed hand-off block (§3, §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub next_agent: NextAgent,
    pub pr_number: Option<u64>,
    pub ci_status: Option<CiStatus>,
    pub context: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_status_round_trips() {
        for s in [
            IssueStatus::Open,
            IssueStatus::InProgress,
            IssueStatus::Blocked,
            IssueStatus::Closed,
        ] {
            assert_eq!(IssueStatus::parse(&s.to_string()), Some(s));
        }
    }

    #[test]
    fn issue_type_round_trips() {
        for t in [
            IssueType::Task,
            IssueType::Epic,
            IssueType::Bug,
            IssueType::Feature,
            IssueType::Chore,
        ] {
            assert_eq!(IssueType::parse(&t.to_string()), Some(t));
        }
    }

    #[test]
    fn ci_status_round_trips_and_terminal() {
        assert!(!CiStatus::Pending.is_terminal());
        assert!(CiStatus::Passed.is_terminal());
        assert!(CiStatus::Failed.is_terminal());
        for c in [CiStatus::Pending, CiStatus::Passed, CiStatus::Failed] {
            assert_eq!(CiStatus::parse(&c.to_string()), Some(c));
        }
    }

    #[test]
    fn next_agent_known_role_parses() {
        assert_eq!(
            NextAgent::parse("implementation"),
            Some(NextAgent::Role("implementation".to_string()))
        );
        assert_eq!(NextAgent::parse("DONE"), Some(NextAgent::Done));
        assert_eq!(NextAgent::parse("BLOCKED"), Some(NextAgent::Blocked));
    }

    #[test]
    fn next_agent_unknown_role_rejected() {
        assert_eq!(NextAgent::parse("unknown_role"), None);
        assert_eq!(NextAgent::parse(""), None);
    }
}
