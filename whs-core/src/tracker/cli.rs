//! CLI-backed `TrackerGateway`: shells out to the configured tracker binary.
//!
//! Arguments are passed via `Command::args`, never through a shell, so issue
//! titles and descriptions containing quotes or `&&` can never be
//! reinterpreted (§6 "Arguments are passed without shell interpretation").

use anyhow::{Context, Result};
use std::io::Write as _;
use std::process::{Command, Stdio};

use crate::model::{Issue, IssueStatus, IssueType};

use super::{DaemonStatus, IssueUpdate, NewIssue, ReadyFilter, TrackerGateway};

pub struct CliTrackerGateway {
    binary: String,
}

impl CliTrackerGateway {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn output(&self, args: &[String]) -> Result<String> {
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

    /// Like `output`, but pipes `body` on stdin instead of an argv entry, for
    /// descriptions/comments large enough to risk argv limits (§6 "large
    /// text bodies are streamed via standard input where the binary
    /// supports it").
    fn output_with_stdin(&self, args: &[String], body: &str) -> Result<String> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to run: {} {}", self.binary, args.join(" ")))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(body.as_bytes())?;
        }
        let out = child.wait_with_output()?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            anyhow::bail!("{} {} failed: {stderr}", self.binary, args.join(" "));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    fn status(&self, args: &[String]) -> bool {
        Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn parse_issue(value: &serde_json::Value) -> Result<Issue> {
        let id = value["id"].as_str().context("issue missing id")?.to_string();
        let title = value["title"].as_str().unwrap_or_default().to_string();
        let description = value["description"].as_str().unwrap_or_default().to_string();
        let priority = value["priority"].as_u64().unwrap_or(0) as u8;
        let issue_type = value["type"]
            .as_str()
            .and_then(IssueType::parse)
            .unwrap_or(IssueType::Task);
        let status = value["status"]
            .as_str()
            .and_then(IssueStatus::parse)
            .unwrap_or(IssueStatus::Open);
        let labels = value["labels"]
            .as_array()
            .map(|a| a.iter().filter_map(|l| l.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let dependencies = value["dependencies"]
            .as_array()
            .map(|a| a.iter().filter_map(|d| d.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let parent = value["parent"].as_str().map(str::to_string);
        let created_at = value["createdAt"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        let updated_at = value["updatedAt"]
            .as_str()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or(created_at);

        Ok(Issue {
            id,
            title,
            description,
            priority,
            issue_type,
            status,
            labels,
            dependencies,
            parent,
            created_at,
            updated_at,
        })
    }

    fn filter_args(filter: &ReadyFilter) -> Vec<String> {
        let mut args = vec!["--json".to_string()];
        if let Some(t) = filter.issue_type {
            args.push(format!("--type={}", t.as_str()));
        }
        if let Some(p) = filter.priority_min {
            args.push(format!("--priority-min={p}"));
        }
        if let Some(p) = filter.priority_max {
            args.push(format!("--priority-max={p}"));
        }
        if !filter.label_any.is_empty() {
            args.push(format!("--label-any={}", filter.label_any.join(",")));
        }
        if !filter.label_all.is_empty() {
            args.push(format!("--label-all={}", filter.label_all.join(",")));
        }
        if !filter.label_none.is_empty() {
            args.push(format!("--label-none={}", filter.label_none.join(",")));
        }
        if let Some(parent) = &filter.parent {
            args.push(format!("--parent={parent}"));
        }
        if let Some(status) = filter.status {
            args.push(format!("--status={}", status.as_str()));
        }
        args
    }
}

impl TrackerGateway for CliTrackerGateway {
    fn list_ready(&self, filter: &ReadyFilter) -> Result<Vec<Issue>> {
        let mut args = vec!["list-ready".to_string()];
        args.extend(Self::filter_args(filter));
        let out = self.output(&args)?;
        let values: Vec<serde_json::Value> = serde_json::from_str(&out).context("parsing list-ready output")?;
        values.iter().map(Self::parse_issue).collect()
    }

    fn list(&self, filter: &ReadyFilter) -> Result<Vec<Issue>> {
        let mut args = vec!["list".to_string()];
        args.extend(Self::filter_args(filter));
        let out = self.output(&args)?;
        let values: Vec<serde_json::Value> = serde_json::from_str(&out).context("parsing list output")?;
        values.iter().map(Self::parse_issue).collect()
    }

    fn show(&self, id: &str) -> Result<Issue> {
        let out = self.output(&["show".to_string(), id.to_string(), "--json".to_string()])?;
        let value: serde_json::Value = serde_json::from_str(&out).context("parsing show output")?;
        Self::parse_issue(&value)
    }

    fn create(&self, issue: &NewIssue) -> Result<Issue> {
        let mut args = vec![
            "create".to_string(),
            "--title".to_string(),
            issue.title.clone(),
            "--type".to_string(),
            issue.issue_type.as_str().to_string(),
            "--priority".to_string(),
            issue.priority.to_string(),
            "--json".to_string(),
        ];
        if let Some(parent) = &issue.parent {
            args.push("--parent".to_string());
            args.push(parent.clone());
        }
        for label in &issue.labels {
            args.push("--label".to_string());
            args.push(label.clone());
        }
        args.push("--description-stdin".to_string());
        let out = self.output_with_stdin(&args, &issue.description)?;
        let value: serde_json::Value = serde_json::from_str(&out).context("parsing create output")?;
        Self::parse_issue(&value)
    }

    fn update(&self, id: &str, update: &IssueUpdate) -> Result<()> {
        let mut args = vec!["update".to_string(), id.to_string()];
        if let Some(title) = &update.title {
            args.push("--title".to_string());
            args.push(title.clone());
        }
        if let Some(status) = update.status {
            args.push("--status".to_string());
            args.push(status.as_str().to_string());
        }
        if let Some(priority) = update.priority {
            args.push("--priority".to_string());
            args.push(priority.to_string());
        }
        for label in &update.label_add {
            args.push("--add-label".to_string());
            args.push(label.clone());
        }
        for label in &update.label_remove {
            args.push("--remove-label".to_string());
            args.push(label.clone());
        }
        if let Some(description) = &update.description {
            args.push("--description-stdin".to_string());
            self.output_with_stdin(&args, description)?;
        } else {
            self.output(&args)?;
        }
        Ok(())
    }

    fn close(&self, id: &str, reason: &str) -> Result<()> {
        self.output(&[
            "close".to_string(),
            id.to_string(),
            "--reason".to_string(),
            reason.to_string(),
        ])?;
        Ok(())
    }

    fn comment(&self, id: &str, text: &str) -> Result<()> {
        self.output_with_stdin(&["comment".to_string(), id.to_string(), "--stdin".to_string()], text)?;
        Ok(())
    }

    fn add_dep(&self, child: &str, parent: &str) -> Result<()> {
        self.output(&[
            "dep".to_string(),
            "add".to_string(),
            child.to_string(),
            parent.to_string(),
        ])?;
        Ok(())
    }

    fn remove_dep(&self, child: &str, parent: &str) -> Result<()> {
        self.output(&[
            "dep".to_string(),
            "remove".to_string(),
            child.to_string(),
            parent.to_string(),
        ])?;
        Ok(())
    }

    fn init(&self, stealth: bool, prefix: Option<&str>) -> Result<()> {
        let mut args = vec!["init".to_string()];
        if stealth {
            args.push("--stealth".to_string());
        }
        if let Some(prefix) = prefix {
            args.push("--prefix".to_string());
            args.push(prefix.to_string());
        }
        self.output(&args)?;
        Ok(())
    }

    fn config_get(&self, key: &str) -> Result<Option<String>> {
        let out = self.output(&["config".to_string(), "get".to_string(), key.to_string()])?;
        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    fn config_set(&self, key: &str, value: &str) -> Result<()> {
        self.output(&[
            "config".to_string(),
            "set".to_string(),
            key.to_string(),
            value.to_string(),
        ])?;
        Ok(())
    }

    fn daemon_start(&self) -> Result<()> {
        self.output(&["daemon".to_string(), "start".to_string()])?;
        Ok(())
    }

    fn daemon_stop(&self) -> Result<()> {
        self.output(&["daemon".to_string(), "stop".to_string()])?;
        Ok(())
    }

    fn daemon_status(&self) -> Result<DaemonStatus> {
        let out = self.output(&["daemon".to_string(), "status".to_string()])?;
        if out.trim() == "running" {
            Ok(DaemonStatus::Running)
        } else {
            Ok(DaemonStatus::Stopped)
        }
    }

    fn is_initialized(&self) -> Result<bool> {
        Ok(self.status(&["is-initialized".to_string()]))
    }
}
