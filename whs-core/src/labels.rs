//! The tracker label vocabulary (§4.2 labelling rules) treated as the
//! workflow state machine's de-facto schema (§9). Every label the core
//! reads or writes goes through here so the vocabulary stays bit-for-bit
//! stable — nothing else in the crate should format or parse a label string
//! by hand.

use base64::Engine;

pub const WHS_STEP: &str = "whs:step";
pub const WHS_WORKFLOW: &str = "whs:workflow";
pub const WHS_QUESTION: &str = "whs:question";
pub const BLOCKED_HUMAN: &str = "blocked:human";

pub fn agent(role: &str) -> String {
    format!("agent:{role}")
}

pub fn parse_agent(label: &str) -> Option<&str> {
    label.strip_prefix("agent:")
}

pub fn project(name: &str) -> String {
    format!("project:{name}")
}

pub fn parse_project(label: &str) -> Option<&str> {
    label.strip_prefix("project:")
}

pub fn source(id: &str) -> String {
    format!("source:{id}")
}

pub fn parse_source(label: &str) -> Option<&str> {
    label.strip_prefix("source:")
}

pub fn pr(n: u64) -> String {
    format!("pr:{n}")
}

pub fn parse_pr(label: &str) -> Option<u64> {
    label.strip_prefix("pr:").and_then(|s| s.parse().ok())
}

pub fn ci(status: crate::model::CiStatus) -> String {
    format!("ci:{status}")
}

pub fn parse_ci(label: &str) -> Option<crate::model::CiStatus> {
    label.strip_prefix("ci:").and_then(crate::model::CiStatus::parse)
}

pub fn ci_retries(n: u32) -> String {
    format!("ci-retries:{n}")
}

pub fn parse_ci_retries(label: &str) -> Option<u32> {
    label.strip_prefix("ci-retries:").and_then(|s| s.parse().ok())
}

pub fn dispatch_attempts(n: u32) -> String {
    format!("dispatch-attempts:{n}")
}

pub fn parse_dispatch_attempts(label: &str) -> Option<u32> {
    label
        .strip_prefix("dispatch-attempts:")
        .and_then(|s| s.parse().ok())
}

pub fn errored(kind: &str) -> String {
    format!("errored:{kind}")
}

pub fn parse_errored(label: &str) -> Option<&str> {
    label.strip_prefix("errored:")
}

/// `{sessionId, answer, worktreePath}` base64-encoded into a single label so
/// the dispatcher can resume a paused agent turn after a question is
/// answered (§4.2 resume info).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResumeInfo {
    pub session_id: String,
    pub answer: String,
    pub worktree_path: String,
}

const RESUME_PREFIX: &str = "whs:resume:";

pub fn resume(info: &ResumeInfo) -> anyhow::Result<String> {
    let json = serde_json::to_vec(info)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(json);
    Ok(format!("{RESUME_PREFIX}{encoded}"))
}

pub fn parse_resume(label: &str) -> Option<ResumeInfo> {
    let encoded = label.strip_prefix(RESUME_PREFIX)?;
    let json = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .ok()?;
    serde_json::from_slice(&json).ok()
}

pub fn is_resume_label(label: &str) -> bool {
    label.starts_with(RESUME_PREFIX)
}
