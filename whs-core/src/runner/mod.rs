//! Agent Runner (§4.3): launches the external coding assistant, normalizes
//! its streaming output into an `Event` vocabulary, and aggregates one
//! `RunResult` per run.
//!
//! Two implementations share this contract: a subscription runner that
//! forks a local CLI (`subprocess`), and an API runner driving an SDK. Only
//! the subprocess runner is shipped here; the trait is the seam a future API
//! runner plugs into.

pub mod subprocess;

use std::path::PathBuf;

use crate::safety;

/// Everything the runner needs to start one agent turn (§4.3 "Run options").
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub agent_role_file: Option<PathBuf>,
    pub append_system_prompt: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub resume_session_id: Option<String>,
    pub max_turns: Option<u32>,
    pub log_sink: Option<PathBuf>,
}

/// One clarifying question raised by the assistant via `AskUserQuestion`.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingQuestionOption {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingQuestion {
    pub question: String,
    pub options: Vec<PendingQuestionOption>,
    pub multi_select: bool,
}

/// A single normalized stream event (§4.3 "Event vocabulary").
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Init {
        session_id: String,
    },
    Text {
        chunk: String,
    },
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    Result {
        cost: f64,
        turns: u32,
        success: bool,
        errors: Vec<String>,
    },
}

/// The aggregate returned to the dispatcher after one run (§4.3 "Result shape").
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunResult {
    pub session_id: Option<String>,
    pub transcript: String,
    pub cost: f64,
    pub turns: u32,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub is_auth_error: bool,
    pub pending_question: Option<PendingQuestion>,
}

/// Runs one agent turn to completion, or until cancelled.
pub trait AgentRunner {
    fn run(&self, opts: &RunOptions, cancel: &std::sync::atomic::AtomicBool) -> anyhow::Result<RunResult>;
}

/// Patterns that mark a run as an authentication failure rather than a task
/// failure, matched against the transcript tail and any top-level error
/// string (§4.3 "isAuthError is derived from matching auth-error patterns").
const AUTH_ERROR_PATTERNS: &[&str] = &[
    "authentication",
    "not authenticated",
    "invalid api key",
    "invalid_api_key",
    "unauthorized",
    "401",
    "please run",
    "setup-token",
];

pub(crate) fn looks_like_auth_error(transcript_tail: &str, error: Option<&str>) -> bool {
    let haystacks = [Some(transcript_tail), error];
    haystacks.into_iter().flatten().any(|s| {
        let lower = s.to_lowercase();
        AUTH_ERROR_PATTERNS.iter().any(|p| lower.contains(p))
    })
}

/// The special tool whose use the runner intercepts instead of executing,
/// turning it into a `pendingQuestion` on the final result (§4.3).
pub(crate) const ASK_USER_QUESTION_TOOL: &str = "AskUserQuestion";

pub(crate) fn parse_pending_question(input: &serde_json::Value) -> Option<PendingQuestion> {
    let question = input.get("question")?.as_str()?.to_string();
    let options = input
        .get("options")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|o| {
                    o.get("label")
                        .and_then(|l| l.as_str())
                        .map(|label| PendingQuestionOption {
                            label: label.to_string(),
                        })
                })
                .collect()
        })
        .unwrap_or_default();
    let multi_select = input
        .get("multiSelect")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    Some(PendingQuestion {
        question,
        options,
        multi_select,
    })
}

/// Apply the Safety Filter to a `toolUse` event before it reaches the shell
/// (§4.3 "Safety enforcement"). Returns a deny verdict the assistant is told
/// about rather than letting the call through.
pub(crate) fn check_tool_use(worktree: &std::path::Path, name: &str, input: &serde_json::Value) -> safety::Verdict {
    if name == "Bash" || name == "bash" {
        if let Some(command) = input.get("command").and_then(|v| v.as_str()) {
            let verdict = safety::check_command(command);
            if !verdict.is_allowed() {
                return verdict;
            }
            if let Some(target) = safety::extract_cd_target(command) {
                let verdict = safety::check_path_within_worktree(worktree, std::path::Path::new(target));
                if !verdict.is_allowed() {
                    return verdict;
                }
            }
        }
        return safety::Verdict::Allow;
    }

    for key in ["file_path", "path", "notebook_path"] {
        if let Some(p) = input.get(key).and_then(|v| v.as_str()) {
            let verdict = safety::check_path_within_worktree(worktree, std::path::Path::new(p));
            if !verdict.is_allowed() {
                return verdict;
            }
        }
    }
    safety::Verdict::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_error_patterns_match_common_phrasings() {
        assert!(looks_like_auth_error("Error: not authenticated", None));
        assert!(looks_like_auth_error("", Some("401 Unauthorized")));
        assert!(looks_like_auth_error("please run claude setup-token", None));
        assert!(!looks_like_auth_error("compiled successfully", Some("2 tests failed")));
    }

    #[test]
    fn parse_pending_question_extracts_options() {
        let input = serde_json::json!({
            "question": "JWT or sessions?",
            "options": [{"label": "JWT"}, {"label": "sessions"}],
            "multiSelect": false,
        });
        let q = parse_pending_question(&input).unwrap();
        assert_eq!(q.question, "JWT or sessions?");
        assert_eq!(q.options.len(), 2);
        assert_eq!(q.options[0].label, "JWT");
        assert!(!q.multi_select);
    }

    #[test]
    fn parse_pending_question_missing_question_returns_none() {
        let input = serde_json::json!({"options": []});
        assert!(parse_pending_question(&input).is_none());
    }

    #[test]
    fn check_tool_use_denies_dangerous_bash_command() {
        let worktree = std::path::Path::new("/work/acme");
        let input = serde_json::json!({"command": "rm -rf /"});
        assert!(!check_tool_use(worktree, "Bash", &input).is_allowed());
    }

    #[test]
    fn check_tool_use_denies_bash_cd_outside_worktree() {
        let worktree = std::path::Path::new("/work/acme");
        let input = serde_json::json!({"command": "cd ../../etc && ls"});
        assert!(!check_tool_use(worktree, "Bash", &input).is_allowed());
    }

    #[test]
    fn check_tool_use_denies_file_write_outside_worktree() {
        let worktree = std::path::Path::new("/work/acme");
        let input = serde_json::json!({"file_path": "/etc/passwd"});
        assert!(!check_tool_use(worktree, "Write", &input).is_allowed());
    }

    #[test]
    fn check_tool_use_allows_normal_edits() {
        let worktree = std::path::Path::new("/work/acme");
        let input = serde_json::json!({"file_path": "src/main.rs"});
        assert!(check_tool_use(worktree, "Edit", &input).is_allowed());
        let input = serde_json::json!({"command": "cargo test"});
        assert!(check_tool_use(worktree, "Bash", &input).is_allowed());
    }
}
