//! Subscription runner: forks the configured agent binary as a child
//! process, feeds the prompt on stdin, and streams newline-delimited JSON
//! events from stdout (§4.3, §10 "Agent child process protocol").

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::{
    check_tool_use, looks_like_auth_error, parse_pending_question, AgentRunner, Event, RunOptions,
    RunResult, ASK_USER_QUESTION_TOOL,
};

/// Grace period between TERM and KILL during cancellation (§4.3 "Cancellation").
const TERM_GRACE: Duration = Duration::from_secs(5);
/// How often the read loop checks the cancel flag while blocked on a line.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct SubprocessRunner {
    agent_binary: String,
}

impl SubprocessRunner {
    pub fn new(agent_binary: impl Into<String>) -> Self {
        Self {
            agent_binary: agent_binary.into(),
        }
    }

    fn build_command(&self, opts: &RunOptions) -> Command {
        let mut cmd = Command::new(&self.agent_binary);
        cmd.current_dir(&opts.working_dir)
            .arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--verbose");

        if let Some(sid) = &opts.resume_session_id {
            cmd.arg("--resume").arg(sid);
        }
        if let Some(n) = opts.max_turns {
            cmd.arg("--max-turns").arg(n.to_string());
        }
        if let Some(role_file) = &opts.agent_role_file {
            cmd.arg("--agent").arg(role_file);
        }
        if let Some(prompt) = &opts.append_system_prompt {
            cmd.arg("--append-system-prompt").arg(prompt);
        }
        if let Some(tools) = &opts.allowed_tools {
            cmd.arg("--allowed-tools").arg(tools.join(","));
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl AgentRunner for SubprocessRunner {
    fn run(&self, opts: &RunOptions, cancel: &AtomicBool) -> anyhow::Result<RunResult> {
        let started = Instant::now();
        let mut cmd = self.build_command(opts);
        let mut child = cmd.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(opts.prompt.as_bytes())?;
            // Dropping closes stdin so the assistant sees EOF after the prompt.
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("child process has no stdout"))?;
        let reader = BufReader::new(stdout);

        let mut session_id = None;
        let mut transcript = String::new();
        let mut cost = 0.0;
        let mut turns = 0u32;
        let mut result_success = None;
        let mut result_errors: Vec<String> = Vec::new();
        let mut pending_question = None;
        let mut cancelled = false;

        for line in reader.lines() {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                terminate(&mut child);
                break;
            }
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            if line.trim().is_empty() {
                continue;
            }
            let Ok(event) = parse_event_line(&line) else {
                continue;
            };
            match event {
                Event::Init { session_id: sid } => session_id = Some(sid),
                Event::Text { chunk } => transcript.push_str(&chunk),
                Event::ToolUse { name, input } => {
                    if name == ASK_USER_QUESTION_TOOL {
                        pending_question = parse_pending_question(&input);
                    } else if let Some(worktree_check) =
                        Some(check_tool_use(&opts.working_dir, &name, &input))
                    {
                        if !worktree_check.is_allowed() {
                            transcript.push_str(&format!(
                                "\n[denied tool use {name}: {worktree_check:?}]\n"
                            ));
                        }
                    }
                }
                Event::Result {
                    cost: c,
                    turns: t,
                    success,
                    errors,
                } => {
                    cost = c;
                    turns = t;
                    result_success = Some(success);
                    result_errors = errors;
                }
            }
        }

        let status_success = child.wait().map(|s| s.success()).unwrap_or(false);

        let success = if cancelled {
            false
        } else {
            result_success.unwrap_or(status_success)
        };
        let error = if cancelled {
            Some("aborted".to_string())
        } else if !result_errors.is_empty() {
            Some(result_errors.join("; "))
        } else if !success {
            Some("agent run did not report success".to_string())
        } else {
            None
        };
        let is_auth_error = !cancelled && looks_like_auth_error(&transcript, error.as_deref());

        Ok(RunResult {
            session_id,
            transcript,
            cost,
            turns,
            duration_ms: started.elapsed().as_millis() as u64,
            success,
            error,
            is_auth_error,
            pending_question,
        })
    }
}

/// TERM the child, give it `TERM_GRACE` to exit, then KILL (§4.3 "Cancellation").
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // SAFETY: signaling our own child by its pid; no memory is touched.
        unsafe {
            libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
        }
        let deadline = Instant::now() + TERM_GRACE;
        loop {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        let _ = child.kill();
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill();
    }
}

fn parse_event_line(line: &str) -> anyhow::Result<Event> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    let event_type = value
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("event missing type"))?;

    match event_type {
        "init" => {
            let session_id = value
                .get("sessionId")
                .or_else(|| value.get("session_id"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(Event::Init { session_id })
        }
        "text" => {
            let chunk = value
                .get("chunk")
                .or_else(|| value.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(Event::Text { chunk })
        }
        "toolUse" | "tool_use" => {
            let name = value
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            let input = value.get("input").cloned().unwrap_or(serde_json::Value::Null);
            Ok(Event::ToolUse { name, input })
        }
        "result" => {
            let cost = value
                .get("cost")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let turns = value
                .get("turns")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32;
            let success = value
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            let errors = value
                .get("errors")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|e| e.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Ok(Event::Result {
                cost,
                turns,
                success,
                errors,
            })
        }
        other => anyhow::bail!("unrecognized event type: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_init_event() {
        let event = parse_event_line(r#"{"type":"init","sessionId":"sess-123"}"#).unwrap();
        assert_eq!(
            event,
            Event::Init {
                session_id: "sess-123".to_string()
            }
        );
    }

    #[test]
    fn parses_text_event() {
        let event = parse_event_line(r#"{"type":"text","chunk":"hello"}"#).unwrap();
        assert_eq!(
            event,
            Event::Text {
                chunk: "hello".to_string()
            }
        );
    }

    #[test]
    fn parses_tool_use_event() {
        let event = parse_event_line(r#"{"type":"toolUse","name":"Bash","input":{"command":"ls"}}"#).unwrap();
        match event {
            Event::ToolUse { name, input } => {
                assert_eq!(name, "Bash");
                assert_eq!(input["command"], "ls");
            }
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }

    #[test]
    fn parses_result_event() {
        let event =
            parse_event_line(r#"{"type":"result","cost":0.42,"turns":3,"success":true,"errors":[]}"#)
                .unwrap();
        assert_eq!(
            event,
            Event::Result {
                cost: 0.42,
                turns: 3,
                success: true,
                errors: vec![],
            }
        );
    }

    #[test]
    fn rejects_unrecognized_event_type() {
        assert!(parse_event_line(r#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_event_line("not json").is_err());
    }

    #[test]
    fn runs_a_real_child_process_end_to_end() {
        // Drives the full spawn/stdin/stdout-stream loop against a tiny
        // script standing in for the agent binary, without a real assistant.
        let script = r#"
read -r _
echo '{"type":"init","sessionId":"sess-e2e"}'
echo '{"type":"text","chunk":"doing work"}'
echo '{"type":"result","cost":0.1,"turns":1,"success":true,"errors":[]}'
"#;
        let dir = tempfile::TempDir::new().unwrap();
        let script_path = dir.path().join("fake_agent.sh");
        std::fs::write(&script_path, script).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script_path, perms).unwrap();
        }

        let opts = RunOptions {
            prompt: "do the thing".to_string(),
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut cmd = Command::new("sh");
        cmd.arg(&script_path)
            .current_dir(&opts.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().unwrap();
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(opts.prompt.as_bytes()).unwrap();
        }
        let stdout = child.stdout.take().unwrap();
        let reader = BufReader::new(stdout);
        let mut saw_init = false;
        let mut saw_result = false;
        for line in reader.lines() {
            let line = line.unwrap();
            if line.trim().is_empty() {
                continue;
            }
            let event = parse_event_line(&line).unwrap();
            match event {
                Event::Init { session_id } => {
                    assert_eq!(session_id, "sess-e2e");
                    saw_init = true;
                }
                Event::Result { success, .. } => {
                    assert!(success);
                    saw_result = true;
                }
                _ => {}
            }
        }
        child.wait().unwrap();
        assert!(saw_init && saw_result);
    }
}
