//! Human notification channel (§7 "User-visible behavior", §6 via §7's four
//! events, §9/§10.5). Mirrors the reference codebase's lifecycle-hook
//! pattern: a discoverable executable script per event, fired with event
//! data as environment variables, non-blocking, silently skipped if the
//! script is missing or non-executable.

use std::path::PathBuf;
use std::process::Command;

use anyhow::Result;

/// One of the four events the human channel receives exactly one message
/// per (§7 "User-visible behavior").
#[derive(Debug, Clone)]
pub enum NotificationEvent {
    WorkflowCompleted {
        project: String,
        epic_id: String,
        source_id: String,
    },
    WorkflowBlocked {
        project: String,
        epic_id: String,
        source_id: String,
        reason: String,
    },
    AuthError {
        project: String,
        epic_id: String,
        source_id: String,
        detail: String,
    },
    QuestionRaised {
        project: String,
        epic_id: String,
        source_id: String,
        question_id: String,
    },
}

impl NotificationEvent {
    /// Hook script name for this event, analogous to `HookEvent::hook_name`.
    pub fn hook_name(&self) -> &'static str {
        match self {
            NotificationEvent::WorkflowCompleted { .. } => "on-workflow-completed",
            NotificationEvent::WorkflowBlocked { .. } => "on-workflow-blocked",
            NotificationEvent::AuthError { .. } => "on-auth-error",
            NotificationEvent::QuestionRaised { .. } => "on-question-raised",
        }
    }

    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        match self {
            NotificationEvent::WorkflowCompleted {
                project,
                epic_id,
                source_id,
            } => vec![
                ("WHS_EVENT", "workflow.completed".to_string()),
                ("WHS_PROJECT", project.clone()),
                ("WHS_EPIC_ID", epic_id.clone()),
                ("WHS_SOURCE_ID", source_id.clone()),
            ],
            NotificationEvent::WorkflowBlocked {
                project,
                epic_id,
                source_id,
                reason,
            } => vec![
                ("WHS_EVENT", "workflow.blocked".to_string()),
                ("WHS_PROJECT", project.clone()),
                ("WHS_EPIC_ID", epic_id.clone()),
                ("WHS_SOURCE_ID", source_id.clone()),
                ("WHS_REASON", reason.clone()),
            ],
            NotificationEvent::AuthError {
                project,
                epic_id,
                source_id,
                detail,
            } => vec![
                ("WHS_EVENT", "auth.error".to_string()),
                ("WHS_PROJECT", project.clone()),
                ("WHS_EPIC_ID", epic_id.clone()),
                ("WHS_SOURCE_ID", source_id.clone()),
                ("WHS_DETAIL", detail.clone()),
            ],
            NotificationEvent::QuestionRaised {
                project,
                epic_id,
                source_id,
                question_id,
            } => vec![
                ("WHS_EVENT", "question.raised".to_string()),
                ("WHS_PROJECT", project.clone()),
                ("WHS_EPIC_ID", epic_id.clone()),
                ("WHS_SOURCE_ID", source_id.clone()),
                ("WHS_QUESTION_ID", question_id.clone()),
            ],
        }
    }
}

/// Port the Dispatcher notifies through (§6 "A `Notifier` port").
pub trait Notifier {
    fn notify(&self, event: NotificationEvent) -> Result<()>;
}

/// Script-based adapter: `<hooks_dir>/<event-hook-name>`, fired
/// fire-and-forget with the event's data as environment variables.
pub struct HookNotifier {
    hooks_dir: PathBuf,
}

impl HookNotifier {
    pub fn new(hooks_dir: PathBuf) -> Self {
        Self { hooks_dir }
    }
}

impl Notifier for HookNotifier {
    fn notify(&self, event: NotificationEvent) -> Result<()> {
        let hook_path = self.hooks_dir.join(event.hook_name());
        if !is_executable(&hook_path) {
            return Ok(());
        }

        let mut cmd = Command::new(&hook_path);
        for (key, val) in event.env_vars() {
            cmd.env(key, val);
        }
        cmd.spawn()?;
        Ok(())
    }
}

/// No-op adapter for tests and for a dispatcher run with no hooks directory.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: NotificationEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> NotificationEvent {
        NotificationEvent::WorkflowBlocked {
            project: "acme".to_string(),
            epic_id: "epic-1".to_string(),
            source_id: "acme-1".to_string(),
            reason: "auth".to_string(),
        }
    }

    #[test]
    fn missing_hook_is_silently_skipped() {
        let dir = TempDir::new().unwrap();
        let notifier = HookNotifier::new(dir.path().to_path_buf());
        assert!(notifier.notify(sample()).is_ok());
    }

    #[test]
    fn non_executable_hook_is_silently_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("on-workflow-blocked"), "#!/bin/sh\nexit 0\n").unwrap();
        let notifier = HookNotifier::new(dir.path().to_path_buf());
        assert!(notifier.notify(sample()).is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn executable_hook_is_spawned() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("fired");
        let script = dir.path().join("on-workflow-blocked");
        std::fs::write(&script, format!("#!/bin/sh\ntouch {}\n", marker.display())).unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let notifier = HookNotifier::new(dir.path().to_path_buf());
        notifier.notify(sample()).unwrap();

        for _ in 0..50 {
            if marker.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(marker.exists());
    }

    #[test]
    fn env_vars_carry_event_identifiers() {
        let vars = sample().env_vars();
        assert!(vars.contains(&("WHS_EVENT", "workflow.blocked".to_string())));
        assert!(vars.contains(&("WHS_REASON", "auth".to_string())));
    }

    #[test]
    fn noop_notifier_always_succeeds() {
        assert!(NoopNotifier.notify(sample()).is_ok());
    }
}
