//! Typed error kinds that cross the core/CLI boundary.
//!
//! Internal functions keep returning `anyhow::Result` — `DispatcherError` is
//! only constructed at the specific points where a caller needs to know
//! *which* exit code to use, then folded into the `anyhow` chain so `main`
//! can recover it with `downcast_ref`.

use thiserror::Error;

/// One of the precondition failures the dispatcher can refuse to start or run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionKind {
    AlreadyRunning,
    NotInitialized,
    NoLock,
    StaleState,
}

impl PreconditionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PreconditionKind::AlreadyRunning => "AlreadyRunning",
            PreconditionKind::NotInitialized => "NotInitialized",
            PreconditionKind::NoLock => "NoLock",
            PreconditionKind::StaleState => "StaleState",
        }
    }
}

impl std::fmt::Display for PreconditionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error kinds named in the error-handling design, given a concrete type
/// so exit codes can't drift from the cases that produce them.
#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}: {1}")]
    Precondition(PreconditionKind, String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("authentication failure: {0}")]
    Auth(String),

    #[error("agent run failed: {0}")]
    AgentFailure(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

impl DispatcherError {
    /// Process exit code per the fixed CLI contract: 0 success, 1 user/validation
    /// error, 2 precondition failure. Everything else that reaches `main` as a
    /// plain `anyhow::Error` (transient/auth/agent/fatal are core-internal and
    /// never meant to surface past a single tick) exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            DispatcherError::Validation(_) => 1,
            DispatcherError::Precondition(_, _) => 2,
            DispatcherError::Transient(_) => 1,
            DispatcherError::Auth(_) => 1,
            DispatcherError::AgentFailure(_) => 1,
            DispatcherError::Fatal(_) => 1,
        }
    }

    pub fn already_running(pid: u32) -> Self {
        DispatcherError::Precondition(
            PreconditionKind::AlreadyRunning,
            format!("another dispatcher (pid {pid}) already holds the lock"),
        )
    }

    pub fn not_initialized() -> Self {
        DispatcherError::Precondition(
            PreconditionKind::NotInitialized,
            "config directory is not initialized; run `whs init` first".to_string(),
        )
    }

    pub fn no_lock() -> Self {
        DispatcherError::Precondition(
            PreconditionKind::NoLock,
            "no running dispatcher found".to_string(),
        )
    }
}

/// Resolve the process exit code for any error reaching `main`.
///
/// Recovers a `DispatcherError` from the `anyhow` chain if one is present;
/// any other error (a bug, an unexpected I/O failure) is treated as a plain
/// validation error and exits 1 rather than crashing with a panic.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DispatcherError>())
        .map(|e| e.exit_code())
        .unwrap_or(1)
}
