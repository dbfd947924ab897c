//! Dispatcher configuration and credentials.
//!
//! Resolution order: **env var > config-directory `config` file > hardcoded default**.
//!
//! ```text
//! Field                  Env Var                      Config Key             Default
//! ────────────────────── ──────────────────────────── ────────────────────── ────────
//! max_total              WHS_MAX_TOTAL                max_total              4 (max 16)
//! max_per_project        WHS_MAX_PER_PROJECT          max_per_project        2 (max 8)
//! poll_interval_secs     WHS_POLL_INTERVAL_SECS       poll_interval_secs     5
//! max_dispatch_attempts  WHS_MAX_DISPATCH_ATTEMPTS    max_dispatch_attempts  3
//! agent_binary           WHS_AGENT_BINARY             agent_binary           "claude"
//! tracker_binary         WHS_TRACKER_BINARY           tracker_binary         "whs-tracker"
//! worktree_binary        WHS_WORKTREE_BINARY          worktree_binary        "whs-worktree"
//! ```
//!
//! Credentials follow the same pattern — see [`Credentials`].

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::{env, fs};

const MAX_MAX_TOTAL: usize = 16;
const MAX_MAX_PER_PROJECT: usize = 8;

pub const DEFAULT_MAX_TOTAL: usize = 4;
pub const DEFAULT_MAX_PER_PROJECT: usize = 2;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_DISPATCH_ATTEMPTS: u32 = 3;
pub const DEFAULT_AGENT_BINARY: &str = "claude";
pub const DEFAULT_TRACKER_BINARY: &str = "whs-tracker";
pub const DEFAULT_WORKTREE_BINARY: &str = "whs-worktree";

/// Runtime configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-orchestrator configuration directory: holds `state.json`,
    /// `dispatcher.lock`, `config`, `config.json`, and optionally `.env`.
    pub config_dir: PathBuf,
    /// Global cap on concurrently active workers (§5 `maxTotal`).
    pub max_total: usize,
    /// Per-project cap on concurrently active workers (§5 `maxPerProject`).
    pub max_per_project: usize,
    /// Seconds between dispatcher ticks.
    pub poll_interval_secs: u64,
    /// Circuit-breaker cap on `dispatch-attempts` before a workflow blocks (§8 invariant 5).
    pub max_dispatch_attempts: u32,
    /// External assistant binary spawned by the Agent Runner.
    pub agent_binary: String,
    /// External issue-tracker binary consumed by the Tracker Adapter.
    pub tracker_binary: String,
    /// External worktree-management binary consumed by the Worktree Adapter.
    pub worktree_binary: String,
}

impl Config {
    /// Load config from env vars, `<config_dir>/config`, and hardcoded defaults.
    pub fn load(config_dir: &Path) -> Self {
        Self::load_with_env(config_dir, |k| env::var(k).ok())
    }

    fn load_with_env(config_dir: &Path, get_env: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::defaults(config_dir);

        let config_file = config_dir.join("config");
        if let Ok(contents) = fs::read_to_string(&config_file) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    cfg.apply(key.trim(), value.trim());
                }
            }
        }

        for (key, env_name) in [
            ("max_total", "WHS_MAX_TOTAL"),
            ("max_per_project", "WHS_MAX_PER_PROJECT"),
            ("poll_interval_secs", "WHS_POLL_INTERVAL_SECS"),
            ("max_dispatch_attempts", "WHS_MAX_DISPATCH_ATTEMPTS"),
            ("agent_binary", "WHS_AGENT_BINARY"),
            ("tracker_binary", "WHS_TRACKER_BINARY"),
            ("worktree_binary", "WHS_WORKTREE_BINARY"),
        ] {
            if let Some(v) = get_env(env_name) {
                cfg.apply(key, &v);
            }
        }

        cfg
    }

    fn defaults(config_dir: &Path) -> Self {
        Self {
            config_dir: config_dir.to_path_buf(),
            max_total: DEFAULT_MAX_TOTAL,
            max_per_project: DEFAULT_MAX_PER_PROJECT,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            max_dispatch_attempts: DEFAULT_MAX_DISPATCH_ATTEMPTS,
            agent_binary: DEFAULT_AGENT_BINARY.to_string(),
            tracker_binary: DEFAULT_TRACKER_BINARY.to_string(),
            worktree_binary: DEFAULT_WORKTREE_BINARY.to_string(),
        }
    }

    fn apply(&mut self, key: &str, value: &str) {
        match key {
            "max_total" => {
                if let Ok(n) = value.parse::<usize>() {
                    self.max_total = n.clamp(1, MAX_MAX_TOTAL);
                }
            }
            "max_per_project" => {
                if let Ok(n) = value.parse::<usize>() {
                    self.max_per_project = n.clamp(1, MAX_MAX_PER_PROJECT);
                }
            }
            "poll_interval_secs" => {
                if let Ok(n) = value.parse::<u64>() {
                    self.poll_interval_secs = n;
                }
            }
            "max_dispatch_attempts" => {
                if let Ok(n) = value.parse::<u32>() {
                    self.max_dispatch_attempts = n.max(1);
                }
            }
            "agent_binary" => self.agent_binary = value.to_string(),
            "tracker_binary" => self.tracker_binary = value.to_string(),
            "worktree_binary" => self.worktree_binary = value.to_string(),
            _ => {}
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.config_dir.join("state.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.config_dir.join("dispatcher.lock")
    }

    pub fn projects_path(&self) -> PathBuf {
        self.config_dir.join("projects.json")
    }

    /// A config directory counts as initialized once `whs init` has written
    /// its marker file.
    pub fn is_initialized(&self) -> bool {
        self.config_dir.join("config.json").exists()
    }
}

/// Credentials required by the agent runner and tracker adapter.
///
/// Resolution:
/// - `agent_token`: `WHS_AGENT_TOKEN` env > `<config_dir>/token` file
/// - `agent_api_key`: `ANTHROPIC_API_KEY` env (fallback when no agent token is available)
/// - `tracker_token`: `WHS_TRACKER_TOKEN` env
#[derive(Debug)]
pub struct Credentials {
    pub agent_token: Option<String>,
    pub agent_api_key: Option<String>,
    pub tracker_token: Option<String>,
}

impl Credentials {
    pub fn load(config_dir: &Path) -> Self {
        Self::load_with_env(config_dir, |k| env::var(k).ok())
    }

    fn load_with_env(config_dir: &Path, get_env: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            agent_token: Self::resolve_agent_token(config_dir, &get_env),
            agent_api_key: get_env("ANTHROPIC_API_KEY").filter(|s| !s.is_empty()),
            tracker_token: get_env("WHS_TRACKER_TOKEN").filter(|s| !s.is_empty()),
        }
    }

    fn resolve_agent_token(
        config_dir: &Path,
        get_env: &impl Fn(&str) -> Option<String>,
    ) -> Option<String> {
        if let Some(token) = get_env("WHS_AGENT_TOKEN") {
            if !token.is_empty() {
                return Some(token);
            }
        }
        let token_file = config_dir.join("token");
        if token_file.exists() {
            warn_if_world_readable(&token_file);
            if let Ok(contents) = fs::read_to_string(&token_file) {
                let trimmed = contents.trim().to_string();
                if !trimmed.is_empty() {
                    return Some(trimmed);
                }
            }
        }
        None
    }
}

/// Emit a warning to stderr if a credential file is readable by group or others.
///
/// We warn rather than refuse to start — a misconfigured permission is bad
/// but should not block an otherwise-working dispatcher.
pub fn warn_if_world_readable(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(path) {
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                eprintln!(
                    "warning: {} has permissions {:04o} — readable by group/others. Run: chmod 600 {}",
                    path.display(),
                    mode & 0o777,
                    path.display()
                );
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Ensure at least one usable credential (agent token or API key) exists.
pub fn preflight_agent_auth(creds: &Credentials) -> Result<()> {
    if creds.agent_token.is_some() || creds.agent_api_key.is_some() {
        return Ok(());
    }
    anyhow::bail!(
        "no agent credentials found. Set WHS_AGENT_TOKEN, ANTHROPIC_API_KEY, or write a token file."
    )
}
