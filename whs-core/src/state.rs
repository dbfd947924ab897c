//! Dispatcher State and Active Work (§3, §6 persisted state file schema).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Current schema version. A version bump invalidates older files outright —
/// §4.5 and §8 both require an empty state on mismatch, never a migration.
pub const SCHEMA_VERSION: u32 = 2;

/// One entry in the Active Work map (§3 Active Work), keyed by workflow step id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveWorkEntry {
    pub work_item: serde_json::Value,
    /// The id of the source issue this workflow was started from (the
    /// workflow epic's `source:` label), distinct from the step id the map
    /// is keyed by.
    pub source_id: String,
    pub workflow_epic_id: String,
    pub workflow_step_id: String,
    pub session_id: Option<String>,
    pub worktree_path: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub agent: String,
    pub cost_so_far: f64,
}

/// The dispatcher's in-memory, persisted view of currently running steps
/// (§3 Dispatcher State).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherState {
    pub version: u32,
    #[serde(rename = "activeWork")]
    pub active_work: BTreeMap<String, ActiveWorkEntry>,
    pub paused: bool,
    #[serde(rename = "lastUpdated")]
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

impl DispatcherState {
    pub fn empty() -> Self {
        Self {
            version: SCHEMA_VERSION,
            active_work: BTreeMap::new(),
            paused: false,
            last_updated: chrono::Utc::now(),
        }
    }

    /// Parse a persisted state file. Per §4.5/§8: a version mismatch (or
    /// unparseable file) silently yields an empty state rather than an error
    /// or a migration — the tracker remains the durable source of truth, so
    /// discarding a stale snapshot never loses real work.
    pub fn load_or_empty(json: &str) -> Self {
        match serde_json::from_str::<DispatcherState>(json) {
            Ok(state) if state.version == SCHEMA_VERSION => state,
            _ => Self::empty(),
        }
    }

    pub fn project_active_count(&self, project: &str) -> usize {
        self.active_work
            .values()
            .filter(|e| {
                e.work_item
                    .get("project")
                    .and_then(|v| v.as_str())
                    .map(|p| p == project)
                    .unwrap_or(false)
            })
            .count()
    }

    pub fn touch(&mut self) {
        self.last_updated = chrono::Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(project: &str) -> ActiveWorkEntry {
        ActiveWorkEntry {
            work_item: serde_json::json!({ "project": project }),
            source_id: "src-1".to_string(),
            workflow_epic_id: "epic-1".to_string(),
            workflow_step_id: "step-1".to_string(),
            session_id: Some("sess-1".to_string()),
            worktree_path: "/tmp/wt".to_string(),
            started_at: chrono::Utc::now(),
            agent: "implementation".to_string(),
            cost_so_far: 0.5,
        }
    }

    #[test]
    fn empty_state_has_current_version_and_no_work() {
        let state = DispatcherState::empty();
        assert_eq!(state.version, SCHEMA_VERSION);
        assert!(state.active_work.is_empty());
        assert!(!state.paused);
    }

    #[test]
    fn serialize_deserialize_round_trips_current_schema() {
        let mut state = DispatcherState::empty();
        state.active_work.insert("p-1".to_string(), sample_entry("acme"));
        state.paused = true;
        let json = serde_json::to_string(&state).unwrap();
        let restored = DispatcherState::load_or_empty(&json);
        assert_eq!(restored, state);
    }

    #[test]
    fn version_mismatch_yields_empty_state() {
        let json = serde_json::json!({
            "version": 1,
            "activeWork": {},
            "paused": false,
            "lastUpdated": "2024-01-01T00:00:00Z",
        })
        .to_string();
        let restored = DispatcherState::load_or_empty(&json);
        assert_eq!(restored.version, SCHEMA_VERSION);
        assert!(restored.active_work.is_empty());
    }

    #[test]
    fn garbage_json_yields_empty_state_without_panicking() {
        let restored = DispatcherState::load_or_empty("not json at all {{{");
        assert_eq!(restored, DispatcherState::empty_with_fixed_time(restored.last_updated));
    }

    #[test]
    fn project_active_count_filters_by_project() {
        let mut state = DispatcherState::empty();
        state.active_work.insert("p-1".to_string(), sample_entry("acme"));
        state.active_work.insert("p-2".to_string(), sample_entry("acme"));
        state.active_work.insert("p-3".to_string(), sample_entry("other"));
        assert_eq!(state.project_active_count("acme"), 2);
        assert_eq!(state.project_active_count("other"), 1);
        assert_eq!(state.project_active_count("nonexistent"), 0);
    }
}

#[cfg(test)]
impl DispatcherState {
    fn empty_with_fixed_time(t: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            active_work: BTreeMap::new(),
            paused: false,
            last_updated: t,
        }
    }
}
