//! Workflow Service (§4.2): encodes workflow state entirely in the
//! orchestrator tracker via the label vocabulary in [`crate::labels`] — no
//! in-memory cache, so a crash never orphans state the tracker doesn't know
//! about.

use anyhow::{Context, Result};

use crate::labels;
use crate::model::{CiStatus, Issue, IssueStatus, IssueType};
use crate::tracker::{IssueUpdate, NewIssue, ReadyFilter, TrackerGateway};

pub struct WorkflowService<'a> {
    tracker: &'a dyn TrackerGateway,
}

/// Optional hand-off metadata carried onto a newly created step
/// (§4.2 `CreateNextStep`).
#[derive(Debug, Clone, Default)]
pub struct StepHandoffMeta {
    pub pr: Option<u64>,
    pub ci: Option<CiStatus>,
}

impl<'a> WorkflowService<'a> {
    pub fn new(tracker: &'a dyn TrackerGateway) -> Self {
        Self { tracker }
    }

    /// `StartWorkflow(project, sourceIssue, firstRole) → (epicId, stepId)`.
    pub fn start_workflow(
        &self,
        project: &str,
        source: &Issue,
        first_role: &str,
    ) -> Result<(String, String)> {
        let epic = self
            .tracker
            .create(&NewIssue {
                title: format!("{project}:{} - {}", source.id, source.title),
                issue_type: IssueType::Epic,
                priority: source.priority,
                parent: None,
                labels: vec![labels::project(project), labels::source(&source.id)],
                description: format!("Workflow for {project}:{}.", source.id),
            })
            .context("creating workflow epic")?;

        let step = self
            .tracker
            .create(&NewIssue {
                title: format!("{first_role}: {}", source.title),
                issue_type: IssueType::Task,
                priority: source.priority,
                parent: Some(epic.id.clone()),
                labels: vec![
                    labels::agent(first_role),
                    labels::WHS_STEP.to_string(),
                    labels::project(project),
                ],
                description: format!(
                    "Picked up from {project}:{}.\n\n{}",
                    source.id, source.description
                ),
            })
            .context("creating first workflow step")?;

        Ok((epic.id, step.id))
    }

    /// `CreateNextStep(epicId, role, context, handoff) → stepId`. The new
    /// step inherits its `project:` label from the parent epic rather than
    /// taking the project as a parameter, since every epic already carries
    /// one (§4.2 `StartWorkflow`).
    pub fn create_next_step(
        &self,
        epic_id: &str,
        role: &str,
        context: &str,
        handoff: &StepHandoffMeta,
    ) -> Result<String> {
        let epic = self.tracker.show(epic_id).context("looking up parent epic")?;
        let project = epic.label_with_prefix("project:").unwrap_or_default();
        let mut step_labels = vec![labels::agent(role), labels::WHS_STEP.to_string(), labels::project(project)];
        if let Some(pr) = handoff.pr {
            step_labels.push(labels::pr(pr));
        }
        if let Some(ci) = handoff.ci {
            step_labels.push(labels::ci(ci));
        }

        let step = self
            .tracker
            .create(&NewIssue {
                title: format!("{role}: next step"),
                issue_type: IssueType::Task,
                priority: 0,
                parent: Some(epic_id.to_string()),
                labels: step_labels,
                description: context.to_string(),
            })
            .context("creating next workflow step")?;
        Ok(step.id)
    }

    /// `CompleteStep(stepId, outcome)`.
    pub fn complete_step(&self, step_id: &str, outcome: &str) -> Result<()> {
        self.tracker.close(step_id, outcome)
    }

    /// `CompleteWorkflow(epicId, "done"|"blocked", reason)`.
    pub fn complete_workflow(
        &self,
        epic_id: &str,
        source_id: &str,
        outcome: &str,
        reason: &str,
    ) -> Result<()> {
        match outcome {
            "done" => {
                self.tracker.close(epic_id, reason)?;
                self.tracker.close(source_id, reason)?;
            }
            "blocked" => {
                self.tracker.update(
                    epic_id,
                    &IssueUpdate {
                        status: Some(IssueStatus::Blocked),
                        label_add: vec![labels::BLOCKED_HUMAN.to_string()],
                        ..Default::default()
                    },
                )?;
                self.tracker.comment(epic_id, reason)?;
            }
            other => anyhow::bail!("unknown workflow outcome: {other}"),
        }
        Ok(())
    }

    /// `ErrorWorkflow(epicId, reason, errorType)`. Leaves the current step
    /// untouched so it stays out of the ready list.
    pub fn error_workflow(&self, epic_id: &str, reason: &str, error_type: &str) -> Result<()> {
        self.tracker.update(
            epic_id,
            &IssueUpdate {
                status: Some(IssueStatus::Blocked),
                label_add: vec![labels::errored(error_type)],
                ..Default::default()
            },
        )?;
        self.tracker.comment(epic_id, reason)
    }

    /// `RetryWorkflow(epicId)`. Strips error/blocked labels, reopens the
    /// epic and any in_progress steps; if every prior step is closed,
    /// materializes a new step addressed to the most recently closed step's
    /// role.
    pub fn retry_workflow(&self, epic: &Issue, steps: &[Issue]) -> Result<Option<String>> {
        let error_labels: Vec<String> = epic
            .labels
            .iter()
            .filter(|l| l.starts_with("errored:") || l.as_str() == labels::BLOCKED_HUMAN)
            .cloned()
            .collect();

        self.tracker.update(
            &epic.id,
            &IssueUpdate {
                status: Some(IssueStatus::Open),
                label_remove: error_labels,
                ..Default::default()
            },
        )?;

        let mut all_closed = true;
        let mut last_role: Option<&str> = None;
        for step in steps {
            if step.status == IssueStatus::InProgress {
                self.tracker.update(
                    &step.id,
                    &IssueUpdate {
                        status: Some(IssueStatus::Open),
                        ..Default::default()
                    },
                )?;
            }
            if step.status != IssueStatus::Closed {
                all_closed = false;
            }
            if let Some(role) = step.label_with_prefix("agent:") {
                last_role = Some(role);
            }
        }

        if all_closed {
            if let Some(role) = last_role {
                let step_id = self.create_next_step(
                    &epic.id,
                    role,
                    "Retrying after the workflow was unblocked.",
                    &StepHandoffMeta::default(),
                )?;
                return Ok(Some(step_id));
            }
        }
        Ok(None)
    }

    /// `GetReadyWorkflowSteps()`.
    pub fn get_ready_steps(&self) -> Result<Vec<Issue>> {
        let steps = self.tracker.list_ready(&ReadyFilter {
            issue_type: Some(IssueType::Task),
            status: Some(IssueStatus::Open),
            label_all: vec![labels::WHS_STEP.to_string()],
            ..Default::default()
        })?;
        // `list_ready` already excludes steps with an open dependency; don't
        // additionally require an empty dependency list, or a step that once
        // depended on a now-closed question would never become ready again.
        Ok(steps
            .into_iter()
            .filter(|s| !s.has_label_with_ci_pending())
            .collect())
    }

    /// `GetStepsPendingCI()`.
    pub fn get_steps_pending_ci(&self) -> Result<Vec<Issue>> {
        let steps = self.tracker.list(&ReadyFilter {
            issue_type: Some(IssueType::Task),
            label_all: vec![labels::ci(CiStatus::Pending)],
            ..Default::default()
        })?;
        Ok(steps
            .into_iter()
            .filter(|s| s.label_with_prefix("pr:").is_some())
            .collect())
    }

    /// `MarkStepInProgress(stepId)`.
    pub fn mark_step_in_progress(&self, step_id: &str) -> Result<()> {
        self.tracker.update(
            step_id,
            &IssueUpdate {
                status: Some(IssueStatus::InProgress),
                ..Default::default()
            },
        )
    }

    /// `MarkStepOpen(stepId)`.
    pub fn mark_step_open(&self, step_id: &str) -> Result<()> {
        self.tracker.update(
            step_id,
            &IssueUpdate {
                status: Some(IssueStatus::Open),
                ..Default::default()
            },
        )
    }

    /// `ResetStepForRetry(stepId, maxAttempts) → bool`. Returns `false` when
    /// the circuit breaker trips (§4.1 pre-flight, §8 invariant 5).
    pub fn reset_step_for_retry(&self, step: &Issue, max_attempts: u32) -> Result<bool> {
        let attempts = step
            .label_with_prefix("dispatch-attempts:")
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(0);
        let next = attempts + 1;

        match crate::decision::decide_retry(next, max_attempts) {
            crate::decision::RetryDecision::TripBreaker => {
                self.tracker.close(&step.id, "dispatch-attempts exhausted")?;
                Ok(false)
            }
            crate::decision::RetryDecision::RetryOpen => {
                self.tracker.update(
                    &step.id,
                    &IssueUpdate {
                        status: Some(IssueStatus::Open),
                        label_remove: vec![labels::dispatch_attempts(attempts)],
                        label_add: vec![labels::dispatch_attempts(next)],
                        ..Default::default()
                    },
                )?;
                Ok(true)
            }
        }
    }

    /// `SetStepResumeInfo`.
    pub fn set_step_resume_info(&self, step_id: &str, info: &labels::ResumeInfo) -> Result<()> {
        let label = labels::resume(info)?;
        self.tracker.update(
            step_id,
            &IssueUpdate {
                label_add: vec![label],
                ..Default::default()
            },
        )
    }

    /// `GetStepResumeInfo`.
    pub fn get_step_resume_info(&self, step: &Issue) -> Option<labels::ResumeInfo> {
        step.labels.iter().find_map(|l| labels::parse_resume(l))
    }

    /// `ClearStepResumeInfo`.
    pub fn clear_step_resume_info(&self, step: &Issue) -> Result<()> {
        let resume_labels: Vec<String> = step
            .labels
            .iter()
            .filter(|l| labels::is_resume_label(l))
            .cloned()
            .collect();
        if resume_labels.is_empty() {
            return Ok(());
        }
        self.tracker.update(
            &step.id,
            &IssueUpdate {
                label_remove: resume_labels,
                ..Default::default()
            },
        )
    }
}

impl Issue {
    fn has_label_with_ci_pending(&self) -> bool {
        self.has_label(&labels::ci(CiStatus::Pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::DaemonStatus;
    use std::cell::RefCell;

    struct FakeTracker {
        issues: RefCell<std::collections::HashMap<String, Issue>>,
        next_id: RefCell<u32>,
        comments: RefCell<Vec<(String, String)>>,
    }

    impl FakeTracker {
        fn new() -> Self {
            Self {
                issues: RefCell::new(std::collections::HashMap::new()),
                next_id: RefCell::new(1),
                comments: RefCell::new(Vec::new()),
            }
        }

        fn seed(&self, issue: Issue) {
            self.issues.borrow_mut().insert(issue.id.clone(), issue);
        }
    }

    impl TrackerGateway for FakeTracker {
        fn list_ready(&self, filter: &ReadyFilter) -> Result<Vec<Issue>> {
            self.list(filter)
        }

        fn list(&self, filter: &ReadyFilter) -> Result<Vec<Issue>> {
            Ok(self
                .issues
                .borrow()
                .values()
                .filter(|i| {
                    filter
                        .label_all
                        .iter()
                        .all(|l| i.labels.iter().any(|il| il == l))
                })
                .cloned()
                .collect())
        }

        fn show(&self, id: &str) -> Result<Issue> {
            self.issues
                .borrow()
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such issue: {id}"))
        }

        fn create(&self, issue: &NewIssue) -> Result<Issue> {
            let mut next_id = self.next_id.borrow_mut();
            let id = format!("fake-{next_id}");
            *next_id += 1;
            let created = Issue {
                id: id.clone(),
                title: issue.title.clone(),
                description: issue.description.clone(),
                priority: issue.priority,
                issue_type: issue.issue_type,
                status: IssueStatus::Open,
                labels: issue.labels.clone(),
                dependencies: vec![],
                parent: issue.parent.clone(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            };
            self.issues.borrow_mut().insert(id, created.clone());
            Ok(created)
        }

        fn update(&self, id: &str, update: &IssueUpdate) -> Result<()> {
            let mut issues = self.issues.borrow_mut();
            let issue = issues.get_mut(id).ok_or_else(|| anyhow::anyhow!("no such issue"))?;
            if let Some(status) = update.status {
                issue.status = status;
            }
            issue.labels.retain(|l| !update.label_remove.contains(l));
            for l in &update.label_add {
                if !issue.labels.contains(l) {
                    issue.labels.push(l.clone());
                }
            }
            Ok(())
        }

        fn close(&self, id: &str, _reason: &str) -> Result<()> {
            self.update(
                id,
                &IssueUpdate {
                    status: Some(IssueStatus::Closed),
                    ..Default::default()
                },
            )
        }

        fn comment(&self, id: &str, text: &str) -> Result<()> {
            self.comments.borrow_mut().push((id.to_string(), text.to_string()));
            Ok(())
        }

        fn add_dep(&self, _child: &str, _parent: &str) -> Result<()> {
            Ok(())
        }

        fn remove_dep(&self, _child: &str, _parent: &str) -> Result<()> {
            Ok(())
        }

        fn init(&self, _stealth: bool, _prefix: Option<&str>) -> Result<()> {
            Ok(())
        }

        fn config_get(&self, _key: &str) -> Result<Option<String>> {
            Ok(None)
        }

        fn config_set(&self, _key: &str, _value: &str) -> Result<()> {
            Ok(())
        }

        fn daemon_start(&self) -> Result<()> {
            Ok(())
        }

        fn daemon_stop(&self) -> Result<()> {
            Ok(())
        }

        fn daemon_status(&self) -> Result<DaemonStatus> {
            Ok(DaemonStatus::Stopped)
        }

        fn is_initialized(&self) -> Result<bool> {
            Ok(true)
        }
    }

    fn source_issue() -> Issue {
        Issue {
            id: "acme-1".to_string(),
            title: "Add login".to_string(),
            description: "Users need to log in.".to_string(),
            priority: 2,
            issue_type: IssueType::Task,
            status: IssueStatus::Open,
            labels: vec![],
            dependencies: vec![],
            parent: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn start_workflow_creates_epic_and_first_step() {
        let tracker = FakeTracker::new();
        let service = WorkflowService::new(&tracker);
        let (epic_id, step_id) = service
            .start_workflow("acme", &source_issue(), "implementation")
            .unwrap();

        let epic = tracker.show(&epic_id).unwrap();
        assert!(epic.labels.contains(&"project:acme".to_string()));
        assert!(epic.labels.contains(&"source:acme-1".to_string()));

        let step = tracker.show(&step_id).unwrap();
        assert!(step.labels.contains(&"agent:implementation".to_string()));
        assert!(step.labels.contains(&labels::WHS_STEP.to_string()));
        assert_eq!(step.parent.as_deref(), Some(epic_id.as_str()));
    }

    #[test]
    fn complete_workflow_done_closes_epic_and_source() {
        let tracker = FakeTracker::new();
        tracker.seed(Issue {
            status: IssueStatus::Open,
            ..source_issue()
        });
        let service = WorkflowService::new(&tracker);
        let (epic_id, _) = service
            .start_workflow("acme", &source_issue(), "implementation")
            .unwrap();

        service
            .complete_workflow(&epic_id, "acme-1", "done", "shipped")
            .unwrap();

        assert_eq!(tracker.show(&epic_id).unwrap().status, IssueStatus::Closed);
        assert_eq!(tracker.show("acme-1").unwrap().status, IssueStatus::Closed);
    }

    #[test]
    fn complete_workflow_blocked_does_not_touch_source() {
        let tracker = FakeTracker::new();
        tracker.seed(source_issue());
        let service = WorkflowService::new(&tracker);
        let (epic_id, _) = service
            .start_workflow("acme", &source_issue(), "implementation")
            .unwrap();

        service
            .complete_workflow(&epic_id, "acme-1", "blocked", "needs a human")
            .unwrap();

        let epic = tracker.show(&epic_id).unwrap();
        assert_eq!(epic.status, IssueStatus::Blocked);
        assert!(epic.labels.contains(&labels::BLOCKED_HUMAN.to_string()));
        assert_eq!(tracker.show("acme-1").unwrap().status, IssueStatus::Open);
    }

    #[test]
    fn error_workflow_leaves_step_untouched() {
        let tracker = FakeTracker::new();
        let service = WorkflowService::new(&tracker);
        let (epic_id, step_id) = service
            .start_workflow("acme", &source_issue(), "implementation")
            .unwrap();
        service.mark_step_in_progress(&step_id).unwrap();

        service.error_workflow(&epic_id, "token expired", "auth").unwrap();

        let epic = tracker.show(&epic_id).unwrap();
        assert_eq!(epic.status, IssueStatus::Blocked);
        assert!(epic.labels.contains(&"errored:auth".to_string()));
        assert_eq!(tracker.show(&step_id).unwrap().status, IssueStatus::InProgress);
    }

    #[test]
    fn reset_step_for_retry_reopens_below_cap() {
        let tracker = FakeTracker::new();
        let service = WorkflowService::new(&tracker);
        let (_, step_id) = service
            .start_workflow("acme", &source_issue(), "implementation")
            .unwrap();
        let step = tracker.show(&step_id).unwrap();

        let ok = service.reset_step_for_retry(&step, 3).unwrap();
        assert!(ok);
        let updated = tracker.show(&step_id).unwrap();
        assert_eq!(updated.status, IssueStatus::Open);
        assert!(updated.labels.contains(&labels::dispatch_attempts(1)));
    }

    #[test]
    fn reset_step_for_retry_trips_breaker_and_closes_step() {
        let tracker = FakeTracker::new();
        let service = WorkflowService::new(&tracker);
        let (_, step_id) = service
            .start_workflow("acme", &source_issue(), "implementation")
            .unwrap();
        tracker
            .update(
                &step_id,
                &IssueUpdate {
                    label_add: vec![labels::dispatch_attempts(2)],
                    ..Default::default()
                },
            )
            .unwrap();
        let step = tracker.show(&step_id).unwrap();

        let ok = service.reset_step_for_retry(&step, 3).unwrap();
        assert!(!ok);
        assert_eq!(tracker.show(&step_id).unwrap().status, IssueStatus::Closed);
    }

    #[test]
    fn resume_info_round_trips_through_labels() {
        let tracker = FakeTracker::new();
        let service = WorkflowService::new(&tracker);
        let (_, step_id) = service
            .start_workflow("acme", &source_issue(), "implementation")
            .unwrap();
        let info = labels::ResumeInfo {
            session_id: "sess-1".to_string(),
            answer: "JWT".to_string(),
            worktree_path: "/work/acme".to_string(),
        };
        service.set_step_resume_info(&step_id, &info).unwrap();

        let step = tracker.show(&step_id).unwrap();
        assert_eq!(service.get_step_resume_info(&step), Some(info));

        service.clear_step_resume_info(&step).unwrap();
        let cleared = tracker.show(&step_id).unwrap();
        assert_eq!(service.get_step_resume_info(&cleared), None);
    }

    #[test]
    fn get_ready_steps_excludes_ci_pending_and_steps_with_dependencies() {
        let tracker = FakeTracker::new();
        let service = WorkflowService::new(&tracker);
        let (epic_id, _) = service
            .start_workflow("acme", &source_issue(), "implementation")
            .unwrap();

        let ready_step_id = service
            .create_next_step(&epic_id, "quality_review", "review it", &StepHandoffMeta::default())
            .unwrap();
        let pending_step_id = service
            .create_next_step(
                &epic_id,
                "release_manager",
                "ship it",
                &StepHandoffMeta {
                    pr: Some(42),
                    ci: Some(CiStatus::Pending),
                },
            )
            .unwrap();

        let ready = service.get_ready_steps().unwrap();
        let ids: Vec<_> = ready.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&ready_step_id.as_str()));
        assert!(!ids.contains(&pending_step_id.as_str()));
    }
}
