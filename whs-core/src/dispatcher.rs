//! Dispatcher (§4.1, §5): owns the tick loop and every side effect on Active
//! Work and workflow steps. Single-threaded with respect to shared state;
//! agent runs execute on worker OS threads whose completion is serialized
//! through a result channel, matching the thread-plus-channel concurrency
//! idiom the rest of this design uses rather than an async executor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use anyhow::Result;

use crate::ci::CiGateway;
use crate::config::Config;
use crate::decision;
use crate::handoff;
use crate::labels;
use crate::model::{CiStatus, Issue, IssueType, NextAgent};
use crate::notify::{NotificationEvent, Notifier};
use crate::question;
use crate::runner::{AgentRunner, RunOptions, RunResult};
use crate::state::{ActiveWorkEntry, DispatcherState};
use crate::store::FileStateStore;
use crate::tracker::{NewIssue, TrackerGateway};
use crate::workflow::WorkflowService;
use crate::worktree::WorktreeGateway;

/// One completed agent run, posted by a worker thread (§4.1, §5). `step_id`
/// is the Active-Work map key (the workflow step id), not the source issue.
struct WorkerResult {
    step_id: String,
    result: RunResult,
}

/// Everything the Dispatcher needs to run one tick, borrowed for the
/// duration of the call so the struct itself stays `'static`-free and easy
/// to construct per-test.
pub struct Dispatcher<'a> {
    config: &'a Config,
    tracker: &'a dyn TrackerGateway,
    worktree: &'a dyn WorktreeGateway,
    ci: &'a dyn CiGateway,
    notifier: &'a dyn Notifier,
    runner: Arc<dyn AgentRunner + Send + Sync>,
    store: FileStateStore,

    results_tx: Sender<WorkerResult>,
    results_rx: Receiver<WorkerResult>,
    cancel_tokens: HashMap<String, Arc<AtomicBool>>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(
        config: &'a Config,
        tracker: &'a dyn TrackerGateway,
        worktree: &'a dyn WorktreeGateway,
        ci: &'a dyn CiGateway,
        notifier: &'a dyn Notifier,
        runner: Arc<dyn AgentRunner + Send + Sync>,
    ) -> Self {
        let (results_tx, results_rx) = std::sync::mpsc::channel();
        Self {
            config,
            tracker,
            worktree,
            ci,
            notifier,
            runner,
            store: FileStateStore::new(config.state_path()),
            results_tx,
            results_rx,
            cancel_tokens: HashMap::new(),
        }
    }

    fn workflow(&self) -> WorkflowService<'_> {
        WorkflowService::new(self.tracker)
    }

    /// Run one tick, mutating `state` and persisting it via the State Store
    /// after every Active-Work change (§5 ordering guarantees).
    pub fn tick(&mut self, state: &mut DispatcherState) -> Result<()> {
        self.drain_results(state)?;
        self.admission(state)?;
        self.ci_watch(state)?;
        self.zombie_sweep(state)?;
        Ok(())
    }

    // ---- stage 1: drain results -------------------------------------------------

    fn drain_results(&mut self, state: &mut DispatcherState) -> Result<()> {
        let mut changed = false;
        while let Ok(worker_result) = self.results_rx.try_recv() {
            self.cancel_tokens.remove(&worker_result.step_id);
            self.apply_result(state, worker_result)?;
            changed = true;
        }
        if changed {
            state.touch();
            self.store.save(state)?;
        }
        Ok(())
    }

    fn apply_result(&self, state: &mut DispatcherState, worker_result: WorkerResult) -> Result<()> {
        let WorkerResult { step_id, result } = worker_result;
        let Some(entry) = state.active_work.get(&step_id).cloned() else {
            return Ok(());
        };
        let workflow = self.workflow();

        if result.is_auth_error {
            workflow.error_workflow(
                &entry.workflow_epic_id,
                &result.transcript,
                "auth",
            )?;
            self.notifier.notify(NotificationEvent::AuthError {
                project: entry_project(&entry),
                epic_id: entry.workflow_epic_id.clone(),
                source_id: entry.source_id.clone(),
                detail: result.error.clone().unwrap_or_default(),
            })?;
            state.active_work.remove(&step_id);
            return Ok(());
        }

        if let Some(pending) = &result.pending_question {
            let record = question::build_question_record(
                pending,
                result.session_id.clone(),
                entry.worktree_path.clone(),
                entry.workflow_step_id.clone(),
                entry.workflow_epic_id.clone(),
                entry_project(&entry),
                result.transcript.clone(),
                chrono::Utc::now(),
            );
            let question_issue = self.tracker.create(&NewIssue {
                title: format!("Question: {}", pending.question),
                issue_type: IssueType::Task,
                priority: 0,
                parent: Some(entry.workflow_epic_id.clone()),
                labels: vec![labels::WHS_QUESTION.to_string()],
                description: question::serialize_record(&record)?,
            })?;
            self.tracker.add_dep(&entry.workflow_step_id, &question_issue.id)?;
            workflow.mark_step_open(&entry.workflow_step_id)?;
            if let Some(session_id) = &result.session_id {
                workflow.set_step_resume_info(
                    &entry.workflow_step_id,
                    &labels::ResumeInfo {
                        session_id: session_id.clone(),
                        answer: String::new(),
                        worktree_path: entry.worktree_path.clone(),
                    },
                )?;
            }
            self.notifier.notify(NotificationEvent::QuestionRaised {
                project: entry_project(&entry),
                epic_id: entry.workflow_epic_id.clone(),
                source_id: entry.source_id.clone(),
                question_id: question_issue.id,
            })?;
            state.active_work.remove(&step_id);
            return Ok(());
        }

        if !result.success {
            let step = self.tracker.show(&entry.workflow_step_id)?;
            let ok = workflow.reset_step_for_retry(&step, self.config.max_dispatch_attempts)?;
            if !ok {
                workflow.error_workflow(
                    &entry.workflow_epic_id,
                    "dispatch-attempts exhausted",
                    "circuit-breaker",
                )?;
                self.notifier.notify(NotificationEvent::WorkflowBlocked {
                    project: entry_project(&entry),
                    epic_id: entry.workflow_epic_id.clone(),
                    source_id: entry.source_id.clone(),
                    reason: "dispatch-attempts exhausted".to_string(),
                })?;
            }
            state.active_work.remove(&step_id);
            return Ok(());
        }

        match handoff::parse_handoff(&result.transcript) {
            Ok(h) => self.route_handoff(state, &step_id, &entry, &h)?,
            Err(_) => {
                let step = self.tracker.show(&entry.workflow_step_id)?;
                workflow.reset_step_for_retry(&step, self.config.max_dispatch_attempts)?;
                state.active_work.remove(&step_id);
            }
        }
        Ok(())
    }

    fn route_handoff(
        &self,
        state: &mut DispatcherState,
        step_id: &str,
        entry: &ActiveWorkEntry,
        h: &crate::model::Handoff,
    ) -> Result<()> {
        let workflow = self.workflow();
        match &h.next_agent {
            NextAgent::Done => {
                workflow.complete_step(&entry.workflow_step_id, "done")?;
                workflow.complete_workflow(&entry.workflow_epic_id, &entry.source_id, "done", &h.context)?;
                self.notifier.notify(NotificationEvent::WorkflowCompleted {
                    project: entry_project(entry),
                    epic_id: entry.workflow_epic_id.clone(),
                    source_id: entry.source_id.clone(),
                })?;
            }
            NextAgent::Blocked => {
                workflow.complete_step(&entry.workflow_step_id, "blocked")?;
                workflow.complete_workflow(&entry.workflow_epic_id, &entry.source_id, "blocked", &h.context)?;
                self.notifier.notify(NotificationEvent::WorkflowBlocked {
                    project: entry_project(entry),
                    epic_id: entry.workflow_epic_id.clone(),
                    source_id: entry.source_id.clone(),
                    reason: h.context.clone(),
                })?;
            }
            NextAgent::Role(role) => {
                workflow.complete_step(&entry.workflow_step_id, "handoff")?;
                workflow.create_next_step(
                    &entry.workflow_epic_id,
                    role,
                    &h.context,
                    &crate::workflow::StepHandoffMeta {
                        pr: h.pr_number,
                        ci: h.ci_status,
                    },
                )?;
            }
        }
        state.active_work.remove(step_id);
        Ok(())
    }

    // ---- stage 2: admission + pre-flight + spawn --------------------------------

    fn admission(&mut self, state: &mut DispatcherState) -> Result<()> {
        if state.paused {
            return Ok(());
        }
        let workflow = self.workflow();
        let mut ready = workflow.get_ready_steps()?;
        ready.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.created_at.cmp(&b.created_at)));

        let mut active_for_project: HashMap<String, usize> = HashMap::new();
        for entry in state.active_work.values() {
            *active_for_project.entry(entry_project(entry)).or_insert(0) += 1;
        }

        let admitted = decision::select_admitted(
            &ready,
            state.active_work.len(),
            active_for_project,
            self.config.max_total,
            self.config.max_per_project,
        );
        let admitted: Vec<Issue> = admitted.into_iter().cloned().collect();

        for step in admitted {
            self.preflight_and_spawn(state, &step)?;
        }
        Ok(())
    }

    fn preflight_and_spawn(&mut self, state: &mut DispatcherState, step: &Issue) -> Result<()> {
        let workflow = self.workflow();
        let ok = workflow.reset_step_for_retry(step, self.config.max_dispatch_attempts)?;
        if !ok {
            let epic_id = step.parent.clone().unwrap_or_default();
            workflow.error_workflow(&epic_id, "dispatch-attempts exhausted before spawn", "circuit-breaker")?;
            let source_id = self
                .tracker
                .show(&epic_id)
                .ok()
                .and_then(|epic| epic.label_with_prefix("source:").map(str::to_string))
                .unwrap_or_default();
            self.notifier.notify(NotificationEvent::WorkflowBlocked {
                project: step.label_with_prefix("project:").unwrap_or_default().to_string(),
                epic_id,
                source_id,
                reason: "dispatch-attempts exhausted".to_string(),
            })?;
            return Ok(());
        }

        let project = step.label_with_prefix("project:").unwrap_or_default().to_string();
        let epic_id = step.parent.clone().unwrap_or_default();
        let epic = self.tracker.show(&epic_id)?;
        let source_id = epic.label_with_prefix("source:").unwrap_or_default().to_string();
        let branch = format!("whs/{}", step.id);
        let worktree_path = self.worktree.ensure(&project, &branch, "main")?;

        workflow.mark_step_in_progress(&step.id)?;

        // A step answering a pending question carries resume info (§4.3
        // "Resume semantics", §8 E4): inline the answer into the prompt
        // unconditionally so runners without session resume still work, and
        // pass the session id along for runners that can resume properly.
        let resume = workflow.get_step_resume_info(step).filter(|r| !r.answer.is_empty());
        let (prompt, resume_session_id) = match &resume {
            Some(info) => (
                format!("{}\n\n{}", step.description, question::format_answer_comment(&info.answer)),
                (!info.session_id.is_empty()).then(|| info.session_id.clone()),
            ),
            None => (step.description.clone(), None),
        };
        if resume.is_some() {
            workflow.clear_step_resume_info(step)?;
        }

        let entry = ActiveWorkEntry {
            work_item: serde_json::json!({ "project": project, "stepId": step.id }),
            source_id,
            workflow_epic_id: epic_id,
            workflow_step_id: step.id.clone(),
            session_id: resume_session_id.clone(),
            worktree_path: worktree_path.display().to_string(),
            started_at: chrono::Utc::now(),
            agent: step.label_with_prefix("agent:").unwrap_or("implementation").to_string(),
            cost_so_far: 0.0,
        };
        state.active_work.insert(step.id.clone(), entry);
        state.touch();
        self.store.save(state)?;

        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel_tokens.insert(step.id.clone(), cancel.clone());

        let runner = self.runner.clone();
        let tx = self.results_tx.clone();
        let opts = RunOptions {
            prompt,
            working_dir: worktree_path,
            resume_session_id,
            ..Default::default()
        };
        let step_id = step.id.clone();
        std::thread::spawn(move || {
            let result = runner
                .run(&opts, &cancel)
                .unwrap_or_else(|e| RunResult {
                    success: false,
                    error: Some(e.to_string()),
                    ..Default::default()
                });
            let _ = tx.send(WorkerResult { step_id, result });
        });

        Ok(())
    }

    // ---- stage 5: CI watch -------------------------------------------------------

    fn ci_watch(&mut self, _state: &mut DispatcherState) -> Result<()> {
        let workflow = self.workflow();
        let pending = workflow.get_steps_pending_ci()?;
        for step in pending {
            let project = step.label_with_prefix("project:").unwrap_or_default();
            let Some(pr) = step.label_with_prefix("pr:").and_then(|s| s.parse::<u64>().ok()) else {
                continue;
            };
            let Ok(status) = self.ci.check_status(project, pr) else {
                continue;
            };
            if !status.is_terminal() {
                continue;
            }
            self.tracker.update(
                &step.id,
                &crate::tracker::IssueUpdate {
                    label_remove: vec![labels::ci(CiStatus::Pending)],
                    label_add: vec![labels::ci(status)],
                    ..Default::default()
                },
            )?;
            if status == CiStatus::Failed {
                if let Some(epic_id) = &step.parent {
                    workflow.create_next_step(
                        epic_id,
                        "implementation",
                        "CI failed; please address the failure.",
                        &crate::workflow::StepHandoffMeta::default(),
                    )?;
                }
            }
        }
        Ok(())
    }

    // ---- stage 6: zombie sweep ---------------------------------------------------

    fn zombie_sweep(&mut self, state: &mut DispatcherState) -> Result<()> {
        let mut dead = Vec::new();
        for (step_id, entry) in state.active_work.iter() {
            match self.tracker.show(&entry.workflow_step_id) {
                Ok(step) if matches!(step.status, crate::model::IssueStatus::Open | crate::model::IssueStatus::InProgress) => {}
                _ => dead.push(step_id.clone()),
            }
        }
        if dead.is_empty() {
            return Ok(());
        }
        for step_id in dead {
            state.active_work.remove(&step_id);
            self.cancel_tokens.remove(&step_id);
        }
        state.touch();
        self.store.save(state)?;
        Ok(())
    }

    /// `RequestShutdown()`: cancel every outstanding run (§4.1, §5
    /// cancellation semantics). Workers observe the flag and exit; their
    /// terminal results still drain on the next `tick`.
    pub fn request_shutdown(&self) {
        for token in self.cancel_tokens.values() {
            token.store(true, Ordering::SeqCst);
        }
    }
}

fn entry_project(entry: &ActiveWorkEntry) -> String {
    entry
        .work_item
        .get("project")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
