//! Pure decision functions (§8 invariants 4, 5): admission filtering and the
//! dispatch-attempts circuit breaker. Kept separate from the I/O that feeds
//! them so each branch is covered by a plain unit test.

use crate::model::Issue;

/// What the admission stage should do with one ready step, given current
/// occupancy against the configured caps (§5 "Admission caps", §8 invariant 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admit,
    SkipGlobalCapReached,
    SkipProjectCapReached,
}

/// Decide whether one more step for `project` can be admitted this tick.
pub fn decide_admission(
    active_total: usize,
    active_for_project: usize,
    max_total: usize,
    max_per_project: usize,
) -> AdmissionDecision {
    if active_total >= max_total {
        AdmissionDecision::SkipGlobalCapReached
    } else if active_for_project >= max_per_project {
        AdmissionDecision::SkipProjectCapReached
    } else {
        AdmissionDecision::Admit
    }
}

/// Select and cap the ready steps admitted this tick, project caps included,
/// preserving the priority order already established by the tracker's
/// `list_ready` sort. `active_for_project` is keyed by project name and
/// updated in place as each step is admitted, so a single project cannot
/// consume the whole tick's global headroom.
pub fn select_admitted<'a>(
    ready: &'a [Issue],
    mut active_total: usize,
    mut active_for_project: std::collections::HashMap<String, usize>,
    max_total: usize,
    max_per_project: usize,
) -> Vec<&'a Issue> {
    let mut admitted = Vec::new();
    for issue in ready {
        let project = issue
            .label_with_prefix("project:")
            .unwrap_or_default()
            .to_string();
        let for_project = *active_for_project.get(&project).unwrap_or(&0);
        match decide_admission(active_total, for_project, max_total, max_per_project) {
            AdmissionDecision::Admit => {
                admitted.push(issue);
                active_total += 1;
                active_for_project.insert(project, for_project + 1);
            }
            AdmissionDecision::SkipGlobalCapReached => break,
            AdmissionDecision::SkipProjectCapReached => continue,
        }
    }
    admitted
}

/// Outcome of a failed dispatch attempt against the circuit breaker
/// (§8 invariant 5: `dispatch-attempts(S) ≤ 3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reset the step to open and try again next tick.
    RetryOpen,
    /// The cap is reached: close the step and block the epic.
    TripBreaker,
}

/// Decide what happens to a step after a failed run, given its
/// dispatch-attempts count *after* this attempt was already recorded and the
/// configured cap (default 3, §8 invariant 5).
pub fn decide_retry(dispatch_attempts_after_failure: u32, max_attempts: u32) -> RetryDecision {
    if dispatch_attempts_after_failure >= max_attempts {
        RetryDecision::TripBreaker
    } else {
        RetryDecision::RetryOpen
    }
}
