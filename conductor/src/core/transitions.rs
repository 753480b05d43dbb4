//! Task status transition table.
//!
//! The only legal edges are:
//! - `pending -> in_progress`
//! - `in_progress -> completed`
//! - `in_progress -> failed`
//!
//! Replaying a terminal update with the identical result is accepted as a
//! no-op so duplicate completions never double-apply.

use crate::core::types::{Task, TaskResult, TaskStatus};

/// How a store must treat a requested status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCheck {
    /// Legal edge: apply it.
    Apply,
    /// Same terminal status and same result already recorded: do nothing.
    Replay,
    /// Not in the transition table.
    Reject,
}

/// True if `from -> to` is one of the three legal edges.
pub fn is_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    matches!(
        (from, to),
        (TaskStatus::Pending, TaskStatus::InProgress)
            | (TaskStatus::InProgress, TaskStatus::Completed)
            | (TaskStatus::InProgress, TaskStatus::Failed)
    )
}

/// The single prior status from which `to` may be entered.
pub fn expected_prior(to: TaskStatus) -> Option<TaskStatus> {
    match to {
        TaskStatus::Pending => None,
        TaskStatus::InProgress => Some(TaskStatus::Pending),
        TaskStatus::Completed | TaskStatus::Failed => Some(TaskStatus::InProgress),
    }
}

/// Classify an update of `current` to `to` carrying `result`.
pub fn check_transition(current: &Task, to: TaskStatus, result: Option<&TaskResult>) -> TransitionCheck {
    if current.status == to && to.is_terminal() && current.result.as_ref() == result {
        return TransitionCheck::Replay;
    }
    if expected_prior(to) == Some(current.status) {
        return TransitionCheck::Apply;
    }
    TransitionCheck::Reject
}

/// True if `observed` is a prefix-ordered subsequence of
/// `pending -> in_progress -> {completed | failed}`.
///
/// Used to audit status histories; a history may start at any point of the
/// chain but must never skip backwards or branch twice.
pub fn is_valid_history(observed: &[TaskStatus]) -> bool {
    let mut terminal_seen = false;
    let mut last_rank = None;
    for status in observed {
        let rank = match status {
            TaskStatus::Pending => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed | TaskStatus::Failed => {
                if terminal_seen {
                    return false;
                }
                terminal_seen = true;
                2
            }
        };
        if let Some(last) = last_rank
            && rank <= last
        {
            return false;
        }
        last_rank = Some(rank);
    }
    true
}
