//! Deterministic batch selection over a plan.
//!
//! Phase gating: only the lowest phase that still holds a non-terminal task is
//! eligible. Within it, `pending` tasks whose dependencies are all satisfied
//! are taken in creation order, up to `max_tasks`.

use serde::Serialize;

use crate::core::plan::Plan;
use crate::core::types::{Task, TaskId, TaskStatus};

/// Lowest phase that still has a non-terminal task.
pub fn active_phase(plan: &Plan) -> Option<u32> {
    plan.tasks
        .iter()
        .filter(|task| !task.status.is_terminal())
        .map(|task| task.phase)
        .min()
}

/// Next batch of runnable tasks.
///
/// Never returns a task that is `in_progress` or terminal, never mixes
/// phases, never exceeds `max_tasks`.
pub fn next_batch(plan: &Plan, max_tasks: usize) -> Vec<Task> {
    let Some(phase) = active_phase(plan) else {
        return Vec::new();
    };
    plan.tasks
        .iter()
        .filter(|task| task.phase == phase && is_runnable(plan, task))
        .take(max_tasks)
        .cloned()
        .collect()
}

fn is_runnable(plan: &Plan, task: &Task) -> bool {
    task.status == TaskStatus::Pending
        && task
            .dependencies
            .iter()
            .all(|dep| plan.dependency_satisfied(*dep))
}

/// Why a pending task cannot run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    /// A dependency (after following replacements) failed.
    FailedDependency { dependency: TaskId },
    /// A dependency is itself pending and cannot run.
    BlockedDependency { dependency: TaskId },
    /// An earlier phase still has non-terminal tasks.
    PhaseGate { phase: u32, active_phase: u32 },
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::FailedDependency { dependency } => {
                write!(f, "dependency {dependency} failed with no completed replacement")
            }
            BlockReason::BlockedDependency { dependency } => {
                write!(f, "dependency {dependency} is blocked")
            }
            BlockReason::PhaseGate {
                phase,
                active_phase,
            } => write!(f, "phase {phase} waits on phase {active_phase}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockedTask {
    pub id: TaskId,
    pub title: String,
    pub reason: BlockReason,
}

/// What the manager should do next with a plan.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionState {
    /// Every task is terminal.
    Exhausted,
    /// A non-empty batch is ready.
    Runnable(Vec<Task>),
    /// Nothing is runnable but tasks are still in flight.
    Waiting { in_progress: Vec<TaskId> },
    /// Pending tasks remain and none can ever run without intervention.
    Blocked(Vec<BlockedTask>),
}

/// Classify the plan for the manager loop.
pub fn selection_state(plan: &Plan, max_tasks: usize) -> SelectionState {
    if plan.is_exhausted() {
        return SelectionState::Exhausted;
    }
    let batch = next_batch(plan, max_tasks);
    if !batch.is_empty() {
        return SelectionState::Runnable(batch);
    }
    let in_progress: Vec<TaskId> = plan
        .tasks
        .iter()
        .filter(|task| task.status == TaskStatus::InProgress)
        .map(|task| task.id)
        .collect();
    if !in_progress.is_empty() {
        return SelectionState::Waiting { in_progress };
    }
    SelectionState::Blocked(blocked_tasks(plan))
}

/// Pending tasks with the reason each one cannot run.
pub fn blocked_tasks(plan: &Plan) -> Vec<BlockedTask> {
    let active = active_phase(plan).unwrap_or(0);
    plan.tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Pending)
        .filter_map(|task| {
            block_reason(plan, task, active).map(|reason| BlockedTask {
                id: task.id,
                title: task.title.clone(),
                reason,
            })
        })
        .collect()
}

fn block_reason(plan: &Plan, task: &Task, active: u32) -> Option<BlockReason> {
    if task.phase > active {
        return Some(BlockReason::PhaseGate {
            phase: task.phase,
            active_phase: active,
        });
    }
    for dep in &task.dependencies {
        let resolved = plan.resolve(*dep);
        match plan.task(resolved).map(|dep_task| dep_task.status) {
            Some(TaskStatus::Completed) => continue,
            Some(TaskStatus::Failed) | None => {
                return Some(BlockReason::FailedDependency {
                    dependency: resolved,
                });
            }
            Some(TaskStatus::Pending | TaskStatus::InProgress) => {
                return Some(BlockReason::BlockedDependency {
                    dependency: resolved,
                });
            }
        }
    }
    None
}

/// Dry-run schedule: the batches the selector would emit if every task
/// completed on first try.
pub fn simulate_schedule(plan: &Plan, max_tasks: usize) -> Vec<Vec<TaskId>> {
    let mut shadow = plan.clone();
    let mut batches = Vec::new();
    loop {
        let batch = next_batch(&shadow, max_tasks);
        if batch.is_empty() {
            break;
        }
        let ids: Vec<TaskId> = batch.iter().map(|task| task.id).collect();
        for task in &mut shadow.tasks {
            if ids.contains(&task.id) {
                task.status = TaskStatus::Completed;
            }
        }
        batches.push(ids);
    }
    batches
}
