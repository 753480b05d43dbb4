//! Plan model: the project's tasks as a read-mostly projection of the store.
//!
//! A [`PlanDraft`] is what a planner returns. It names tasks by planner-local
//! keys. Once validated, the draft is lowered into [`TaskSpec`]s whose edges
//! point at store-assigned ids, and from then on the manager works with a
//! [`Plan`] resynchronized from the store after every batch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{ProjectId, ProjectRecord, Task, TaskId, TaskSpec, TaskStatus};

/// One task in a planner draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDraft {
    /// Planner-local key, unique within the draft.
    pub key: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phase: u32,
    /// Keys of other tasks in the same draft.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Planner output before validation and id assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDraft {
    pub objective: String,
    pub complexity_score: u8,
    pub tasks: Vec<TaskDraft>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Lower a validated draft into task specs, in draft order.
///
/// `ids[i]` is the id the store assigned to `draft.tasks[i]`. Callers must
/// have validated the draft first; unknown keys are dropped.
pub fn lower_draft(draft: &PlanDraft, ids: &[TaskId]) -> Vec<TaskSpec> {
    let by_key: HashMap<&str, TaskId> = draft
        .tasks
        .iter()
        .zip(ids)
        .map(|(task, id)| (task.key.as_str(), *id))
        .collect();

    draft
        .tasks
        .iter()
        .map(|task| TaskSpec {
            title: task.title.clone(),
            description: task.description.clone(),
            phase: task.phase,
            dependencies: task
                .dependencies
                .iter()
                .filter_map(|key| by_key.get(key.as_str()).copied())
                .collect(),
            replaces: None,
            payload: task.payload.clone(),
        })
        .collect()
}

/// Per-status task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.failed
    }
}

/// Objective, tasks in creation order and success criteria for one project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub project_id: ProjectId,
    pub objective: String,
    pub complexity_score: u8,
    pub success_criteria: Vec<String>,
    pub tasks: Vec<Task>,
}

impl Plan {
    pub fn from_record(record: &ProjectRecord, tasks: Vec<Task>) -> Self {
        let mut plan = Self {
            project_id: record.id.clone(),
            objective: record.objective.clone(),
            complexity_score: record.complexity_score,
            success_criteria: record.success_criteria.clone(),
            tasks: Vec::new(),
        };
        plan.resync(tasks);
        plan
    }

    /// Replace the projection with the store's current view.
    ///
    /// Tasks are kept in creation order (ascending id).
    pub fn resync(&mut self, mut tasks: Vec<Task>) {
        tasks.sort_by_key(|task| task.id);
        self.tasks = tasks;
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// True when every task is terminal.
    pub fn is_exhausted(&self) -> bool {
        self.tasks.iter().all(|task| task.status.is_terminal())
    }

    pub fn counts(&self) -> StatusCounts {
        StatusCounts::tally(&self.tasks)
    }

    /// Follow `replaces` links from `id` to its latest replacement.
    pub fn resolve(&self, id: TaskId) -> TaskId {
        resolve(&self.tasks, id)
    }

    /// A dependency is satisfied when it, or its latest replacement, completed.
    pub fn dependency_satisfied(&self, dep: TaskId) -> bool {
        dependency_satisfied(&self.tasks, dep)
    }

    /// Failed tasks that no later task replaces.
    pub fn unreplaced_failures(&self) -> Vec<&Task> {
        let replaced_by = replacement_index(&self.tasks);
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed && !replaced_by.contains_key(&task.id))
            .collect()
    }

    /// Completed tasks in creation order.
    pub fn completed(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Completed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Failed)
    }

    pub fn max_phase(&self) -> u32 {
        self.tasks.iter().map(|task| task.phase).max().unwrap_or(0)
    }
}

/// Follow `replaces` links from `id` to its latest replacement.
///
/// `tasks` must be in creation order. Returns `id` itself when it was never
/// replaced.
pub fn resolve(tasks: &[Task], id: TaskId) -> TaskId {
    let replaced_by = replacement_index(tasks);
    let mut current = id;
    // Bounded walk: a malformed chain cannot loop forever.
    for _ in 0..tasks.len() {
        match replaced_by.get(&current) {
            Some(next) => current = *next,
            None => break,
        }
    }
    current
}

/// True when `dep`, or its latest replacement, is `completed`.
pub fn dependency_satisfied(tasks: &[Task], dep: TaskId) -> bool {
    let resolved = resolve(tasks, dep);
    tasks
        .iter()
        .any(|task| task.id == resolved && task.status == TaskStatus::Completed)
}

/// Map of replaced id to the newest task replacing it.
fn replacement_index(tasks: &[Task]) -> HashMap<TaskId, TaskId> {
    let mut index = HashMap::new();
    for task in tasks {
        if let Some(original) = task.replaces {
            // Creation order: a later replacement wins.
            index.insert(original, task.id);
        }
    }
    index
}
