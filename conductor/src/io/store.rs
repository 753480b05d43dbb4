//! Task store contract and the shared in-memory table behind both stores.
//!
//! The store is the sole serialization point for task status. Every status
//! write is a compare-and-set against the single legal prior status, so two
//! writers racing on one task id cannot both win.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::plan::{StatusCounts, dependency_satisfied};
use crate::core::transitions::{TransitionCheck, check_transition};
use crate::core::types::{
    ProjectId, ProjectPhase, ProjectRecord, Task, TaskId, TaskResult, TaskSpec, TaskStatus,
};

/// Typed store failures callers match on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task {0} already exists")]
    DuplicateId(TaskId),
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),
    #[error("project {0} already exists")]
    DuplicateProject(ProjectId),
    #[error("{id}: dependency {dependency} is not a task of the same project")]
    ForeignDependency { id: TaskId, dependency: TaskId },
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
    #[error("{id}: dependency {dependency} is not completed")]
    UnsatisfiedDependency { id: TaskId, dependency: TaskId },
    #[error("persist task store {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },
    #[error("task store lock poisoned")]
    Poisoned,
}

/// Result of a status update that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusChange {
    /// The transition was applied; carries the updated task.
    Applied(Task),
    /// Identical terminal replay; nothing changed.
    Unchanged,
}

/// Durable record of tasks and projects.
pub trait TaskStore: Send + Sync {
    /// Allocate the next task id. Ids are never reused.
    fn next_task_id(&self) -> Result<TaskId, StoreError>;

    /// Insert a new task. Fails on duplicate id or unknown project.
    fn create(&self, task: Task) -> Result<TaskId, StoreError>;

    fn get(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Tasks of one project in creation order.
    fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Task>, StoreError>;

    /// Conditional status write. See [`crate::core::transitions`].
    fn update_status(
        &self,
        id: TaskId,
        to: TaskStatus,
        result: Option<TaskResult>,
    ) -> Result<StatusChange, StoreError>;

    fn create_project(&self, record: ProjectRecord) -> Result<(), StoreError>;

    fn get_project(&self, id: &ProjectId) -> Result<ProjectRecord, StoreError>;

    fn set_project_phase(&self, id: &ProjectId, phase: ProjectPhase) -> Result<(), StoreError>;

    /// All projects, oldest first.
    fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError>;

    /// Allocate an id and insert a fresh `pending` task built from `spec`.
    fn append(&self, project_id: &ProjectId, spec: TaskSpec) -> Result<Task, StoreError> {
        let id = self.next_task_id()?;
        let task = Task::from_spec(id, project_id.clone(), spec, Utc::now());
        self.create(task.clone())?;
        Ok(task)
    }

    fn count_by_status(&self, project_id: &ProjectId) -> Result<StatusCounts, StoreError> {
        Ok(StatusCounts::tally(&self.list_by_project(project_id)?))
    }

    fn count_pending(&self, project_id: &ProjectId) -> Result<usize, StoreError> {
        Ok(self.count_by_status(project_id)?.pending)
    }

    /// Completed tasks of a project in creation order.
    fn completed_history(&self, project_id: &ProjectId) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .list_by_project(project_id)?
            .into_iter()
            .filter(|task| task.status == TaskStatus::Completed)
            .collect())
    }
}

/// In-memory table of projects and tasks; the persisted document shape.
///
/// Tasks are kept sorted by id, which is also creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTable {
    pub next_id: u64,
    pub projects: Vec<ProjectRecord>,
    pub tasks: Vec<Task>,
}

impl TaskTable {
    pub fn allocate_id(&mut self) -> TaskId {
        let floor = self.tasks.last().map(|task| task.id.0 + 1).unwrap_or(1);
        let id = self.next_id.max(floor);
        self.next_id = id + 1;
        TaskId(id)
    }

    pub fn insert(&mut self, task: Task) -> Result<TaskId, StoreError> {
        if !self.projects.iter().any(|project| project.id == task.project_id) {
            return Err(StoreError::ProjectNotFound(task.project_id));
        }
        let position = match self.tasks.binary_search_by_key(&task.id, |existing| existing.id) {
            Ok(_) => return Err(StoreError::DuplicateId(task.id)),
            Err(position) => position,
        };
        for dep in &task.dependencies {
            let same_project = self
                .find(*dep)
                .is_some_and(|existing| existing.project_id == task.project_id);
            if !same_project {
                return Err(StoreError::ForeignDependency {
                    id: task.id,
                    dependency: *dep,
                });
            }
        }
        let id = task.id;
        self.next_id = self.next_id.max(id.0 + 1);
        self.tasks.insert(position, task);
        Ok(id)
    }

    pub fn find(&self, id: TaskId) -> Option<&Task> {
        self.tasks
            .binary_search_by_key(&id, |task| task.id)
            .ok()
            .map(|index| &self.tasks[index])
    }

    pub fn get(&self, id: TaskId) -> Result<&Task, StoreError> {
        self.find(id).ok_or(StoreError::NotFound(id))
    }

    pub fn list(&self, project_id: &ProjectId) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| &task.project_id == project_id)
            .cloned()
            .collect()
    }

    /// Apply one compare-and-set status update at time `now`.
    pub fn transition(
        &mut self,
        id: TaskId,
        to: TaskStatus,
        result: Option<TaskResult>,
        now: DateTime<Utc>,
    ) -> Result<StatusChange, StoreError> {
        let index = self
            .tasks
            .binary_search_by_key(&id, |task| task.id)
            .map_err(|_| StoreError::NotFound(id))?;
        let current = &self.tasks[index];

        match check_transition(current, to, result.as_ref()) {
            TransitionCheck::Replay => {
                debug!(task_id = %id, status = %to, "identical terminal replay ignored");
                return Ok(StatusChange::Unchanged);
            }
            TransitionCheck::Reject => {
                warn!(task_id = %id, from = %current.status, to = %to, "invalid transition rejected");
                return Err(StoreError::InvalidTransition {
                    id,
                    from: current.status,
                    to,
                });
            }
            TransitionCheck::Apply => {}
        }

        if to == TaskStatus::InProgress {
            let siblings = self.list(&current.project_id);
            if let Some(dep) = current
                .dependencies
                .iter()
                .find(|dep| !dependency_satisfied(&siblings, **dep))
            {
                return Err(StoreError::UnsatisfiedDependency {
                    id,
                    dependency: *dep,
                });
            }
        }

        let task = &mut self.tasks[index];
        task.status = to;
        if to.is_terminal() {
            task.result = result;
        }
        task.updated_at = task.updated_at.max(now);
        Ok(StatusChange::Applied(task.clone()))
    }

    pub fn insert_project(&mut self, record: ProjectRecord) -> Result<(), StoreError> {
        if self.projects.iter().any(|project| project.id == record.id) {
            return Err(StoreError::DuplicateProject(record.id));
        }
        self.projects.push(record);
        Ok(())
    }

    pub fn project(&self, id: &ProjectId) -> Result<&ProjectRecord, StoreError> {
        self.projects
            .iter()
            .find(|project| &project.id == id)
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))
    }

    pub fn set_phase(
        &mut self,
        id: &ProjectId,
        phase: ProjectPhase,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let project = self
            .projects
            .iter_mut()
            .find(|project| &project.id == id)
            .ok_or_else(|| StoreError::ProjectNotFound(id.clone()))?;
        project.phase = phase;
        project.updated_at = project.updated_at.max(now);
        Ok(())
    }
}
