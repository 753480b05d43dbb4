//! Mutex-guarded in-memory task store.

use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::core::types::{ProjectId, ProjectPhase, ProjectRecord, Task, TaskId, TaskResult, TaskStatus};
use crate::io::store::{StatusChange, StoreError, TaskStore, TaskTable};

/// Store used by tests and quick runs; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    table: Mutex<TaskTable>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, TaskTable>, StoreError> {
        self.table.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl TaskStore for InMemoryTaskStore {
    fn next_task_id(&self) -> Result<TaskId, StoreError> {
        Ok(self.lock()?.allocate_id())
    }

    fn create(&self, task: Task) -> Result<TaskId, StoreError> {
        self.lock()?.insert(task)
    }

    fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.lock()?.get(id).cloned()
    }

    fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Task>, StoreError> {
        Ok(self.lock()?.list(project_id))
    }

    fn update_status(
        &self,
        id: TaskId,
        to: TaskStatus,
        result: Option<TaskResult>,
    ) -> Result<StatusChange, StoreError> {
        self.lock()?.transition(id, to, result, Utc::now())
    }

    fn create_project(&self, record: ProjectRecord) -> Result<(), StoreError> {
        self.lock()?.insert_project(record)
    }

    fn get_project(&self, id: &ProjectId) -> Result<ProjectRecord, StoreError> {
        self.lock()?.project(id).cloned()
    }

    fn set_project_phase(&self, id: &ProjectId, phase: ProjectPhase) -> Result<(), StoreError> {
        self.lock()?.set_phase(id, phase, Utc::now())
    }

    fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        Ok(self.lock()?.projects.clone())
    }
}
