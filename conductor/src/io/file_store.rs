//! JSON-file backed task store (`.conductor/state/tasks.json`).
//!
//! Every mutation holds an exclusive lock on `tasks.json.lock`, reloads the
//! table from disk, applies the change and writes it atomically (temp file +
//! rename) before acknowledging. Several controllers may share one root; each
//! conditional update runs against the durable state, never a stale copy.
//! Reads take no lock since a rename never exposes a half-written file.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use fs2::FileExt;
use tracing::{debug, instrument};

use crate::core::types::{ProjectId, ProjectPhase, ProjectRecord, Task, TaskId, TaskResult, TaskStatus};
use crate::io::store::{StatusChange, StoreError, TaskStore, TaskTable};

#[derive(Debug)]
pub struct FileTaskStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl FileTaskStore {
    /// Open the store at `path`. A missing file starts an empty store.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> Result<Self> {
        let table = read_table(path)?;
        debug!(
            projects = table.projects.len(),
            tasks = table.tasks.len(),
            "task store opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            lock_path: path.with_extension("json.lock"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persistence(&self, err: &anyhow::Error) -> StoreError {
        StoreError::Persistence {
            path: self.path.clone(),
            message: format!("{err:#}"),
        }
    }

    fn load(&self) -> Result<TaskTable, StoreError> {
        read_table(&self.path).map_err(|err| self.persistence(&err))
    }

    fn lock_exclusive(&self) -> Result<StoreLock, StoreError> {
        StoreLock::acquire(&self.lock_path).map_err(|err| self.persistence(&err))
    }

    /// Lock, reload, apply, persist; the caller sees `Ok` only after the write.
    fn mutate<T>(
        &self,
        op: impl FnOnce(&mut TaskTable) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _lock = self.lock_exclusive()?;
        let current = self.load()?;
        let mut next = current.clone();
        let out = op(&mut next)?;
        if next != current {
            write_table(&self.path, &next).map_err(|err| self.persistence(&err))?;
        }
        Ok(out)
    }
}

/// Exclusive advisory lock held until drop.
struct StoreLock(File);

impl StoreLock {
    fn acquire(lock_path: &Path) -> Result<Self> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock {}", lock_path.display()))?;
        Ok(Self(file))
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the lock as well.
        let _ = FileExt::unlock(&self.0);
    }
}

impl TaskStore for FileTaskStore {
    fn next_task_id(&self) -> Result<TaskId, StoreError> {
        self.mutate(|table| Ok(table.allocate_id()))
    }

    fn create(&self, task: Task) -> Result<TaskId, StoreError> {
        self.mutate(|table| table.insert(task))
    }

    fn get(&self, id: TaskId) -> Result<Task, StoreError> {
        self.load()?.get(id).cloned()
    }

    fn list_by_project(&self, project_id: &ProjectId) -> Result<Vec<Task>, StoreError> {
        Ok(self.load()?.list(project_id))
    }

    fn update_status(
        &self,
        id: TaskId,
        to: TaskStatus,
        result: Option<TaskResult>,
    ) -> Result<StatusChange, StoreError> {
        self.mutate(|table| table.transition(id, to, result, Utc::now()))
    }

    fn create_project(&self, record: ProjectRecord) -> Result<(), StoreError> {
        self.mutate(|table| table.insert_project(record))
    }

    fn get_project(&self, id: &ProjectId) -> Result<ProjectRecord, StoreError> {
        self.load()?.project(id).cloned()
    }

    fn set_project_phase(&self, id: &ProjectId, phase: ProjectPhase) -> Result<(), StoreError> {
        self.mutate(|table| table.set_phase(id, phase, Utc::now()))
    }

    fn list_projects(&self) -> Result<Vec<ProjectRecord>, StoreError> {
        Ok(self.load()?.projects)
    }
}

fn read_table(path: &Path) -> Result<TaskTable> {
    if !path.exists() {
        return Ok(TaskTable::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read task store {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse task store {}", path.display()))
}

fn write_table(path: &Path, table: &TaskTable) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(table).context("serialize task store")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("task store path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp task store {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace task store {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{project_record, task};

    #[test]
    fn acknowledged_writes_survive_reopen() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state/tasks.json");
        {
            let store = FileTaskStore::open(&path).expect("open");
            store
                .create_project(project_record("proj-test"))
                .expect("project");
            store
                .create(task(1, 0, &[], TaskStatus::Pending))
                .expect("create");
            store
                .update_status(TaskId(1), TaskStatus::InProgress, None)
                .expect("claim");
        }
        let reopened = FileTaskStore::open(&path).expect("reopen");
        assert_eq!(
            reopened.get(TaskId(1)).expect("task").status,
            TaskStatus::InProgress
        );
        assert_eq!(reopened.next_task_id().expect("id"), TaskId(2));
    }

    #[test]
    fn rejected_mutation_does_not_touch_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        let store = FileTaskStore::open(&path).expect("open");
        store
            .create_project(project_record("proj-test"))
            .expect("project");
        store
            .create(task(1, 0, &[], TaskStatus::Pending))
            .expect("create");
        let before = fs::read_to_string(&path).expect("read");
        store
            .update_status(TaskId(1), TaskStatus::Completed, None)
            .expect_err("skip in_progress");
        assert_eq!(fs::read_to_string(&path).expect("read"), before);
    }

    #[test]
    fn failed_write_is_not_acknowledged() {
        let temp = tempfile::tempdir().expect("tempdir");
        // Parent is a regular file, so every write fails.
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "x").expect("write blocker");
        let store = FileTaskStore::open(&blocker.join("tasks.json")).expect("open");
        let err = store
            .create_project(project_record("proj-test"))
            .expect_err("persist");
        assert!(matches!(err, StoreError::Persistence { .. }));
        assert!(store.list_projects().expect("list").is_empty());
    }

    #[test]
    fn two_instances_on_one_path_keep_each_others_writes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state/tasks.json");
        let first = FileTaskStore::open(&path).expect("open first");
        let second = FileTaskStore::open(&path).expect("open second");

        first
            .create_project(project_record("proj-a"))
            .expect("project a");
        second
            .create_project(project_record("proj-b"))
            .expect("project b");

        let reopened = FileTaskStore::open(&path).expect("reopen");
        let ids: Vec<String> = reopened
            .list_projects()
            .expect("list")
            .into_iter()
            .map(|record| record.id.as_str().to_string())
            .collect();
        assert_eq!(ids, ["proj-a", "proj-b"]);
    }

    #[test]
    fn claim_through_one_instance_rejects_claim_through_another() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        let first = FileTaskStore::open(&path).expect("open first");
        let second = FileTaskStore::open(&path).expect("open second");
        first
            .create_project(project_record("proj-test"))
            .expect("project");
        first
            .create(task(1, 0, &[], TaskStatus::Pending))
            .expect("create");

        second
            .update_status(TaskId(1), TaskStatus::InProgress, None)
            .expect("second claims");
        let err = first
            .update_status(TaskId(1), TaskStatus::InProgress, None)
            .expect_err("already claimed");
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                from: TaskStatus::InProgress,
                ..
            }
        ));
    }

    #[test]
    fn concurrent_writers_lose_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("tasks.json");
        let handles: Vec<_> = (0..4)
            .map(|writer| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = FileTaskStore::open(&path).expect("open");
                    for index in 0..5 {
                        store
                            .create_project(project_record(&format!("proj-{writer}-{index}")))
                            .expect("project");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }
        let store = FileTaskStore::open(&path).expect("reopen");
        assert_eq!(store.list_projects().expect("list").len(), 20);
    }
}
