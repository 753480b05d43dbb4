//! Shared deterministic types for the scheduling core.
//!
//! These types define the stable contracts between the task store, the plan
//! model, the selector and the manager loop. Task content (titles, payloads,
//! results) is opaque here: scheduling only looks at ids, phases, dependency
//! edges and status.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque, monotonically assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("task-").unwrap_or(s);
        digits
            .parse::<u64>()
            .map(TaskId)
            .map_err(|_| format!("invalid task id '{s}'"))
    }
}

/// Identifier of a project (one objective, one plan).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// `completed` and `failed` are terminal; nothing moves a task out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The worker reported failure or returned an error.
    WorkerError,
    /// The worker missed the caller-specified deadline.
    WorkerTimeout,
    /// The project was cancelled while the task was in flight.
    Cancelled,
    /// The task was found `in_progress` when the controller restarted.
    Interrupted,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::WorkerError => "worker_error",
            FailureKind::WorkerTimeout => "worker_timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error detail recorded on a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

/// Opaque payload recorded when a task reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub artifact_ref: Option<String>,
    pub explanation: String,
    pub error: Option<TaskError>,
}

impl TaskResult {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            artifact_ref: None,
            explanation: message.clone(),
            error: Some(TaskError { kind, message }),
        }
    }
}

/// A unit of work inside a project plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    pub description: String,
    pub phase: u32,
    pub dependencies: Vec<TaskId>,
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    /// Failed task this one re-queues. The original is never mutated.
    #[serde(default)]
    pub replaces: Option<TaskId>,
    #[serde(default)]
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Build a fresh `pending` task from a spec.
    pub fn from_spec(id: TaskId, project_id: ProjectId, spec: TaskSpec, now: DateTime<Utc>) -> Self {
        Self {
            id,
            project_id,
            title: spec.title,
            description: spec.description,
            phase: spec.phase,
            dependencies: spec.dependencies,
            status: TaskStatus::Pending,
            result: None,
            replaces: spec.replaces,
            payload: spec.payload,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.result
            .as_ref()
            .and_then(|result| result.error.as_ref())
            .map(|error| error.kind)
    }
}

/// Description of a task to append to an existing plan.
///
/// Dependencies reference ids already present in the plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub phase: u32,
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    #[serde(default)]
    pub replaces: Option<TaskId>,
    #[serde(default)]
    pub payload: Value,
}

impl TaskSpec {
    /// Spec for a new task that re-queues `failed` with the same shape.
    pub fn replacement_for(failed: &Task) -> Self {
        Self {
            title: failed.title.clone(),
            description: failed.description.clone(),
            phase: failed.phase,
            dependencies: failed.dependencies.clone(),
            replaces: Some(failed.id),
            payload: failed.payload.clone(),
        }
    }
}

/// What a worker reports back for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// Terminal status and stored result for this outcome.
    pub fn into_status_result(self) -> (TaskStatus, TaskResult) {
        if self.success {
            return (
                TaskStatus::Completed,
                TaskResult {
                    artifact_ref: self.artifact_ref,
                    explanation: self.explanation,
                    error: None,
                },
            );
        }
        let message = self
            .error
            .clone()
            .filter(|msg| !msg.trim().is_empty())
            .unwrap_or_else(|| self.explanation.clone());
        (
            TaskStatus::Failed,
            TaskResult {
                artifact_ref: self.artifact_ref,
                explanation: self.explanation,
                error: Some(TaskError {
                    kind: FailureKind::WorkerError,
                    message,
                }),
            },
        )
    }
}

/// One completed task as seen by downstream workers and the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub task_id: TaskId,
    pub title: String,
    pub result: Option<TaskResult>,
}

impl ContextEntry {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
            result: task.result.clone(),
        }
    }
}

/// Opaque history handed to a worker: completed results in creation order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub project_id: ProjectId,
    pub objective: String,
    pub history: Vec<ContextEntry>,
}

/// Coarse project lifecycle as tracked by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectPhase {
    Planning,
    Executing,
    Validating,
    Done,
    Stalled,
    Cancelled,
}

impl ProjectPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectPhase::Planning => "planning",
            ProjectPhase::Executing => "executing",
            ProjectPhase::Validating => "validating",
            ProjectPhase::Done => "done",
            ProjectPhase::Stalled => "stalled",
            ProjectPhase::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ProjectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted project metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub name: String,
    pub objective: String,
    pub complexity_score: u8,
    pub success_criteria: Vec<String>,
    pub phase: ProjectPhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
