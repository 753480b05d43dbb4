//! Capability seams the manager drives, plus the bundled implementations.
//!
//! The manager never generates plans, task content or quality scores itself.
//! It calls a [`Planner`], a [`Worker`] and a [`CompletenessEvaluator`]
//! through these traits; tests substitute scripted versions.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;

use crate::core::classifier::{Domain, classify_text};
use crate::core::plan::{Plan, PlanDraft};
use crate::core::types::{ContextEntry, ExecutionOutcome, ProjectContext, Task, TaskSpec};

pub mod evaluator;
pub mod planner;
pub mod worker;

/// Turns an objective into a plan draft.
pub trait Planner {
    /// `complexity_hint` overrides the planner's own assessment when given.
    fn plan(&self, objective: &str, complexity_hint: Option<u8>) -> Result<PlanDraft>;
}

/// Executes one task.
///
/// Workers run on dispatch threads, so they must be shareable. An `Err` is
/// recorded as a worker error on the task; it never stops the run.
pub trait Worker: Send + Sync + 'static {
    /// Opaque dispatch key. Defaults to the payload's `domain`, then to
    /// keyword classification of the task text.
    fn classify(&self, task: &Task) -> Domain {
        task.payload
            .get("domain")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or_else(|| classify_text(&format!("{} {}", task.title, task.description)))
    }

    fn execute(&self, task: &Task, context: &ProjectContext) -> Result<ExecutionOutcome>;
}

/// Raised by a worker that enforced its own deadline.
#[derive(Debug, Error)]
#[error("worker timed out after {}s", .0.as_secs())]
pub struct WorkerTimedOut(pub Duration);

/// Inputs to one completeness evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRequest<'a> {
    pub plan: &'a Plan,
    /// Completed tasks' results in creation order.
    pub completed: &'a [ContextEntry],
    /// Improvement cycles already spent.
    pub cycle: u32,
}

/// Score and follow-up work proposed by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Satisfaction on a 0..=10 scale.
    pub score: f64,
    pub new_tasks: Vec<TaskSpec>,
    pub summary: String,
}

/// Scores a project once its plan is exhausted.
pub trait CompletenessEvaluator {
    fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<Evaluation>;
}
