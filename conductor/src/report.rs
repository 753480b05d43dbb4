//! Final run report and project status rendering.
//!
//! Reports always list completed tasks, failed tasks with reasons, the last
//! satisfaction score and the cycle count, whatever the outcome.

use std::fmt;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::plan::{Plan, StatusCounts, resolve};
use crate::core::selector::{BlockReason, BlockedTask, SelectionState, selection_state};
use crate::core::types::{FailureKind, ProjectId, ProjectRecord, TaskId};
use crate::exit_codes;
use crate::improvement::CycleState;

const REPORT_TEMPLATE: &str = include_str!("templates/report.md");
const STATUS_TEMPLATE: &str = include_str!("templates/status.md");

/// Terminal outcome class of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Score met the threshold.
    Accepted,
    /// Cycle cap reached below threshold; a partial success.
    CyclesExhausted,
    /// Pending tasks remain that can never run.
    Stalled,
    Cancelled,
}

impl RunOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RunOutcome::Accepted => "accepted",
            RunOutcome::CyclesExhausted => "cycles_exhausted",
            RunOutcome::Stalled => "stalled",
            RunOutcome::Cancelled => "cancelled",
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Accepted => exit_codes::OK,
            RunOutcome::CyclesExhausted => exit_codes::PARTIAL,
            RunOutcome::Stalled => exit_codes::STALLED,
            RunOutcome::Cancelled => exit_codes::CANCELLED,
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedLine {
    pub id: TaskId,
    pub title: String,
    pub artifact_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedLine {
    pub id: TaskId,
    pub title: String,
    pub kind: Option<FailureKind>,
    pub reason: String,
    /// Latest task re-queuing this one, if any.
    pub replaced_by: Option<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockedLine {
    pub id: TaskId,
    pub title: String,
    pub reason: BlockReason,
    pub detail: String,
}

impl From<&BlockedTask> for BlockedLine {
    fn from(blocked: &BlockedTask) -> Self {
        Self {
            id: blocked.id,
            title: blocked.title.clone(),
            reason: blocked.reason.clone(),
            detail: blocked.reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub project_id: ProjectId,
    pub name: String,
    pub objective: String,
    pub complexity_score: u8,
    pub outcome: RunOutcome,
    pub cycle_count: u32,
    pub satisfaction_score: Option<f64>,
    pub score_history: Vec<f64>,
    pub evaluation_summary: Option<String>,
    pub counts: StatusCounts,
    pub completed: Vec<CompletedLine>,
    pub failed: Vec<FailedLine>,
    pub blocked: Vec<BlockedLine>,
}

impl RunReport {
    pub fn build(
        record: &ProjectRecord,
        plan: &Plan,
        outcome: RunOutcome,
        cycles: &CycleState,
        evaluation_summary: Option<String>,
        blocked: &[BlockedTask],
    ) -> Self {
        let completed = plan
            .completed()
            .map(|task| CompletedLine {
                id: task.id,
                title: task.title.clone(),
                artifact_ref: task.result.as_ref().and_then(|result| result.artifact_ref.clone()),
            })
            .collect();
        let failed = plan
            .failed()
            .map(|task| {
                let latest = resolve(&plan.tasks, task.id);
                FailedLine {
                    id: task.id,
                    title: task.title.clone(),
                    kind: task.failure_kind(),
                    reason: task
                        .result
                        .as_ref()
                        .and_then(|result| result.error.as_ref())
                        .map(|error| format!("{}: {}", error.kind, error.message))
                        .unwrap_or_else(|| "no error recorded".to_string()),
                    replaced_by: (latest != task.id).then_some(latest),
                }
            })
            .collect();
        Self {
            project_id: plan.project_id.clone(),
            name: record.name.clone(),
            objective: plan.objective.clone(),
            complexity_score: plan.complexity_score,
            outcome,
            cycle_count: cycles.cycle_count(),
            satisfaction_score: cycles.last_score(),
            score_history: cycles.scores().to_vec(),
            evaluation_summary,
            counts: plan.counts(),
            completed,
            failed,
            blocked: blocked.iter().map(BlockedLine::from).collect(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code()
    }

    /// Markdown rendering for humans.
    pub fn render(&self) -> Result<String> {
        let mut env = Environment::new();
        env.add_template("report", REPORT_TEMPLATE)
            .context("load report template")?;
        let template = env.get_template("report")?;
        let mut rendered = template.render(self).context("render report")?;
        rendered.push('\n');
        Ok(rendered)
    }
}

/// One-screen status of a stored project.
pub fn render_status(record: &ProjectRecord, plan: &Plan, max_batch_size: usize) -> Result<String> {
    let next = match selection_state(plan, max_batch_size) {
        SelectionState::Exhausted => "all tasks terminal".to_string(),
        SelectionState::Runnable(batch) => {
            let ids: Vec<String> = batch.iter().map(|task| task.id.to_string()).collect();
            format!("run {}", ids.join(", "))
        }
        SelectionState::Waiting { in_progress } => {
            format!("waiting on {} in-progress task(s)", in_progress.len())
        }
        SelectionState::Blocked(blocked) => format!("stalled, {} task(s) blocked", blocked.len()),
    };
    let mut env = Environment::new();
    env.add_template("status", STATUS_TEMPLATE)
        .context("load status template")?;
    let template = env.get_template("status")?;
    let mut rendered = template
        .render(context! {
            name => record.name.as_str(),
            project_id => record.id.as_str(),
            objective => record.objective.as_str(),
            phase => record.phase.as_str(),
            complexity_score => record.complexity_score,
            counts => plan.counts(),
            next => next,
            tasks => plan.tasks.as_slice(),
        })
        .context("render status")?;
    rendered.push('\n');
    Ok(rendered)
}
