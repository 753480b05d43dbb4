//! Manager loop: planning, executing, validating and deciding for one project.
//!
//! The manager is the single decision-maker for its project. It asks the
//! selector for a batch, claims each task in the store, fans the batch out to
//! workers, records the outcomes and resynchronizes its plan. When the plan is
//! exhausted it asks the completeness evaluator for a score and either stops
//! or appends follow-up work, up to the improvement cycle cap.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::agents::{CompletenessEvaluator, Evaluation, EvaluationRequest, Planner, Worker};
use crate::core::invariants::{validate_draft, validate_plan, validate_task_spec};
use crate::core::naming::{name_from_objective, project_id, sanitize_name};
use crate::core::plan::{Plan, lower_draft};
use crate::core::selector::{BlockedTask, SelectionState, selection_state};
use crate::core::types::{
    ContextEntry, FailureKind, ProjectContext, ProjectId, ProjectPhase, ProjectRecord, Task,
    TaskId, TaskResult, TaskSpec, TaskStatus,
};
use crate::dispatch::{CancelToken, DispatchRequest, dispatch_batch};
use crate::improvement::{CycleState, Decision};
use crate::io::config::ConductorConfig;
use crate::io::store::{StatusChange, StoreError, TaskStore};
use crate::report::{RunOutcome, RunReport};

/// Plan-level failures that end a run abnormally.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("invalid plan: {}", .0.join("; "))]
    InvalidPlan(Vec<String>),
    #[error("completeness validation failed after {attempts} attempt(s): {message}")]
    ValidationFailed { attempts: u32, message: String },
    #[error("project {project} is {phase}; nothing to resume")]
    NotResumable {
        project: ProjectId,
        phase: ProjectPhase,
    },
    #[error("tasks in progress under another controller: {}", render_ids(.0))]
    InFlightElsewhere(Vec<TaskId>),
}

fn render_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-run options for [`Manager::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Display name; derived from the objective when absent.
    pub name: Option<String>,
    /// Overrides the planner's complexity assessment.
    pub complexity_hint: Option<u8>,
}

/// Where an execution phase settled.
#[derive(Debug, Clone, PartialEq)]
enum Settled {
    Exhausted,
    Stalled(Vec<BlockedTask>),
    Cancelled,
}

pub struct Manager<'a, P, W, E> {
    store: &'a dyn TaskStore,
    planner: &'a P,
    worker: Arc<W>,
    evaluator: &'a E,
    config: ConductorConfig,
    cancel: CancelToken,
}

impl<'a, P, W, E> Manager<'a, P, W, E>
where
    P: Planner,
    W: Worker,
    E: CompletenessEvaluator,
{
    pub fn new(
        store: &'a dyn TaskStore,
        planner: &'a P,
        worker: Arc<W>,
        evaluator: &'a E,
        config: ConductorConfig,
    ) -> Self {
        Self {
            store,
            planner,
            worker,
            evaluator,
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Share an external cancellation token (e.g. wired to Ctrl-C).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Plan `objective` as a new project and drive it to a terminal outcome.
    #[instrument(skip_all)]
    pub fn run(&self, objective: &str, options: &RunOptions) -> Result<RunReport> {
        let (record, plan) = self.plan_project(objective, options)?;
        self.drive(&record, plan)
    }

    /// Planning: draft, validate, persist every task `pending`.
    ///
    /// Nothing is written when the draft is invalid.
    #[instrument(skip_all, fields(hint = ?options.complexity_hint))]
    pub fn plan_project(&self, objective: &str, options: &RunOptions) -> Result<(ProjectRecord, Plan)> {
        let objective = objective.trim();
        if objective.is_empty() {
            return Err(PlanError::InvalidPlan(vec!["objective must not be empty".to_string()]).into());
        }
        let draft = self
            .planner
            .plan(objective, options.complexity_hint)
            .context("planner")?;
        let errors = validate_draft(&draft);
        if !errors.is_empty() {
            warn!(errors = errors.len(), "planner returned an invalid draft");
            return Err(PlanError::InvalidPlan(errors).into());
        }

        let now = Utc::now();
        let record = ProjectRecord {
            id: project_id(objective, now),
            name: options
                .name
                .as_deref()
                .map(sanitize_name)
                .unwrap_or_else(|| name_from_objective(objective)),
            objective: objective.to_string(),
            complexity_score: draft.complexity_score,
            success_criteria: draft.success_criteria.clone(),
            phase: ProjectPhase::Planning,
            created_at: now,
            updated_at: now,
        };
        self.store.create_project(record.clone())?;

        let ids = draft
            .tasks
            .iter()
            .map(|_| self.store.next_task_id())
            .collect::<Result<Vec<TaskId>, StoreError>>()?;
        for (id, spec) in ids.iter().zip(lower_draft(&draft, &ids)) {
            self.store
                .create(Task::from_spec(*id, record.id.clone(), spec, now))?;
        }
        self.store
            .set_project_phase(&record.id, ProjectPhase::Executing)?;
        info!(
            project_id = %record.id,
            tasks = ids.len(),
            complexity = record.complexity_score,
            "project planned"
        );

        let plan = Plan::from_record(&record, self.store.list_by_project(&record.id)?);
        Ok((record, plan))
    }

    /// Restart a stored project from the store's current task statuses.
    #[instrument(skip_all, fields(project_id = %project_id))]
    pub fn resume(&self, project_id: &ProjectId) -> Result<RunReport> {
        let record = self.store.get_project(project_id)?;
        if record.phase == ProjectPhase::Done {
            return Err(PlanError::NotResumable {
                project: record.id,
                phase: record.phase,
            }
            .into());
        }
        let recovered = self.recover_interrupted(project_id)?;
        info!(recovered = recovered.len(), "resuming project");
        self.store
            .set_project_phase(project_id, ProjectPhase::Executing)?;
        let plan = Plan::from_record(&record, self.store.list_by_project(project_id)?);
        let errors = validate_plan(&plan);
        if !errors.is_empty() {
            return Err(PlanError::InvalidPlan(errors).into());
        }
        self.drive(&record, plan)
    }

    /// Fail every `in_progress` task as interrupted and re-queue it, then
    /// re-queue cancelled tasks no later task replaces.
    ///
    /// Returns the ids of the replacement tasks.
    pub fn recover_interrupted(&self, project_id: &ProjectId) -> Result<Vec<TaskId>> {
        let tasks = self.store.list_by_project(project_id)?;
        let mut interrupted = Vec::new();
        for task in tasks.iter().filter(|task| task.status == TaskStatus::InProgress) {
            let result = TaskResult::failure(
                FailureKind::Interrupted,
                "controller restarted while the task was in progress",
            );
            match self.store.update_status(task.id, TaskStatus::Failed, Some(result)) {
                Ok(_) => interrupted.push(task.id),
                Err(StoreError::InvalidTransition { .. }) => {
                    warn!(task_id = %task.id, "task changed while recovering; skipped");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let record = self.store.get_project(project_id)?;
        let plan = Plan::from_record(&record, self.store.list_by_project(project_id)?);
        let mut replacements = Vec::new();
        for failed in plan.unreplaced_failures() {
            let retry = interrupted.contains(&failed.id)
                || failed.failure_kind() == Some(FailureKind::Cancelled);
            if !retry {
                continue;
            }
            let task = self
                .store
                .append(project_id, TaskSpec::replacement_for(failed))?;
            info!(task_id = %task.id, replaces = %failed.id, "re-queued task");
            replacements.push(task.id);
        }
        Ok(replacements)
    }

    fn drive(&self, record: &ProjectRecord, mut plan: Plan) -> Result<RunReport> {
        let mut cycles = CycleState::new(
            self.config.max_improvement_cycles,
            self.config.satisfaction_threshold,
        );
        let mut last_summary = None;
        loop {
            match self.execute_until_settled(&mut plan)? {
                Settled::Exhausted => {}
                Settled::Stalled(blocked) => {
                    warn!(blocked = blocked.len(), "project stalled");
                    self.store
                        .set_project_phase(&plan.project_id, ProjectPhase::Stalled)?;
                    return Ok(RunReport::build(
                        record,
                        &plan,
                        RunOutcome::Stalled,
                        &cycles,
                        last_summary,
                        &blocked,
                    ));
                }
                Settled::Cancelled => {
                    warn!("project cancelled");
                    self.store
                        .set_project_phase(&plan.project_id, ProjectPhase::Cancelled)?;
                    return Ok(RunReport::build(
                        record,
                        &plan,
                        RunOutcome::Cancelled,
                        &cycles,
                        last_summary,
                        &[],
                    ));
                }
            }

            self.store
                .set_project_phase(&plan.project_id, ProjectPhase::Validating)?;
            let evaluation = self.validate(&plan, cycles.cycle_count())?;
            last_summary = Some(evaluation.summary.clone());
            let outcome = match cycles.decide(evaluation.score) {
                Decision::Accept => RunOutcome::Accepted,
                Decision::Exhausted => RunOutcome::CyclesExhausted,
                Decision::Improve { cycle } => {
                    let added = self.append_tasks(&mut plan, evaluation.new_tasks)?;
                    info!(
                        cycle,
                        score = evaluation.score,
                        added = added.len(),
                        "improvement cycle started"
                    );
                    self.store
                        .set_project_phase(&plan.project_id, ProjectPhase::Executing)?;
                    continue;
                }
            };
            info!(
                outcome = %outcome,
                score = evaluation.score,
                cycles = cycles.cycle_count(),
                "project done"
            );
            self.store
                .set_project_phase(&plan.project_id, ProjectPhase::Done)?;
            return Ok(RunReport::build(
                record,
                &plan,
                outcome,
                &cycles,
                last_summary,
                &[],
            ));
        }
    }

    /// Executing: run batches until the plan is exhausted, stalls or the run
    /// is cancelled.
    fn execute_until_settled(&self, plan: &mut Plan) -> Result<Settled> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(Settled::Cancelled);
            }
            match selection_state(plan, self.config.max_batch_size) {
                SelectionState::Exhausted => return Ok(Settled::Exhausted),
                SelectionState::Blocked(blocked) => return Ok(Settled::Stalled(blocked)),
                SelectionState::Waiting { in_progress } => {
                    return Err(PlanError::InFlightElsewhere(in_progress).into());
                }
                SelectionState::Runnable(batch) => self.execute_batch(plan, batch)?,
            }
        }
    }

    /// Claim, dispatch and record one batch, then resync the plan.
    #[instrument(skip_all, fields(project_id = %plan.project_id, batch = batch.len()))]
    fn execute_batch(&self, plan: &mut Plan, batch: Vec<Task>) -> Result<()> {
        let mut claimed = Vec::with_capacity(batch.len());
        for task in batch {
            match self
                .store
                .update_status(task.id, TaskStatus::InProgress, None)
            {
                Ok(StatusChange::Applied(task)) => claimed.push(task),
                Ok(StatusChange::Unchanged) => {}
                Err(
                    err @ (StoreError::InvalidTransition { .. }
                    | StoreError::UnsatisfiedDependency { .. }),
                ) => {
                    warn!(task_id = %task.id, err = %err, "claim lost; task skipped");
                }
                Err(err) => return Err(err.into()),
            }
        }

        if !claimed.is_empty() {
            let context = self.project_context(plan)?;
            let request = DispatchRequest {
                timeout: self.config.task_timeout(),
                max_concurrent: self.config.max_concurrent_workers,
            };
            let finished = dispatch_batch(&self.worker, claimed, &context, &request, &self.cancel);
            for entry in finished {
                match self
                    .store
                    .update_status(entry.task_id, entry.status, Some(entry.result))
                {
                    Ok(_) => debug!(task_id = %entry.task_id, status = %entry.status, "task recorded"),
                    Err(err @ StoreError::InvalidTransition { .. }) => {
                        warn!(task_id = %entry.task_id, err = %err, "late result discarded");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        plan.resync(self.store.list_by_project(&plan.project_id)?);
        Ok(())
    }

    fn project_context(&self, plan: &Plan) -> Result<ProjectContext> {
        let history = self
            .store
            .completed_history(&plan.project_id)?
            .iter()
            .map(ContextEntry::from_task)
            .collect();
        Ok(ProjectContext {
            project_id: plan.project_id.clone(),
            objective: plan.objective.clone(),
            history,
        })
    }

    /// Validating: score the exhausted plan, retrying evaluator errors.
    fn validate(&self, plan: &Plan, cycle: u32) -> Result<Evaluation> {
        let completed: Vec<ContextEntry> = plan.completed().map(ContextEntry::from_task).collect();
        let request = EvaluationRequest {
            plan,
            completed: &completed,
            cycle,
        };
        let attempts = self.config.max_validation_attempts;
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.evaluator.evaluate(&request) {
                Ok(evaluation) if evaluation.score.is_finite() => {
                    debug!(attempt, score = evaluation.score, "evaluation received");
                    return Ok(Evaluation {
                        score: evaluation.score.clamp(0.0, 10.0),
                        ..evaluation
                    });
                }
                Ok(evaluation) => {
                    last_error = format!("non-finite score {}", evaluation.score);
                }
                Err(err) => last_error = format!("{err:#}"),
            }
            warn!(attempt, attempts, err = %last_error, "completeness evaluation failed");
        }
        self.store
            .set_project_phase(&plan.project_id, ProjectPhase::Stalled)?;
        Err(anyhow!(PlanError::ValidationFailed {
            attempts,
            message: last_error,
        }))
    }

    /// Deciding (improve): append valid proposals as new pending tasks.
    ///
    /// Invalid proposals are skipped, never partially applied.
    fn append_tasks(&self, plan: &mut Plan, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>> {
        let mut added = Vec::new();
        for spec in specs {
            let errors = validate_task_spec(plan, &spec);
            if !errors.is_empty() {
                warn!(title = %spec.title, errors = %errors.join("; "), "proposed task skipped");
                continue;
            }
            let task = self.store.append(&plan.project_id, spec)?;
            added.push(task.id);
            plan.tasks.push(task);
        }
        Ok(added)
    }
}
