//! CLI run modes and the bundled capability wiring behind them.
//!
//! - `normal`: persistent file store, configured worker, full manager loop.
//! - `quick-test`: in-memory store and dry-run worker; nothing is written.
//! - `complexity-demo`: assess a fixed set of objectives, no execution.
//! - `planning-analysis`: draft and validate a plan, print the schedule the
//!   selector would follow, no execution.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::ValueEnum;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::{info, instrument};

use crate::agents::evaluator::CompletionRatioEvaluator;
use crate::agents::planner::{FilePlanner, HeuristicPlanner};
use crate::agents::worker::{CommandWorker, DryRunWorker};
use crate::agents::{Planner, Worker};
use crate::core::complexity::{Assessment, ComplexityLevel, assess, fallback_draft};
use crate::core::invariants::validate_draft;
use crate::core::plan::{Plan, PlanDraft, TaskDraft, lower_draft};
use crate::core::selector::simulate_schedule;
use crate::core::types::{ExecutionOutcome, ProjectContext, ProjectId, Task, TaskId};
use crate::dispatch::CancelToken;
use crate::io::config::ConductorConfig;
use crate::io::memory_store::InMemoryTaskStore;
use crate::io::store::TaskStore;
use crate::manager::{Manager, PlanError, RunOptions};
use crate::report::RunReport;

const ANALYSIS_TEMPLATE: &str = include_str!("templates/analysis.md");

/// Objective used by quick-test mode when none is given.
pub const QUICK_TEST_OBJECTIVE: &str =
    "Create a basic calculator that can add, subtract, multiply, and divide two numbers";

/// Objectives assessed by complexity-demo mode, simplest first.
pub const DEMO_OBJECTIVES: [&str; 4] = [
    "Create a simple calculator",
    "Create a todo list app",
    "Show analysis of sample weather data",
    "Build an advanced enterprise analytics platform",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    #[default]
    Normal,
    QuickTest,
    ComplexityDemo,
    PlanningAnalysis,
}

/// Planner selected on the command line.
#[derive(Debug, Clone)]
pub enum BundledPlanner {
    Heuristic(HeuristicPlanner),
    File(FilePlanner),
}

impl BundledPlanner {
    /// Read drafts from `plan_file` when given, otherwise plan heuristically.
    pub fn new(plan_file: Option<&Path>) -> Self {
        match plan_file {
            Some(path) => BundledPlanner::File(FilePlanner::new(path)),
            None => BundledPlanner::Heuristic(HeuristicPlanner),
        }
    }
}

impl Planner for BundledPlanner {
    fn plan(&self, objective: &str, complexity_hint: Option<u8>) -> Result<PlanDraft> {
        match self {
            BundledPlanner::Heuristic(planner) => planner.plan(objective, complexity_hint),
            BundledPlanner::File(planner) => planner.plan(objective, complexity_hint),
        }
    }
}

/// Worker selected by configuration: a command, or a dry run when none is set.
pub enum BundledWorker {
    Command(CommandWorker),
    DryRun(DryRunWorker),
}

impl BundledWorker {
    pub fn from_config(config: &ConductorConfig, workdir: impl Into<PathBuf>) -> Result<Self> {
        if config.worker.command.is_empty() {
            return Ok(BundledWorker::DryRun(DryRunWorker));
        }
        let worker = CommandWorker::new(&config.worker, workdir, config.task_timeout())
            .context("configure worker command")?;
        Ok(BundledWorker::Command(worker))
    }
}

impl Worker for BundledWorker {
    fn execute(&self, task: &Task, context: &ProjectContext) -> Result<ExecutionOutcome> {
        match self {
            BundledWorker::Command(worker) => worker.execute(task, context),
            BundledWorker::DryRun(worker) => worker.execute(task, context),
        }
    }
}

/// Plan and drive a new project with the bundled evaluator.
pub fn execute_project<P: Planner, W: Worker>(
    store: &dyn TaskStore,
    planner: &P,
    worker: W,
    config: &ConductorConfig,
    objective: &str,
    options: &RunOptions,
    cancel: &CancelToken,
) -> Result<RunReport> {
    let evaluator = CompletionRatioEvaluator::new(config.max_replacement_tasks);
    Manager::new(store, planner, Arc::new(worker), &evaluator, config.clone())
        .with_cancel(cancel.clone())
        .run(objective, options)
}

/// Resume a stored project with the bundled evaluator.
pub fn resume_project<W: Worker>(
    store: &dyn TaskStore,
    worker: W,
    config: &ConductorConfig,
    project_id: &ProjectId,
    cancel: &CancelToken,
) -> Result<RunReport> {
    let evaluator = CompletionRatioEvaluator::new(config.max_replacement_tasks);
    Manager::new(
        store,
        &HeuristicPlanner,
        Arc::new(worker),
        &evaluator,
        config.clone(),
    )
    .with_cancel(cancel.clone())
    .resume(project_id)
}

/// In-memory run with the dry-run worker.
#[instrument(skip_all)]
pub fn quick_test(
    objective: Option<&str>,
    config: &ConductorConfig,
    cancel: &CancelToken,
) -> Result<RunReport> {
    let objective = objective.unwrap_or(QUICK_TEST_OBJECTIVE);
    info!(objective, "quick test run");
    let store = InMemoryTaskStore::new();
    execute_project(
        &store,
        &HeuristicPlanner,
        DryRunWorker,
        config,
        objective,
        &RunOptions::default(),
        cancel,
    )
}

#[derive(Debug)]
struct DemoRow {
    objective: &'static str,
    assessment: Assessment,
    planned: usize,
    phases: u32,
}

/// Complexity assessment and fallback plan size for each demo objective.
pub fn complexity_demo() -> String {
    let rows: Vec<DemoRow> = DEMO_OBJECTIVES
        .iter()
        .map(|&objective| {
            let assessment = assess(objective);
            let draft = fallback_draft(objective, &assessment);
            let phases = draft
                .tasks
                .iter()
                .map(|task| task.phase + 1)
                .max()
                .unwrap_or(0);
            DemoRow {
                objective,
                planned: draft.tasks.len(),
                phases,
                assessment,
            }
        })
        .collect();

    let mut out = String::from("# Complexity demo\n\n");
    for row in &rows {
        let expected = row.assessment.level.task_count_range();
        out.push_str(&format!(
            "- {}: score {}/10 ({}), expected {}-{} tasks, planned {} in {} phase(s)\n",
            row.objective,
            row.assessment.score,
            row.assessment.level,
            expected.start(),
            expected.end(),
            row.planned,
            row.phases,
        ));
    }
    out
}

#[derive(Debug, Serialize)]
struct PhaseView<'a> {
    phase: u32,
    tasks: Vec<&'a TaskDraft>,
}

/// Draft a plan, validate it, and render the batches it would run in.
#[instrument(skip_all, fields(hint = ?complexity_hint, batch = max_batch_size))]
pub fn planning_analysis<P: Planner>(
    planner: &P,
    objective: &str,
    complexity_hint: Option<u8>,
    max_batch_size: usize,
) -> Result<String> {
    let draft = planner.plan(objective, complexity_hint).context("planner")?;
    let errors = validate_draft(&draft);
    if !errors.is_empty() {
        return Err(PlanError::InvalidPlan(errors).into());
    }

    let ids: Vec<TaskId> = (1..=draft.tasks.len() as u64).map(TaskId).collect();
    let keys: BTreeMap<TaskId, &str> = ids
        .iter()
        .copied()
        .zip(draft.tasks.iter().map(|task| task.key.as_str()))
        .collect();
    let project_id = ProjectId::new("analysis");
    let now = Utc::now();
    let tasks = ids
        .iter()
        .zip(lower_draft(&draft, &ids))
        .map(|(id, spec)| Task::from_spec(*id, project_id.clone(), spec, now))
        .collect();
    let plan = Plan {
        project_id,
        objective: draft.objective.clone(),
        complexity_score: draft.complexity_score,
        success_criteria: draft.success_criteria.clone(),
        tasks,
    };
    let schedule: Vec<Vec<&str>> = simulate_schedule(&plan, max_batch_size)
        .iter()
        .map(|batch| {
            batch
                .iter()
                .filter_map(|id| keys.get(id).copied())
                .collect()
        })
        .collect();

    let mut by_phase: BTreeMap<u32, Vec<&TaskDraft>> = BTreeMap::new();
    for task in &draft.tasks {
        by_phase.entry(task.phase).or_default().push(task);
    }
    let phases: Vec<PhaseView<'_>> = by_phase
        .into_iter()
        .map(|(phase, tasks)| PhaseView { phase, tasks })
        .collect();
    let level = ComplexityLevel::from_score(draft.complexity_score);
    let expected = level.task_count_range();

    let mut env = Environment::new();
    env.add_template("analysis", ANALYSIS_TEMPLATE)
        .context("load analysis template")?;
    let template = env.get_template("analysis")?;
    let mut rendered = template
        .render(context! {
            objective => draft.objective,
            complexity_score => draft.complexity_score,
            level => level.as_str(),
            expected_min => *expected.start(),
            expected_max => *expected.end(),
            tasks => draft.tasks,
            phases => phases,
            batch_size => max_batch_size,
            schedule => schedule,
            success_criteria => draft.success_criteria,
        })
        .context("render plan analysis")?;
    rendered.push('\n');
    Ok(rendered)
}
