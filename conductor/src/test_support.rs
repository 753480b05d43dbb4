//! Test-only helpers: deterministic tasks, plans and drafts, plus scripted
//! planner, worker and evaluator implementations.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tempfile::TempDir;

use crate::agents::{CompletenessEvaluator, Evaluation, EvaluationRequest, Planner, Worker};
use crate::core::plan::{Plan, PlanDraft, TaskDraft};
use crate::core::types::{
    ExecutionOutcome, ProjectContext, ProjectId, ProjectPhase, ProjectRecord, Task, TaskId,
    TaskSpec, TaskStatus,
};
use crate::io::paths::ConductorPaths;

pub const TEST_PROJECT: &str = "proj-test";

/// Fixed timestamp so fixtures compare equal across runs.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// Create a deterministic task in the test project.
pub fn task(id: u64, phase: u32, deps: &[u64], status: TaskStatus) -> Task {
    Task {
        id: TaskId(id),
        project_id: ProjectId::new(TEST_PROJECT),
        title: format!("task-{id} title"),
        description: format!("task-{id} description"),
        phase,
        dependencies: deps.iter().copied().map(TaskId).collect(),
        status,
        result: None,
        replaces: None,
        payload: Value::Null,
        created_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

/// Wrap tasks in a plan for the test project.
pub fn plan_of(tasks: Vec<Task>) -> Plan {
    let mut plan = Plan {
        project_id: ProjectId::new(TEST_PROJECT),
        objective: "test objective".to_string(),
        complexity_score: 2,
        success_criteria: Vec::new(),
        tasks: Vec::new(),
    };
    plan.resync(tasks);
    plan
}

pub fn project_record(id: &str) -> ProjectRecord {
    ProjectRecord {
        id: ProjectId::new(id),
        name: format!("{id}_name"),
        objective: "test objective".to_string(),
        complexity_score: 2,
        success_criteria: Vec::new(),
        phase: ProjectPhase::Executing,
        created_at: fixed_time(),
        updated_at: fixed_time(),
    }
}

pub fn draft_task(key: &str, phase: u32, deps: &[&str]) -> TaskDraft {
    TaskDraft {
        key: key.to_string(),
        title: format!("{key} title"),
        description: format!("{key} description"),
        phase,
        dependencies: deps.iter().map(|dep| dep.to_string()).collect(),
        payload: Value::Null,
    }
}

pub fn draft(tasks: Vec<TaskDraft>) -> PlanDraft {
    PlanDraft {
        objective: "test objective".to_string(),
        complexity_score: 2,
        tasks,
        success_criteria: vec!["everything works".to_string()],
    }
}

/// Temporary project root with conductor paths under it.
pub fn temp_paths() -> (TempDir, ConductorPaths) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let paths = ConductorPaths::new(dir.path());
    (dir, paths)
}

/// Planner returning a fixed draft, with the caller's objective and hint.
pub struct ScriptedPlanner {
    draft: PlanDraft,
}

impl ScriptedPlanner {
    pub fn new(draft: PlanDraft) -> Self {
        Self { draft }
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, objective: &str, complexity_hint: Option<u8>) -> Result<PlanDraft> {
        let mut draft = self.draft.clone();
        draft.objective = objective.to_string();
        if let Some(hint) = complexity_hint {
            draft.complexity_score = hint;
        }
        Ok(draft)
    }
}

/// What a [`ScriptedWorker`] does with a task, keyed by title.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(String),
    /// Fail the first `n` attempts at this title, then succeed.
    FailTimes(u32, String),
    Error(String),
    Sleep(Duration),
    Panic,
}

/// Worker that follows per-title behaviors and records execution order and
/// the project history each task was handed.
#[derive(Default)]
pub struct ScriptedWorker {
    behaviors: HashMap<String, Behavior>,
    executed: Mutex<Vec<TaskId>>,
    histories: Mutex<HashMap<TaskId, Vec<TaskId>>>,
    attempts: Mutex<HashMap<String, u32>>,
}

impl ScriptedWorker {
    /// Every task succeeds.
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn with(mut self, title: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(title.to_string(), behavior);
        self
    }

    /// Ids in the order execution started.
    pub fn executed(&self) -> Vec<TaskId> {
        self.executed.lock().expect("executed lock").clone()
    }

    /// Task ids in the history passed along with `id`.
    pub fn history_of(&self, id: TaskId) -> Option<Vec<TaskId>> {
        self.histories.lock().expect("histories lock").get(&id).cloned()
    }
}

impl Worker for ScriptedWorker {
    fn execute(&self, task: &Task, context: &ProjectContext) -> Result<ExecutionOutcome> {
        self.executed.lock().expect("executed lock").push(task.id);
        self.histories.lock().expect("histories lock").insert(
            task.id,
            context.history.iter().map(|entry| entry.task_id).collect(),
        );
        let attempt = {
            let mut attempts = self.attempts.lock().expect("attempts lock");
            let count = attempts.entry(task.title.clone()).or_default();
            *count += 1;
            *count
        };
        let behavior = match self.behaviors.get(&task.title).cloned() {
            Some(Behavior::FailTimes(times, message)) if attempt <= times => Behavior::Fail(message),
            Some(Behavior::FailTimes(..)) | None => Behavior::Succeed,
            Some(behavior) => behavior,
        };
        match behavior {
            Behavior::Succeed => Ok(ExecutionOutcome {
                success: true,
                artifact_ref: Some(format!("out/{}.txt", task.id)),
                explanation: format!("{} done after {}", task.title, context.history.len()),
                error: None,
            }),
            Behavior::Fail(message) => Ok(ExecutionOutcome {
                success: false,
                artifact_ref: None,
                explanation: format!("{} failed", task.title),
                error: Some(message),
            }),
            Behavior::FailTimes(..) => unreachable!("resolved above"),
            Behavior::Error(message) => bail!(message),
            Behavior::Sleep(duration) => {
                thread::sleep(duration);
                Ok(ExecutionOutcome {
                    success: true,
                    artifact_ref: None,
                    explanation: "slept".to_string(),
                    error: None,
                })
            }
            Behavior::Panic => panic!("scripted panic in {}", task.title),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Score(f64),
    Fail,
}

/// Evaluator replaying a script of scores and failures.
///
/// Every score below 10 proposes `proposals` fresh follow-up tasks in the
/// plan's last phase. An empty script keeps returning the last score.
pub struct ScriptedEvaluator {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<f64>,
    proposals: usize,
    proposal_dependencies: Vec<TaskId>,
    calls: Mutex<u32>,
}

impl ScriptedEvaluator {
    pub fn scores(scores: &[f64]) -> Self {
        Self {
            steps: Mutex::new(scores.iter().copied().map(Step::Score).collect()),
            last: Mutex::new(10.0),
            proposals: 1,
            proposal_dependencies: Vec::new(),
            calls: Mutex::new(0),
        }
    }

    /// Fail `attempts` times before anything else in the script.
    pub fn failing(attempts: usize) -> Self {
        let evaluator = Self::scores(&[]);
        evaluator
            .steps
            .lock()
            .expect("steps lock")
            .extend(std::iter::repeat_n(Step::Fail, attempts));
        evaluator
    }

    pub fn then_scores(self, scores: &[f64]) -> Self {
        self.steps
            .lock()
            .expect("steps lock")
            .extend(scores.iter().copied().map(Step::Score));
        self
    }

    pub fn with_proposals(mut self, proposals: usize) -> Self {
        self.proposals = proposals;
        self
    }

    /// Proposed follow-ups depend on these ids.
    pub fn proposals_depending_on(mut self, ids: &[u64]) -> Self {
        self.proposal_dependencies = ids.iter().copied().map(TaskId).collect();
        self
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().expect("calls lock")
    }
}

impl CompletenessEvaluator for ScriptedEvaluator {
    fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<Evaluation> {
        *self.calls.lock().expect("calls lock") += 1;
        let step = self.steps.lock().expect("steps lock").pop_front();
        let score = match step {
            Some(Step::Fail) => return Err(anyhow!("scripted evaluator failure")),
            Some(Step::Score(score)) => {
                *self.last.lock().expect("last lock") = score;
                score
            }
            None => *self.last.lock().expect("last lock"),
        };
        let phase = request.plan.max_phase();
        let new_tasks = if score < 10.0 {
            (0..self.proposals)
                .map(|index| TaskSpec {
                    title: format!("follow-up {}.{index}", request.cycle + 1),
                    description: "address evaluator feedback".to_string(),
                    phase,
                    dependencies: self.proposal_dependencies.clone(),
                    replaces: None,
                    payload: Value::Null,
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(Evaluation {
            score,
            new_tasks,
            summary: format!("scripted score {score}"),
        })
    }
}
