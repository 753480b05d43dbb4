//! Manager loop lifecycle tests.
//!
//! Drives the manager with scripted planner, worker and evaluator against the
//! in-memory and file-backed stores and checks scheduling order, terminal
//! outcomes and restart recovery.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use conductor::agents::evaluator::CompletionRatioEvaluator;
use conductor::agents::planner::HeuristicPlanner;
use conductor::core::selector::next_batch;
use conductor::core::types::{FailureKind, ProjectPhase, TaskId, TaskStatus};
use conductor::dispatch::CancelToken;
use conductor::exit_codes;
use conductor::io::config::ConductorConfig;
use conductor::io::file_store::FileTaskStore;
use conductor::io::memory_store::InMemoryTaskStore;
use conductor::io::store::TaskStore;
use conductor::manager::{Manager, RunOptions};
use conductor::report::RunOutcome;
use conductor::test_support::{
    Behavior, ScriptedEvaluator, ScriptedPlanner, ScriptedWorker, draft, draft_task, temp_paths,
};

fn ids(values: &[u64]) -> Vec<TaskId> {
    values.iter().copied().map(TaskId).collect()
}

#[test]
fn simple_objective_plans_independent_phase_zero_tasks() {
    let store = InMemoryTaskStore::new();
    let evaluator = CompletionRatioEvaluator::new(5);
    let manager = Manager::new(
        &store,
        &HeuristicPlanner,
        Arc::new(ScriptedWorker::succeeding()),
        &evaluator,
        ConductorConfig::default(),
    );

    let (record, plan) = manager
        .plan_project(
            "Create a simple calculator",
            &RunOptions {
                complexity_hint: Some(2),
                ..RunOptions::default()
            },
        )
        .expect("plan");
    assert_eq!(record.complexity_score, 2);
    assert!((1..=3).contains(&plan.tasks.len()));
    assert!(plan.tasks.iter().all(|task| task.phase == 0));
    assert!(plan.tasks.iter().all(|task| task.dependencies.is_empty()));
    assert!(plan.tasks.iter().all(|task| task.status == TaskStatus::Pending));

    let batch: Vec<TaskId> = next_batch(&plan, 3).iter().map(|task| task.id).collect();
    let created: Vec<TaskId> = plan.tasks.iter().map(|task| task.id).collect();
    assert_eq!(batch, created);
    assert_eq!(
        store.get_project(&record.id).expect("project").phase,
        ProjectPhase::Executing
    );
}

#[test]
fn phase_one_runs_only_after_phase_zero_settles() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 0, &[]),
        draft_task("c", 1, &["a"]),
    ]));
    let worker = Arc::new(ScriptedWorker::succeeding());
    let evaluator = ScriptedEvaluator::scores(&[10.0]);
    let manager = Manager::new(
        &store,
        &planner,
        Arc::clone(&worker),
        &evaluator,
        ConductorConfig::default(),
    );

    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Accepted);
    assert_eq!(report.exit_code(), exit_codes::OK);
    let executed = worker.executed();
    assert_eq!(executed.len(), 3);
    let first_two: HashSet<TaskId> = executed[..2].iter().copied().collect();
    assert_eq!(first_two, ids(&[1, 2]).into_iter().collect());
    assert_eq!(executed[2], TaskId(3));
}

#[test]
fn failed_dependency_stalls_with_blocked_task_reported() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 1, &["a"]),
    ]));
    let worker = ScriptedWorker::succeeding().with("a title", Behavior::Fail("boom".to_string()));
    let evaluator = ScriptedEvaluator::scores(&[10.0]);
    let manager = Manager::new(
        &store,
        &planner,
        Arc::new(worker),
        &evaluator,
        ConductorConfig::default(),
    );

    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Stalled);
    assert_eq!(report.exit_code(), exit_codes::STALLED);
    let blocked: Vec<TaskId> = report.blocked.iter().map(|line| line.id).collect();
    assert_eq!(blocked, ids(&[2]));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].reason, "worker_error: boom");
    assert_eq!(report.satisfaction_score, None);
    assert_eq!(evaluator.calls(), 0);
    assert_eq!(
        store.get_project(&report.project_id).expect("project").phase,
        ProjectPhase::Stalled
    );
}

#[test]
fn low_scores_exhaust_cycles_at_cap() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![draft_task("a", 0, &[])]));
    let evaluator = ScriptedEvaluator::scores(&[5.0, 5.0, 6.0, 6.0]);
    let manager = Manager::new(
        &store,
        &planner,
        Arc::new(ScriptedWorker::succeeding()),
        &evaluator,
        ConductorConfig::default(),
    );

    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::CyclesExhausted);
    assert_eq!(report.exit_code(), exit_codes::PARTIAL);
    assert_eq!(report.cycle_count, 3);
    assert_eq!(report.satisfaction_score, Some(6.0));
    assert_eq!(report.score_history, vec![5.0, 5.0, 6.0, 6.0]);
    assert_eq!(evaluator.calls(), 4);
    // One follow-up task per improvement cycle.
    assert_eq!(report.counts.total(), 4);
    assert_eq!(report.counts.completed, 4);
    assert_eq!(
        store.get_project(&report.project_id).expect("project").phase,
        ProjectPhase::Done
    );
}

#[test]
fn proposal_depending_on_unreplaced_failure_is_skipped() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 0, &[]),
    ]));
    let worker = ScriptedWorker::succeeding().with("a title", Behavior::Fail("boom".to_string()));
    let evaluator = ScriptedEvaluator::scores(&[5.0]).proposals_depending_on(&[1]);
    let config = ConductorConfig {
        max_improvement_cycles: 1,
        ..ConductorConfig::default()
    };
    let manager = Manager::new(&store, &planner, Arc::new(worker), &evaluator, config);

    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::CyclesExhausted);
    assert!(report.blocked.is_empty());
    assert_eq!(report.cycle_count, 1);
    assert_eq!(report.counts.total(), 2);
    assert_eq!(evaluator.calls(), 2);
    assert_eq!(
        store.get_project(&report.project_id).expect("project").phase,
        ProjectPhase::Done
    );
}

#[test]
fn workers_see_completed_history_in_creation_order() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 0, &[]),
        draft_task("c", 1, &["a"]),
        draft_task("d", 2, &["c"]),
    ]));
    let worker = Arc::new(
        ScriptedWorker::succeeding().with("b title", Behavior::Fail("boom".to_string())),
    );
    let evaluator = ScriptedEvaluator::scores(&[10.0]);
    let manager = Manager::new(
        &store,
        &planner,
        Arc::clone(&worker),
        &evaluator,
        ConductorConfig::default(),
    );

    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Accepted);
    assert_eq!(worker.history_of(TaskId(1)), Some(Vec::new()));
    assert_eq!(worker.history_of(TaskId(2)), Some(Vec::new()));
    // The failed task never shows up; later batches see every earlier success.
    assert_eq!(worker.history_of(TaskId(3)), Some(ids(&[1])));
    assert_eq!(worker.history_of(TaskId(4)), Some(ids(&[1, 3])));
}

#[test]
fn failed_task_is_replaced_in_an_improvement_cycle() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 0, &[]),
    ]));
    let worker =
        ScriptedWorker::succeeding().with("a title", Behavior::FailTimes(1, "flaky".to_string()));
    let evaluator = CompletionRatioEvaluator::new(5);
    let manager = Manager::new(
        &store,
        &planner,
        Arc::new(worker),
        &evaluator,
        ConductorConfig::default(),
    );

    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Accepted);
    assert_eq!(report.cycle_count, 1);
    assert_eq!(report.score_history, vec![5.0, 10.0]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, TaskId(1));
    assert_eq!(report.failed[0].replaced_by, Some(TaskId(3)));

    let original = store.get(TaskId(1)).expect("original");
    assert_eq!(original.status, TaskStatus::Failed);
    let replacement = store.get(TaskId(3)).expect("replacement");
    assert_eq!(replacement.replaces, Some(TaskId(1)));
    assert_eq!(replacement.status, TaskStatus::Completed);
}

#[test]
fn missed_deadline_records_worker_timeout() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 0, &[]),
    ]));
    let worker = ScriptedWorker::succeeding()
        .with("a title", Behavior::Sleep(Duration::from_secs(3)));
    let evaluator = ScriptedEvaluator::scores(&[10.0]);
    let config = ConductorConfig {
        task_timeout_secs: 1,
        ..ConductorConfig::default()
    };
    let manager = Manager::new(&store, &planner, Arc::new(worker), &evaluator, config);

    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");

    assert_eq!(report.outcome, RunOutcome::Accepted);
    let timed_out = store.get(TaskId(1)).expect("task");
    assert_eq!(timed_out.status, TaskStatus::Failed);
    assert_eq!(timed_out.failure_kind(), Some(FailureKind::WorkerTimeout));
    assert_eq!(
        store.get(TaskId(2)).expect("task").status,
        TaskStatus::Completed
    );
}

#[test]
fn worker_errors_and_panics_are_absorbed() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 0, &[]),
        draft_task("c", 0, &[]),
    ]));
    let worker = ScriptedWorker::succeeding()
        .with("a title", Behavior::Error("exploded".to_string()))
        .with("b title", Behavior::Panic);
    let evaluator = ScriptedEvaluator::scores(&[10.0]);
    let manager = Manager::new(
        &store,
        &planner,
        Arc::new(worker),
        &evaluator,
        ConductorConfig::default(),
    );

    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");

    assert_eq!(report.counts.failed, 2);
    assert_eq!(report.counts.completed, 1);
    for line in &report.failed {
        assert_eq!(line.kind, Some(FailureKind::WorkerError));
    }
}

#[test]
fn restart_requeues_interrupted_tasks_from_file_store() {
    let (_dir, paths) = temp_paths();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 1, &["a"]),
    ]));
    let evaluator = CompletionRatioEvaluator::new(5);

    let project_id = {
        let store = FileTaskStore::open(&paths.tasks_path).expect("open store");
        let manager = Manager::new(
            &store,
            &planner,
            Arc::new(ScriptedWorker::succeeding()),
            &evaluator,
            ConductorConfig::default(),
        );
        let (record, _) = manager
            .plan_project("build it", &RunOptions::default())
            .expect("plan");
        // Controller dies right after claiming the first task.
        store
            .update_status(TaskId(1), TaskStatus::InProgress, None)
            .expect("claim");
        record.id
    };

    let store = FileTaskStore::open(&paths.tasks_path).expect("reopen store");
    let worker = Arc::new(ScriptedWorker::succeeding());
    let manager = Manager::new(
        &store,
        &planner,
        Arc::clone(&worker),
        &evaluator,
        ConductorConfig::default(),
    );
    let report = manager.resume(&project_id).expect("resume");

    assert_eq!(report.outcome, RunOutcome::Accepted);
    assert_eq!(worker.executed(), ids(&[3, 2]));
    let interrupted = store.get(TaskId(1)).expect("interrupted");
    assert_eq!(interrupted.status, TaskStatus::Failed);
    assert_eq!(interrupted.failure_kind(), Some(FailureKind::Interrupted));
    assert_eq!(report.failed[0].replaced_by, Some(TaskId(3)));

    let err = manager.resume(&project_id).expect_err("already done");
    assert!(format!("{err:#}").contains("nothing to resume"));
}

#[test]
fn cancellation_abandons_in_flight_tasks_and_resume_finishes() {
    let store = InMemoryTaskStore::new();
    let planner = ScriptedPlanner::new(draft(vec![
        draft_task("a", 0, &[]),
        draft_task("b", 1, &["a"]),
    ]));
    let evaluator = CompletionRatioEvaluator::new(5);
    let cancel = CancelToken::new();
    let worker = Arc::new(
        ScriptedWorker::succeeding().with("a title", Behavior::Sleep(Duration::from_millis(800))),
    );
    let manager = Manager::new(
        &store,
        &planner,
        Arc::clone(&worker),
        &evaluator,
        ConductorConfig::default(),
    )
    .with_cancel(cancel.clone());

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        cancel.cancel();
    });
    let report = manager
        .run("build it", &RunOptions::default())
        .expect("run");
    canceller.join().expect("canceller");

    assert_eq!(report.outcome, RunOutcome::Cancelled);
    assert_eq!(report.exit_code(), exit_codes::CANCELLED);
    assert_eq!(report.failed[0].kind, Some(FailureKind::Cancelled));
    assert_eq!(
        store.get(TaskId(2)).expect("task").status,
        TaskStatus::Pending
    );

    let resumed = Manager::new(
        &store,
        &planner,
        worker,
        &evaluator,
        ConductorConfig::default(),
    )
    .resume(&report.project_id)
    .expect("resume");
    assert_eq!(resumed.outcome, RunOutcome::Accepted);
    assert_eq!(resumed.counts.completed, 2);
    assert_eq!(resumed.failed[0].replaced_by, Some(TaskId(3)));
}
