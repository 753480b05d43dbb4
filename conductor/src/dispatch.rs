//! Concurrent fan-out of one batch to worker threads.
//!
//! Tasks run in waves of at most `max_concurrent` threads. Every task in a
//! wave shares one deadline. A task that misses it, or is still running when
//! the run is cancelled, is abandoned: its thread is detached and whatever it
//! eventually returns is dropped with the channel.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::agents::{Worker, WorkerTimedOut};
use crate::core::budget::next_wait;
use crate::core::types::{
    ExecutionOutcome, FailureKind, ProjectContext, Task, TaskId, TaskResult, TaskStatus,
};

/// How often a waiting dispatcher re-checks cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Parameters for one batch dispatch.
#[derive(Debug, Clone, Copy)]
pub struct DispatchRequest {
    /// Per-task deadline, measured from the start of the task's wave.
    pub timeout: Duration,
    pub max_concurrent: usize,
}

/// Terminal status and result to record for one dispatched task.
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub result: TaskResult,
}

impl Finished {
    fn from_outcome(task_id: TaskId, outcome: Result<ExecutionOutcome>) -> Self {
        match outcome {
            Ok(outcome) => {
                let (status, result) = outcome.into_status_result();
                Self {
                    task_id,
                    status,
                    result,
                }
            }
            Err(err) => {
                let kind = if err.downcast_ref::<WorkerTimedOut>().is_some() {
                    FailureKind::WorkerTimeout
                } else {
                    FailureKind::WorkerError
                };
                Self::failed(task_id, kind, format!("{err:#}"))
            }
        }
    }

    fn failed(task_id: TaskId, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            task_id,
            status: TaskStatus::Failed,
            result: TaskResult::failure(kind, message),
        }
    }
}

/// Run `tasks` on `worker` and return one [`Finished`] per task, in batch
/// order.
#[instrument(skip_all, fields(tasks = tasks.len(), timeout_secs = request.timeout.as_secs()))]
pub fn dispatch_batch<W: Worker>(
    worker: &Arc<W>,
    tasks: Vec<Task>,
    context: &ProjectContext,
    request: &DispatchRequest,
    cancel: &CancelToken,
) -> Vec<Finished> {
    let context = Arc::new(context.clone());
    let order: Vec<TaskId> = tasks.iter().map(|task| task.id).collect();
    let mut finished: Vec<Finished> = Vec::with_capacity(tasks.len());

    for wave in tasks.chunks(request.max_concurrent.max(1)) {
        if cancel.is_cancelled() {
            finished.extend(wave.iter().map(|task| cancelled(task.id)));
            continue;
        }
        finished.extend(run_wave(worker, wave, &context, request.timeout, cancel));
    }

    finished.sort_by_key(|entry| order.iter().position(|id| *id == entry.task_id));
    finished
}

fn run_wave<W: Worker>(
    worker: &Arc<W>,
    wave: &[Task],
    context: &Arc<ProjectContext>,
    timeout: Duration,
    cancel: &CancelToken,
) -> Vec<Finished> {
    let (tx, rx) = mpsc::channel::<(TaskId, Result<ExecutionOutcome>)>();
    // A timeout past the clock's range means no deadline.
    let deadline = Instant::now().checked_add(timeout);

    for task in wave {
        let tx = tx.clone();
        let worker = Arc::clone(worker);
        let context = Arc::clone(context);
        let task = task.clone();
        debug!(task_id = %task.id, "spawning worker thread");
        thread::spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| worker.execute(&task, &context)))
                .unwrap_or_else(|_| Err(anyhow!("worker panicked")));
            // The receiver is gone when the task was abandoned.
            let _ = tx.send((task.id, outcome));
        });
    }
    drop(tx);

    let mut waiting: Vec<TaskId> = wave.iter().map(|task| task.id).collect();
    let mut finished = Vec::with_capacity(wave.len());
    while !waiting.is_empty() {
        if cancel.is_cancelled() {
            warn!(abandoned = waiting.len(), "cancelled with tasks in flight");
            finished.extend(waiting.drain(..).map(cancelled));
            break;
        }
        let wait = match deadline {
            Some(deadline) => next_wait(deadline, POLL_INTERVAL),
            None => Ok(POLL_INTERVAL),
        };
        let Ok(wait) = wait else {
            warn!(abandoned = waiting.len(), timeout_secs = timeout.as_secs(), "task deadline elapsed");
            finished.extend(waiting.drain(..).map(|task_id| {
                Finished::failed(
                    task_id,
                    FailureKind::WorkerTimeout,
                    format!("no result within {}s", timeout.as_secs()),
                )
            }));
            break;
        };
        match rx.recv_timeout(wait) {
            Ok((task_id, outcome)) => {
                waiting.retain(|id| *id != task_id);
                let entry = Finished::from_outcome(task_id, outcome);
                info!(task_id = %task_id, status = %entry.status, "task finished");
                finished.push(entry);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                finished.extend(waiting.drain(..).map(|task_id| {
                    Finished::failed(
                        task_id,
                        FailureKind::WorkerError,
                        "worker thread exited without reporting",
                    )
                }));
            }
        }
    }
    finished
}

fn cancelled(task_id: TaskId) -> Finished {
    Finished::failed(
        task_id,
        FailureKind::Cancelled,
        "project cancelled while task was in flight",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::task;

    struct ScriptWorker;

    impl Worker for ScriptWorker {
        fn execute(&self, task: &Task, _context: &ProjectContext) -> Result<ExecutionOutcome> {
            match task.title.as_str() {
                "slow" => {
                    thread::sleep(Duration::from_secs(2));
                    Ok(success())
                }
                "error" => Err(anyhow!("tool crashed")),
                "panic" => panic!("worker bug"),
                "timeout" => Err(WorkerTimedOut(Duration::from_secs(1)).into()),
                _ => Ok(success()),
            }
        }
    }

    fn success() -> ExecutionOutcome {
        ExecutionOutcome {
            success: true,
            artifact_ref: None,
            explanation: "ok".to_string(),
            error: None,
        }
    }

    fn titled(id: u64, title: &str) -> Task {
        let mut task = task(id, 0, &[], TaskStatus::InProgress);
        task.title = title.to_string();
        task
    }

    fn request(timeout: Duration) -> DispatchRequest {
        DispatchRequest {
            timeout,
            max_concurrent: 2,
        }
    }

    #[test]
    fn results_come_back_in_batch_order_with_kinds() {
        let worker = Arc::new(ScriptWorker);
        let finished = dispatch_batch(
            &worker,
            vec![
                titled(1, "ok"),
                titled(2, "error"),
                titled(3, "panic"),
                titled(4, "timeout"),
            ],
            &ProjectContext::default(),
            &request(Duration::from_secs(5)),
            &CancelToken::new(),
        );
        let summary: Vec<(u64, TaskStatus, Option<FailureKind>)> = finished
            .iter()
            .map(|entry| {
                (
                    entry.task_id.0,
                    entry.status,
                    entry.result.error.as_ref().map(|error| error.kind),
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, TaskStatus::Completed, None),
                (2, TaskStatus::Failed, Some(FailureKind::WorkerError)),
                (3, TaskStatus::Failed, Some(FailureKind::WorkerError)),
                (4, TaskStatus::Failed, Some(FailureKind::WorkerTimeout)),
            ]
        );
    }

    #[test]
    fn unrepresentable_timeout_waits_without_deadline() {
        let worker = Arc::new(ScriptWorker);
        let finished = dispatch_batch(
            &worker,
            vec![titled(1, "ok"), titled(2, "error")],
            &ProjectContext::default(),
            &request(Duration::MAX),
            &CancelToken::new(),
        );
        let statuses: Vec<TaskStatus> = finished.iter().map(|entry| entry.status).collect();
        assert_eq!(statuses, [TaskStatus::Completed, TaskStatus::Failed]);
    }

    #[test]
    fn missed_deadline_is_worker_timeout() {
        let worker = Arc::new(ScriptWorker);
        let finished = dispatch_batch(
            &worker,
            vec![titled(1, "slow"), titled(2, "ok")],
            &ProjectContext::default(),
            &request(Duration::from_millis(200)),
            &CancelToken::new(),
        );
        assert_eq!(finished[0].status, TaskStatus::Failed);
        assert_eq!(
            finished[0].result.error.as_ref().map(|error| error.kind),
            Some(FailureKind::WorkerTimeout)
        );
        assert_eq!(finished[1].status, TaskStatus::Completed);
    }

    #[test]
    fn cancelled_token_abandons_every_task() {
        let worker = Arc::new(ScriptWorker);
        let cancel = CancelToken::new();
        cancel.cancel();
        let finished = dispatch_batch(
            &worker,
            vec![titled(1, "ok"), titled(2, "ok"), titled(3, "ok")],
            &ProjectContext::default(),
            &request(Duration::from_secs(5)),
            &cancel,
        );
        assert_eq!(finished.len(), 3);
        assert!(finished.iter().all(|entry| {
            entry.result.error.as_ref().map(|error| error.kind) == Some(FailureKind::Cancelled)
        }));
    }

    #[test]
    fn cancellation_mid_wave_abandons_in_flight_task() {
        let worker = Arc::new(ScriptWorker);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            trigger.cancel();
        });
        let started = Instant::now();
        let finished = dispatch_batch(
            &worker,
            vec![titled(1, "slow")],
            &ProjectContext::default(),
            &request(Duration::from_secs(10)),
            &cancel,
        );
        canceller.join().expect("join canceller");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(
            finished[0].result.error.as_ref().map(|error| error.kind),
            Some(FailureKind::Cancelled)
        );
    }
}
