//! Bundled workers: an external command and a dry run.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::{Worker, WorkerTimedOut};
use crate::core::types::{ExecutionOutcome, ProjectContext, Task};
use crate::io::config::WorkerConfig;
use crate::io::process::run_with_deadline;
use crate::io::schema::{EXECUTION_OUTCOME_SCHEMA, validate_against};

/// Document written to the worker's stdin.
#[derive(Debug, Serialize)]
struct WorkerInput<'a> {
    task: &'a Task,
    domain: &'a str,
    context: &'a ProjectContext,
}

/// Runs a configured command once per task.
///
/// Each argument is a minijinja template over `task_id`, `title`, `phase`,
/// `domain` and `project_id`. The task and project context go to stdin as
/// JSON; the command prints an execution outcome as JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandWorker {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandWorker {
    pub fn new(config: &WorkerConfig, workdir: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        if config.command.is_empty() {
            return Err(anyhow!("worker.command must be a non-empty array"));
        }
        Ok(Self {
            command: config.command.clone(),
            workdir: workdir.into(),
            timeout,
            output_limit_bytes: config.output_limit_bytes,
        })
    }

    fn render_args(&self, task: &Task, domain: &str) -> Result<Vec<String>> {
        let env = Environment::new();
        let ctx = context! {
            task_id => task.id.to_string(),
            title => task.title.as_str(),
            phase => task.phase,
            domain => domain,
            project_id => task.project_id.as_str(),
        };
        self.command
            .iter()
            .map(|arg| {
                env.render_str(arg, &ctx)
                    .with_context(|| format!("render worker argument '{arg}'"))
            })
            .collect()
    }
}

impl Worker for CommandWorker {
    #[instrument(skip_all, fields(task_id = %task.id))]
    fn execute(&self, task: &Task, context: &ProjectContext) -> Result<ExecutionOutcome> {
        let domain = self.classify(task);
        let args = self.render_args(task, domain.as_str())?;
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| anyhow!("worker command is empty"))?;

        let input = serde_json::to_vec(&WorkerInput {
            task,
            domain: domain.as_str(),
            context,
        })
        .context("serialize worker input")?;

        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&self.workdir);
        info!(program = %program, %domain, "starting worker command");

        let output = run_with_deadline(cmd, &input, self.timeout, self.output_limit_bytes)
            .context("run worker command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "worker command timed out");
            return Err(WorkerTimedOut(self.timeout).into());
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "worker command failed");
            return Err(anyhow!(
                "worker exited with status {:?}: {}",
                output.status.code(),
                output.stderr_summary()
            ));
        }
        if output.stdout.dropped > 0 {
            return Err(anyhow!(
                "worker stdout exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        let value: Value = serde_json::from_slice(&output.stdout.bytes)
            .with_context(|| format!("parse worker stdout as JSON: {}", output.stdout.text()))?;
        validate_against(EXECUTION_OUTCOME_SCHEMA, &value, "execution outcome")?;
        let outcome: ExecutionOutcome =
            serde_json::from_value(value).context("deserialize execution outcome")?;
        debug!(success = outcome.success, "worker outcome parsed");
        Ok(outcome)
    }
}

/// Completes every task without side effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunWorker;

impl Worker for DryRunWorker {
    fn execute(&self, task: &Task, context: &ProjectContext) -> Result<ExecutionOutcome> {
        let domain = self.classify(task);
        Ok(ExecutionOutcome {
            success: true,
            artifact_ref: None,
            explanation: format!(
                "dry run: {} [{}] after {} completed task(s)",
                task.title,
                domain,
                context.history.len()
            ),
            error: None,
        })
    }
}
