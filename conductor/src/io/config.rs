//! Conductor configuration stored under `.conductor/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Longest accepted per-task deadline (one week).
pub const MAX_TASK_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// Conductor configuration (TOML).
///
/// Passed by value to the manager and workers at construction; nothing reads
/// it from ambient state afterwards. Missing fields take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConductorConfig {
    /// Upper bound on tasks per batch.
    pub max_batch_size: usize,

    /// Completeness score (0..=10) at which a project is accepted.
    pub satisfaction_threshold: f64,

    /// Hard cap on improvement cycles per run.
    pub max_improvement_cycles: u32,

    /// Attempts per validation before the run aborts.
    pub max_validation_attempts: u32,

    /// Per-task worker deadline in seconds, at most [`MAX_TASK_TIMEOUT_SECS`].
    pub task_timeout_secs: u64,

    /// Worker threads running at once within a batch.
    pub max_concurrent_workers: usize,

    /// Cap on replacement tasks the evaluator proposes per cycle.
    pub max_replacement_tasks: usize,

    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker command, e.g. `["python3", "worker.py", "{{ domain }}"]`.
    /// Empty means tasks run through the dry-run worker.
    pub command: Vec<String>,

    /// Truncate worker stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            output_limit_bytes: 100_000,
        }
    }
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 3,
            satisfaction_threshold: 7.0,
            max_improvement_cycles: 3,
            max_validation_attempts: 2,
            task_timeout_secs: 10 * 60,
            max_concurrent_workers: 3,
            max_replacement_tasks: 5,
            worker: WorkerConfig::default(),
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(anyhow!("max_batch_size must be > 0"));
        }
        if !(0.0..=10.0).contains(&self.satisfaction_threshold) {
            return Err(anyhow!("satisfaction_threshold must be within 0..=10"));
        }
        if self.max_validation_attempts == 0 {
            return Err(anyhow!("max_validation_attempts must be > 0"));
        }
        if !(1..=MAX_TASK_TIMEOUT_SECS).contains(&self.task_timeout_secs) {
            return Err(anyhow!(
                "task_timeout_secs must be within 1..={MAX_TASK_TIMEOUT_SECS}"
            ));
        }
        if self.max_concurrent_workers == 0 {
            return Err(anyhow!("max_concurrent_workers must be > 0"));
        }
        if self.worker.output_limit_bytes == 0 {
            return Err(anyhow!("worker.output_limit_bytes must be > 0"));
        }
        if self
            .worker
            .command
            .first()
            .is_some_and(|program| program.trim().is_empty())
        {
            return Err(anyhow!("worker.command must start with a program name"));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
