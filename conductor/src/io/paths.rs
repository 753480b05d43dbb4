//! Canonical paths within `.conductor/` for a project root.

use std::path::{Path, PathBuf};

use crate::core::types::ProjectId;

#[derive(Debug, Clone)]
pub struct ConductorPaths {
    pub root: PathBuf,
    pub conductor_dir: PathBuf,
    pub state_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub config_path: PathBuf,
    pub tasks_path: PathBuf,
}

impl ConductorPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let conductor_dir = root.join(".conductor");
        let state_dir = conductor_dir.join("state");
        let reports_dir = conductor_dir.join("reports");
        Self {
            root,
            config_path: conductor_dir.join("config.toml"),
            tasks_path: state_dir.join("tasks.json"),
            conductor_dir,
            state_dir,
            reports_dir,
        }
    }

    /// `reports/<project>.json`
    pub fn report_json_path(&self, project_id: &ProjectId) -> PathBuf {
        self.reports_dir.join(format!("{project_id}.json"))
    }

    /// `reports/<project>.md`
    pub fn report_text_path(&self, project_id: &ProjectId) -> PathBuf {
        self.reports_dir.join(format!("{project_id}.md"))
    }

    /// Config path, overridden by `--config` when given.
    pub fn config_or(&self, explicit: Option<&Path>) -> PathBuf {
        explicit.map_or_else(|| self.config_path.clone(), Path::to_path_buf)
    }
}
