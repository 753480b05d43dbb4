//! Bundled planners: keyword heuristics and a pre-written draft file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use super::Planner;
use crate::core::classifier::classify_text;
use crate::core::complexity::{Assessment, assess, fallback_draft};
use crate::core::plan::PlanDraft;
use crate::io::schema::{PLAN_DRAFT_SCHEMA, validate_against};

/// Keyword complexity assessment plus the staged fallback plan shape.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPlanner;

impl Planner for HeuristicPlanner {
    #[instrument(skip_all, fields(hint = ?complexity_hint))]
    fn plan(&self, objective: &str, complexity_hint: Option<u8>) -> Result<PlanDraft> {
        let assessment = match complexity_hint {
            Some(score) => Assessment::from_score(score),
            None => assess(objective),
        };
        info!(
            score = assessment.score,
            level = %assessment.level,
            matched = ?assessment.matched,
            "complexity assessed"
        );
        let mut draft = fallback_draft(objective, &assessment);
        let domain = classify_text(objective);
        for task in &mut draft.tasks {
            if let Value::Object(fields) = &mut task.payload {
                fields.insert("domain".to_string(), json!(domain));
            }
        }
        debug!(tasks = draft.tasks.len(), %domain, "fallback plan drafted");
        Ok(draft)
    }
}

/// Reads a draft written by an external planner (JSON, schema-checked).
///
/// The file's objective must match the requested one.
#[derive(Debug, Clone)]
pub struct FilePlanner {
    path: PathBuf,
}

impl FilePlanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Planner for FilePlanner {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn plan(&self, objective: &str, complexity_hint: Option<u8>) -> Result<PlanDraft> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read plan draft {}", self.path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse plan draft {}", self.path.display()))?;
        validate_against(PLAN_DRAFT_SCHEMA, &value, "plan draft")?;
        let mut draft: PlanDraft = serde_json::from_value(value)
            .with_context(|| format!("deserialize plan draft {}", self.path.display()))?;
        if draft.objective.trim() != objective.trim() {
            return Err(anyhow!(
                "plan draft objective '{}' does not match '{}'",
                draft.objective,
                objective
            ));
        }
        if let Some(score) = complexity_hint {
            draft.complexity_score = score;
        }
        Ok(draft)
    }
}
