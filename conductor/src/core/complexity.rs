//! Heuristic complexity assessment and the fallback plan shape it implies.

use std::fmt;
use std::ops::RangeInclusive;

use serde::Serialize;
use serde_json::json;

use crate::core::plan::{PlanDraft, TaskDraft};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl ComplexityLevel {
    /// Band for a 1..=10 score. Out-of-range scores clamp to the nearest band.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=3 => ComplexityLevel::Simple,
            4..=6 => ComplexityLevel::Moderate,
            7..=8 => ComplexityLevel::Complex,
            _ => ComplexityLevel::VeryComplex,
        }
    }

    /// Expected number of tasks for this band.
    pub fn task_count_range(self) -> RangeInclusive<usize> {
        match self {
            ComplexityLevel::Simple => 1..=3,
            ComplexityLevel::Moderate => 3..=8,
            ComplexityLevel::Complex => 5..=15,
            ComplexityLevel::VeryComplex => 10..=20,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Moderate => "moderate",
            ComplexityLevel::Complex => "complex",
            ComplexityLevel::VeryComplex => "very_complex",
        }
    }

    fn shape(self) -> &'static [(Stage, usize, u32)] {
        match self {
            ComplexityLevel::Simple => &[(Stage::Core, 1, 0), (Stage::Interface, 1, 0)],
            ComplexityLevel::Moderate => &[
                (Stage::Core, 1, 0),
                (Stage::Interface, 1, 0),
                (Stage::Integrate, 1, 1),
            ],
            ComplexityLevel::Complex => &[
                (Stage::Core, 1, 0),
                (Stage::Interface, 1, 0),
                (Stage::Integrate, 1, 1),
                (Stage::Polish, 2, 2),
            ],
            ComplexityLevel::VeryComplex => &[
                (Stage::Core, 3, 0),
                (Stage::Interface, 4, 1),
                (Stage::Integrate, 2, 2),
                (Stage::Polish, 1, 3),
            ],
        }
    }
}

impl fmt::Display for ComplexityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assessment {
    pub score: u8,
    pub level: ComplexityLevel,
    /// Keyword that decided the score, if any.
    pub matched: Option<&'static str>,
}

impl Assessment {
    pub fn from_score(score: u8) -> Self {
        let score = score.clamp(1, 10);
        Self {
            score,
            level: ComplexityLevel::from_score(score),
            matched: None,
        }
    }
}

/// Checked in order; first table with a hit decides the score.
const SCORE_KEYWORDS: &[(u8, &[&str])] = &[
    (2, &["simple", "basic", "hello", "calculator"]),
    (6, &["game", "web", "app", "system"]),
    (8, &["complex", "advanced", "enterprise"]),
];

const DEFAULT_SCORE: u8 = 4;

/// Score an objective by keyword. Unmatched objectives score 4.
pub fn assess(objective: &str) -> Assessment {
    let lowered = objective.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    for (score, keywords) in SCORE_KEYWORDS {
        if let Some(hit) = keywords.iter().find(|keyword| words.contains(*keyword)) {
            return Assessment {
                score: *score,
                level: ComplexityLevel::from_score(*score),
                matched: Some(*hit),
            };
        }
    }
    Assessment::from_score(DEFAULT_SCORE)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Core,
    Interface,
    Integrate,
    Polish,
}

impl Stage {
    fn key(self) -> &'static str {
        match self {
            Stage::Core => "core",
            Stage::Interface => "interface",
            Stage::Integrate => "integrate",
            Stage::Polish => "polish",
        }
    }

    fn title(self, objective: &str) -> String {
        match self {
            Stage::Core => format!("Implement Core Functionality for {objective}"),
            Stage::Interface => "Add User Interface and Interaction".to_string(),
            Stage::Integrate => "Integrate and Test Components".to_string(),
            Stage::Polish => "Enhance and Polish".to_string(),
        }
    }

    fn description(self, objective: &str) -> String {
        match self {
            Stage::Core => format!("Create the main implementation for: {objective}"),
            Stage::Interface => format!("Create user interface and interaction for: {objective}"),
            Stage::Integrate => "Integrate all components and ensure they work together".to_string(),
            Stage::Polish => "Add enhancements and polish to the implementation".to_string(),
        }
    }
}

/// Fallback plan for an assessed objective.
///
/// Every task depends on all tasks of the previous phase. Tasks within a
/// phase are independent.
pub fn fallback_draft(objective: &str, assessment: &Assessment) -> PlanDraft {
    let mut tasks: Vec<TaskDraft> = Vec::new();
    let mut previous_phase: Vec<String> = Vec::new();
    let mut current_phase: Vec<String> = Vec::new();
    let mut phase_of_current = 0;

    for (stage, count, phase) in assessment.level.shape() {
        if *phase != phase_of_current {
            previous_phase = std::mem::take(&mut current_phase);
            phase_of_current = *phase;
        }
        for part in 1..=*count {
            let (key, title) = if *count > 1 {
                (
                    format!("{}-{part}", stage.key()),
                    format!("{} (Part {part})", stage.title(objective)),
                )
            } else {
                (stage.key().to_string(), stage.title(objective))
            };
            tasks.push(TaskDraft {
                key: key.clone(),
                title,
                description: stage.description(objective),
                phase: *phase,
                dependencies: previous_phase.clone(),
                payload: json!({ "deliverable": "Working implementation" }),
            });
            current_phase.push(key);
        }
    }

    PlanDraft {
        objective: objective.to_string(),
        complexity_score: assessment.score,
        tasks,
        success_criteria: vec![
            "Working implementation".to_string(),
            "Functional and error-free".to_string(),
        ],
    }
}
