//! Keyword classification of objectives and tasks into work domains.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse work domain used as a dispatch key by workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Creative,
    Data,
    Game,
    Ui,
    Research,
    Code,
}

impl Domain {
    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Creative => "creative",
            Domain::Data => "data",
            Domain::Game => "game",
            Domain::Ui => "ui",
            Domain::Research => "research",
            Domain::Code => "code",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checked in order; the first table with a hit wins.
const KEYWORDS: &[(Domain, &[&str])] = &[
    (
        Domain::Creative,
        &["write", "story", "poem", "creative", "novel", "tale"],
    ),
    (
        Domain::Data,
        &["analyze", "data", "chart", "graph", "statistics", "csv"],
    ),
    (
        Domain::Game,
        &["game", "play", "player", "level", "arcade", "puzzle"],
    ),
    (
        Domain::Ui,
        &["interface", "ui", "form", "button", "gui", "design"],
    ),
    (
        Domain::Research,
        &["research", "investigate", "study", "report", "document"],
    ),
];

/// Classify free text by keyword. Matching is case-insensitive and by
/// whole word, so "build" is not mistaken for "ui".
///
/// Falls back to [`Domain::Code`].
pub fn classify_text(text: &str) -> Domain {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect();
    KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| words.contains(keyword)))
        .map(|(domain, _)| *domain)
        .unwrap_or(Domain::Code)
}
