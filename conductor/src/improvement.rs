//! Improvement cycle bookkeeping for one run.
//!
//! Scores are not persisted: a resumed project starts again at cycle 0.

use serde::Serialize;

/// What the manager does with the latest score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Score met the threshold.
    Accept,
    /// Score is short but the cycle cap is spent.
    Exhausted,
    /// Append proposed tasks and execute again; carries the new cycle count.
    Improve { cycle: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleState {
    cycle_count: u32,
    cap: u32,
    threshold: f64,
    scores: Vec<f64>,
}

impl CycleState {
    pub fn new(cap: u32, threshold: f64) -> Self {
        Self {
            cycle_count: 0,
            cap,
            threshold,
            scores: Vec::new(),
        }
    }

    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn last_score(&self) -> Option<f64> {
        self.scores.last().copied()
    }

    /// Every score seen this run, in order.
    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// Record `score` and decide. `cycle_count` never exceeds the cap.
    pub fn decide(&mut self, score: f64) -> Decision {
        self.scores.push(score);
        if score >= self.threshold {
            return Decision::Accept;
        }
        if self.cycle_count >= self.cap {
            return Decision::Exhausted;
        }
        self.cycle_count += 1;
        Decision::Improve {
            cycle: self.cycle_count,
        }
    }
}
