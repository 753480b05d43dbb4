//! Bundled completeness evaluator scoring by completion ratio.

use anyhow::Result;
use tracing::debug;

use super::{CompletenessEvaluator, Evaluation, EvaluationRequest};
use crate::core::types::TaskSpec;

/// Scores `10 * completed / live`, where live tasks are those no later task
/// replaces. Proposes one replacement per unreplaced failure.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRatioEvaluator {
    pub max_replacement_tasks: usize,
}

impl CompletionRatioEvaluator {
    pub fn new(max_replacement_tasks: usize) -> Self {
        Self {
            max_replacement_tasks,
        }
    }
}

impl CompletenessEvaluator for CompletionRatioEvaluator {
    fn evaluate(&self, request: &EvaluationRequest<'_>) -> Result<Evaluation> {
        let plan = request.plan;
        let failures = plan.unreplaced_failures();
        let replaced = plan
            .tasks
            .iter()
            .filter(|task| task.replaces.is_some())
            .count();
        let live = plan.tasks.len() - replaced;
        let completed = request.completed.len();

        let score = if live == 0 {
            0.0
        } else {
            let ratio = completed.min(live) as f64 / live as f64;
            (ratio * 100.0).round() / 10.0
        };

        let new_tasks: Vec<TaskSpec> = failures
            .iter()
            .take(self.max_replacement_tasks)
            .map(|task| TaskSpec::replacement_for(task))
            .collect();

        debug!(
            score,
            completed,
            live,
            proposed = new_tasks.len(),
            "completion ratio evaluated"
        );
        Ok(Evaluation {
            score,
            summary: format!(
                "{completed}/{live} tasks completed, {} failed without replacement",
                failures.len()
            ),
            new_tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{ContextEntry, TaskId, TaskStatus};
    use crate::test_support::{plan_of, task};

    #[test]
    fn scores_ratio_and_replaces_failures() {
        let plan = plan_of(vec![
            task(1, 0, &[], TaskStatus::Completed),
            task(2, 0, &[], TaskStatus::Completed),
            task(3, 0, &[], TaskStatus::Completed),
            task(4, 1, &[1], TaskStatus::Failed),
        ]);
        let completed: Vec<ContextEntry> = plan.completed().map(ContextEntry::from_task).collect();
        let evaluation = CompletionRatioEvaluator::new(5)
            .evaluate(&EvaluationRequest {
                plan: &plan,
                completed: &completed,
                cycle: 0,
            })
            .expect("evaluate");
        assert_eq!(evaluation.score, 7.5);
        assert_eq!(evaluation.new_tasks.len(), 1);
        assert_eq!(evaluation.new_tasks[0].replaces, Some(TaskId(4)));
        assert_eq!(evaluation.new_tasks[0].dependencies, vec![TaskId(1)]);
    }

    #[test]
    fn replaced_failures_do_not_count_against_score() {
        let mut replacement = task(2, 0, &[], TaskStatus::Completed);
        replacement.replaces = Some(TaskId(1));
        let plan = plan_of(vec![task(1, 0, &[], TaskStatus::Failed), replacement]);
        let completed: Vec<ContextEntry> = plan.completed().map(ContextEntry::from_task).collect();
        let evaluation = CompletionRatioEvaluator::new(5)
            .evaluate(&EvaluationRequest {
                plan: &plan,
                completed: &completed,
                cycle: 1,
            })
            .expect("evaluate");
        assert_eq!(evaluation.score, 10.0);
        assert!(evaluation.new_tasks.is_empty());
    }

    #[test]
    fn replacement_proposals_are_capped() {
        let plan = plan_of(vec![
            task(1, 0, &[], TaskStatus::Failed),
            task(2, 0, &[], TaskStatus::Failed),
            task(3, 0, &[], TaskStatus::Failed),
        ]);
        let evaluation = CompletionRatioEvaluator::new(2)
            .evaluate(&EvaluationRequest {
                plan: &plan,
                completed: &[],
                cycle: 0,
            })
            .expect("evaluate");
        assert_eq!(evaluation.score, 0.0);
        assert_eq!(evaluation.new_tasks.len(), 2);
    }
}
