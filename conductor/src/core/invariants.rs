//! Structural plan checks not expressible via JSON Schema.
//!
//! Every check returns a list of stable, human-readable messages. An empty
//! list means the input is valid.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::core::plan::{Plan, PlanDraft};
use crate::core::types::{TaskId, TaskSpec, TaskStatus};

/// Check a planner draft before anything is persisted:
/// - At least one task
/// - `complexity_score` within 1..=10
/// - Non-empty, unique keys and non-empty titles
/// - Dependencies name known keys, never the task itself, never a later phase
/// - The dependency graph is acyclic
pub fn validate_draft(draft: &PlanDraft) -> Vec<String> {
    let mut errors = Vec::new();

    if draft.objective.trim().is_empty() {
        errors.push("objective must not be empty".to_string());
    }
    if !(1..=10).contains(&draft.complexity_score) {
        errors.push(format!(
            "complexity_score {} outside 1..=10",
            draft.complexity_score
        ));
    }
    if draft.tasks.is_empty() {
        errors.push("plan has no tasks".to_string());
        return errors;
    }

    let mut phases: HashMap<&str, u32> = HashMap::new();
    for task in &draft.tasks {
        if task.key.trim().is_empty() {
            errors.push(format!("task '{}' has an empty key", task.title));
            continue;
        }
        if task.title.trim().is_empty() {
            errors.push(format!("{}: title must not be empty", task.key));
        }
        if phases.insert(task.key.as_str(), task.phase).is_some() {
            errors.push(format!("duplicate key '{}'", task.key));
        }
    }

    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in &draft.tasks {
        let mut seen = HashSet::new();
        for dep in &task.dependencies {
            if !seen.insert(dep.as_str()) {
                errors.push(format!("{}: duplicate dependency '{}'", task.key, dep));
                continue;
            }
            if dep == &task.key {
                errors.push(format!("{}: depends on itself", task.key));
                continue;
            }
            match phases.get(dep.as_str()) {
                None => errors.push(format!("{}: unknown dependency '{}'", task.key, dep)),
                Some(dep_phase) if *dep_phase > task.phase => errors.push(format!(
                    "{}: depends on '{}' in later phase {} (own phase {})",
                    task.key, dep, dep_phase, task.phase
                )),
                Some(_) => edges.entry(task.key.as_str()).or_default().push(dep.as_str()),
            }
        }
    }

    let keys: Vec<&str> = draft.tasks.iter().map(|task| task.key.as_str()).collect();
    if let Some(cycle) = find_cycle(&keys, &edges) {
        errors.push(format!("dependency cycle: {}", cycle.join(" -> ")));
    }

    errors
}

/// Check one task spec about to be appended to `plan`.
///
/// Dependencies must reference completed tasks already in the plan (a failed
/// task counts once a replacement of it completed), never one in a later
/// phase. A replacement must point at a failed task nothing else
/// replaces yet.
pub fn validate_task_spec(plan: &Plan, spec: &TaskSpec) -> Vec<String> {
    let mut errors = Vec::new();
    if spec.title.trim().is_empty() {
        errors.push("title must not be empty".to_string());
    }
    for dep in &spec.dependencies {
        match plan.task(*dep) {
            None => errors.push(format!("{}: unknown dependency {}", spec.title, dep)),
            Some(existing) if existing.phase > spec.phase => errors.push(format!(
                "{}: depends on {} in later phase {} (own phase {})",
                spec.title, dep, existing.phase, spec.phase
            )),
            Some(_) if !plan.dependency_satisfied(*dep) => errors.push(format!(
                "{}: dependency {} is not completed",
                spec.title, dep
            )),
            Some(_) => {}
        }
    }
    if let Some(original) = spec.replaces {
        match plan.task(original) {
            None => errors.push(format!("{}: replaces unknown task {}", spec.title, original)),
            Some(existing) if existing.status != TaskStatus::Failed => errors.push(format!(
                "{}: replaces {} which is {}, not failed",
                spec.title, original, existing.status
            )),
            Some(_) => {
                let latest = plan.resolve(original);
                if latest != original {
                    errors.push(format!(
                        "{}: {} is already replaced by {}",
                        spec.title, original, latest
                    ));
                }
            }
        }
    }
    errors
}

/// Check a plan loaded from the store:
/// - No duplicate ids, all tasks in the plan's project
/// - Dependencies known, not self, not in a later phase
/// - Acyclic dependency graph
pub fn validate_plan(plan: &Plan) -> Vec<String> {
    let mut errors = Vec::new();
    let mut phases: HashMap<TaskId, u32> = HashMap::new();
    for task in &plan.tasks {
        if phases.insert(task.id, task.phase).is_some() {
            errors.push(format!("duplicate id {}", task.id));
        }
        if task.project_id != plan.project_id {
            errors.push(format!(
                "{}: belongs to project {} not {}",
                task.id, task.project_id, plan.project_id
            ));
        }
    }

    let mut edges: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
    for task in &plan.tasks {
        for dep in &task.dependencies {
            if *dep == task.id {
                errors.push(format!("{}: depends on itself", task.id));
                continue;
            }
            match phases.get(dep) {
                None => errors.push(format!("{}: unknown dependency {}", task.id, dep)),
                Some(dep_phase) if *dep_phase > task.phase => errors.push(format!(
                    "{}: depends on {} in later phase {}",
                    task.id, dep, dep_phase
                )),
                Some(_) => edges.entry(task.id).or_default().push(*dep),
            }
        }
    }

    let ids: Vec<TaskId> = plan.tasks.iter().map(|task| task.id).collect();
    if let Some(cycle) = find_cycle(&ids, &edges) {
        let rendered: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        errors.push(format!("dependency cycle: {}", rendered.join(" -> ")));
    }

    errors
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Colour {
    White,
    Grey,
    Black,
}

/// Three-colour depth-first search for a cycle.
///
/// Nodes are visited in the given order. Returns the first cycle found as a
/// path that starts and ends on the same node.
pub fn find_cycle<K>(nodes: &[K], edges: &HashMap<K, Vec<K>>) -> Option<Vec<K>>
where
    K: Copy + Eq + Hash,
{
    let mut colour: HashMap<K, Colour> = nodes.iter().map(|node| (*node, Colour::White)).collect();
    let mut stack = Vec::new();
    for node in nodes {
        if colour.get(node) == Some(&Colour::White)
            && let Some(cycle) = visit(*node, edges, &mut colour, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit<K>(
    node: K,
    edges: &HashMap<K, Vec<K>>,
    colour: &mut HashMap<K, Colour>,
    stack: &mut Vec<K>,
) -> Option<Vec<K>>
where
    K: Copy + Eq + Hash,
{
    colour.insert(node, Colour::Grey);
    stack.push(node);
    for next in edges.get(&node).map(Vec::as_slice).unwrap_or_default() {
        match colour.get(next).copied().unwrap_or(Colour::Black) {
            Colour::Grey => {
                let start = stack.iter().position(|entry| entry == next).unwrap_or(0);
                let mut cycle = stack[start..].to_vec();
                cycle.push(*next);
                return Some(cycle);
            }
            Colour::White => {
                if let Some(cycle) = visit(*next, edges, colour, stack) {
                    return Some(cycle);
                }
            }
            Colour::Black => {}
        }
    }
    stack.pop();
    colour.insert(node, Colour::Black);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{draft, draft_task, plan_of, task};

    #[test]
    fn valid_draft_has_no_errors() {
        let draft = draft(vec![
            draft_task("a", 0, &[]),
            draft_task("b", 0, &["a"]),
            draft_task("c", 1, &["a", "b"]),
        ]);
        assert!(validate_draft(&draft).is_empty());
    }

    #[test]
    fn empty_draft_is_rejected() {
        let errors = validate_draft(&draft(Vec::new()));
        assert_eq!(errors, vec!["plan has no tasks".to_string()]);
    }

    #[test]
    fn complexity_out_of_range_is_rejected() {
        let mut draft = draft(vec![draft_task("a", 0, &[])]);
        draft.complexity_score = 11;
        let errors = validate_draft(&draft);
        assert!(errors.iter().any(|err| err.contains("outside 1..=10")));
    }

    #[test]
    fn cycle_is_reported_with_path() {
        let draft = draft(vec![
            draft_task("a", 0, &["c"]),
            draft_task("b", 0, &["a"]),
            draft_task("c", 0, &["b"]),
        ]);
        let errors = validate_draft(&draft);
        assert_eq!(errors, vec!["dependency cycle: a -> c -> b -> a".to_string()]);
    }

    #[test]
    fn malformed_references_are_reported() {
        let draft = draft(vec![
            draft_task("a", 0, &["a"]),
            draft_task("a", 0, &[]),
            draft_task("b", 0, &["missing"]),
            draft_task("c", 0, &["d"]),
            draft_task("d", 1, &[]),
        ]);
        let errors = validate_draft(&draft);
        assert!(errors.contains(&"a: depends on itself".to_string()));
        assert!(errors.contains(&"duplicate key 'a'".to_string()));
        assert!(errors.contains(&"b: unknown dependency 'missing'".to_string()));
        assert!(
            errors
                .iter()
                .any(|err| err.starts_with("c: depends on 'd' in later phase 1"))
        );
    }

    #[test]
    fn appended_spec_must_reference_existing_tasks() {
        let plan = plan_of(vec![
            task(1, 0, &[], TaskStatus::Completed),
            task(2, 1, &[1], TaskStatus::Pending),
        ]);
        let mut spec = TaskSpec::replacement_for(&task(9, 0, &[], TaskStatus::Failed));
        spec.replaces = None;
        spec.dependencies = vec![TaskId(1), TaskId(7)];
        let errors = validate_task_spec(&plan, &spec);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown dependency task-7"));

        spec.dependencies = vec![TaskId(2)];
        let errors = validate_task_spec(&plan, &spec);
        assert!(errors[0].contains("later phase 1"));
    }

    #[test]
    fn appended_spec_dependencies_must_be_completed() {
        let mut replacement = task(4, 0, &[], TaskStatus::Completed);
        replacement.replaces = Some(TaskId(2));
        let plan = plan_of(vec![
            task(1, 0, &[], TaskStatus::Failed),
            task(2, 0, &[], TaskStatus::Failed),
            task(3, 0, &[], TaskStatus::Pending),
            replacement,
        ]);
        let mut spec = TaskSpec::replacement_for(&task(9, 1, &[], TaskStatus::Failed));
        spec.replaces = None;

        spec.dependencies = vec![TaskId(1)];
        let errors = validate_task_spec(&plan, &spec);
        assert_eq!(errors, ["task-9 title: dependency task-1 is not completed"]);

        spec.dependencies = vec![TaskId(3)];
        assert_eq!(validate_task_spec(&plan, &spec).len(), 1);

        spec.dependencies = vec![TaskId(2), TaskId(4)];
        assert!(validate_task_spec(&plan, &spec).is_empty());
    }

    #[test]
    fn replacement_must_target_failed_task() {
        let plan = plan_of(vec![task(1, 0, &[], TaskStatus::Completed)]);
        let spec = TaskSpec::replacement_for(&plan.tasks[0]);
        let errors = validate_task_spec(&plan, &spec);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("not failed"));
    }

    #[test]
    fn failure_is_replaced_at_most_once() {
        let mut replacement = task(2, 0, &[], TaskStatus::Pending);
        replacement.replaces = Some(TaskId(1));
        let plan = plan_of(vec![task(1, 0, &[], TaskStatus::Failed), replacement]);
        let spec = TaskSpec::replacement_for(&plan.tasks[0]);
        let errors = validate_task_spec(&plan, &spec);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("already replaced by task-2"));
    }

    #[test]
    fn stored_plan_cycle_is_detected() {
        let plan = plan_of(vec![
            task(1, 0, &[2], TaskStatus::Pending),
            task(2, 0, &[1], TaskStatus::Pending),
        ]);
        let errors = validate_plan(&plan);
        assert_eq!(
            errors,
            vec!["dependency cycle: task-1 -> task-2 -> task-1".to_string()]
        );
    }

    #[test]
    fn find_cycle_handles_diamonds_without_false_positive() {
        let mut edges = HashMap::new();
        edges.insert(4, vec![2, 3]);
        edges.insert(2, vec![1]);
        edges.insert(3, vec![1]);
        assert_eq!(find_cycle(&[1, 2, 3, 4], &edges), None);
    }
}
