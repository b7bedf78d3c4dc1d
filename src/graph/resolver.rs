//! Dependency resolution over an immutable task snapshot.
//!
//! The resolver is stateless: it is rebuilt from a fresh snapshot each
//! scheduling round instead of being incrementally maintained, which keeps
//! the acyclicity invariant trivial to verify for realistic plan sizes.

use std::collections::{HashMap, HashSet};

use crate::errors::GraphError;
use crate::plan::{Task, compare_task_ids};

/// Index into the task snapshot.
type TaskIndex = usize;

/// A structural problem found by `validate`.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphIssue {
    /// A dependency ID that no task in the set carries.
    Missing { task: String, dependency: String },
    /// A task listing itself as a dependency.
    SelfReference { task: String },
    /// A task participating in a dependency cycle.
    Circular { task: String, cycle: Vec<String> },
}

impl GraphIssue {
    /// The task the issue is attributed to.
    pub fn task_id(&self) -> &str {
        match self {
            Self::Missing { task, .. } => task,
            Self::SelfReference { task } => task,
            Self::Circular { task, .. } => task,
        }
    }
}

impl std::fmt::Display for GraphIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing { task, dependency } => {
                write!(f, "task {} depends on unknown task {}", task, dependency)
            }
            Self::SelfReference { task } => write!(f, "task {} depends on itself", task),
            Self::Circular { task, cycle } => {
                write!(f, "task {} is part of a dependency cycle: {:?}", task, cycle)
            }
        }
    }
}

/// Full validation report. Always complete, never short-circuited, so a
/// caller can show the user everything wrong with a plan at once.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<GraphIssue>,
}

/// Readiness and ordering queries over a snapshot of tasks.
#[derive(Debug)]
pub struct DependencyResolver {
    tasks: Vec<Task>,
    index_map: HashMap<String, TaskIndex>,
}

impl DependencyResolver {
    /// Snapshot the given tasks. Later status changes to the originals are
    /// not observed; build a fresh resolver per scheduling round.
    pub fn new(tasks: &[Task]) -> Self {
        let tasks: Vec<Task> = tasks.to_vec();
        let index_map = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        Self { tasks, index_map }
    }

    /// Number of tasks in the snapshot.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task by ID.
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.index_map.get(id).map(|&i| &self.tasks[i])
    }

    /// Validate the graph structure, reporting every issue found.
    ///
    /// A self-reference is reported as both `SelfReference` and `Circular`
    /// since the single-node cycle trivially satisfies the cycle test.
    pub fn validate(&self) -> ValidationReport {
        let mut issues = Vec::new();

        for task in &self.tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    issues.push(GraphIssue::SelfReference {
                        task: task.id.clone(),
                    });
                } else if !self.index_map.contains_key(dep) {
                    issues.push(GraphIssue::Missing {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        for cycle in self.find_cycles() {
            for task in &cycle {
                issues.push(GraphIssue::Circular {
                    task: task.clone(),
                    cycle: cycle.clone(),
                });
            }
        }

        ValidationReport {
            valid: issues.is_empty(),
            issues,
        }
    }

    /// True only if the task exists, is pending, and every dependency
    /// resolves to a task in terminal-success state. Unknown IDs are false.
    pub fn can_run(&self, id: &str) -> bool {
        let Some(task) = self.get_task(id) else {
            return false;
        };
        if task.status != crate::plan::TaskStatus::Pending {
            return false;
        }
        task.depends_on.iter().all(|dep| {
            self.get_task(dep)
                .is_some_and(|t| t.status.satisfies_dependents())
        })
    }

    /// The subset of a task's dependencies not yet complete/skipped, in
    /// declared order. Empty for unknown or dependency-free tasks. A
    /// dangling dependency ID is always blocking.
    pub fn blocking_deps(&self, id: &str) -> Vec<String> {
        let Some(task) = self.get_task(id) else {
            return Vec::new();
        };
        task.depends_on
            .iter()
            .filter(|dep| {
                !self
                    .get_task(dep)
                    .is_some_and(|t| t.status.satisfies_dependents())
            })
            .cloned()
            .collect()
    }

    /// The runnable task with the smallest dotted ID, or None.
    pub fn next_runnable(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .filter(|t| self.can_run(&t.id))
            .min_by(|a, b| compare_task_ids(&a.id, &b.id))
    }

    /// A topological ordering consistent with all dependency edges, ties
    /// broken by dotted-ID order for determinism.
    ///
    /// This is the one operation that refuses to degrade: a dangling
    /// dependency or a cycle means no valid order exists, so it errors
    /// rather than let tasks run before their prerequisites.
    pub fn execution_order(&self) -> Result<Vec<&Task>, GraphError> {
        // Dangling references make the edge set unsound; reject up front.
        for task in &self.tasks {
            for dep in &task.depends_on {
                if !self.index_map.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let n = self.tasks.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<TaskIndex>> = vec![Vec::new(); n];

        for (i, task) in self.tasks.iter().enumerate() {
            for dep in &task.depends_on {
                let d = self.index_map[dep];
                in_degree[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: Vec<TaskIndex> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while !ready.is_empty() {
            ready.sort_by(|&a, &b| compare_task_ids(&self.tasks[b].id, &self.tasks[a].id));
            let next = ready.pop().expect("ready set is non-empty");
            order.push(&self.tasks[next]);

            for &dep in &dependents[next] {
                in_degree[dep] -= 1;
                if in_degree[dep] == 0 {
                    ready.push(dep);
                }
            }
        }

        if order.len() != n {
            let cycle = self
                .find_cycles()
                .into_iter()
                .next()
                .unwrap_or_else(|| {
                    // Kahn's found a cycle the DFS must also find; fall back
                    // to the unprocessed nodes if they ever disagree.
                    in_degree
                        .iter()
                        .enumerate()
                        .filter(|&(_, deg)| *deg > 0)
                        .map(|(i, _)| self.tasks[i].id.clone())
                        .collect()
                });
            return Err(GraphError::CircularDependency { cycle });
        }

        Ok(order)
    }

    /// Every distinct cycle in the graph, each as the ordered list of task
    /// IDs composing it. Self-references count as single-node cycles.
    /// Edges to unknown IDs are ignored here (reported by `validate`).
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        const WHITE: u8 = 0; // unvisited
        const GRAY: u8 = 1; // in progress
        const BLACK: u8 = 2; // done

        let n = self.tasks.len();
        let mut color = vec![WHITE; n];
        let mut stack: Vec<TaskIndex> = Vec::new();
        let mut cycles: Vec<Vec<TaskIndex>> = Vec::new();
        let mut seen: HashSet<Vec<TaskIndex>> = HashSet::new();

        fn dfs(
            node: TaskIndex,
            tasks: &[Task],
            index_map: &HashMap<String, TaskIndex>,
            color: &mut [u8],
            stack: &mut Vec<TaskIndex>,
            cycles: &mut Vec<Vec<TaskIndex>>,
            seen: &mut HashSet<Vec<TaskIndex>>,
        ) {
            color[node] = GRAY;
            stack.push(node);

            for dep in &tasks[node].depends_on {
                let Some(&next) = index_map.get(dep) else {
                    continue;
                };
                match color[next] {
                    GRAY => {
                        // Everything from `next` to the top of the stack
                        // forms a cycle.
                        let start = stack
                            .iter()
                            .position(|&i| i == next)
                            .expect("gray node is on the stack");
                        let cycle: Vec<TaskIndex> = stack[start..].to_vec();
                        let mut key = cycle.clone();
                        key.sort_unstable();
                        if seen.insert(key) {
                            cycles.push(cycle);
                        }
                    }
                    WHITE => dfs(next, tasks, index_map, color, stack, cycles, seen),
                    _ => {}
                }
            }

            stack.pop();
            color[node] = BLACK;
        }

        for start in 0..n {
            if color[start] == WHITE {
                dfs(
                    start,
                    &self.tasks,
                    &self.index_map,
                    &mut color,
                    &mut stack,
                    &mut cycles,
                    &mut seen,
                );
            }
        }

        cycles
            .into_iter()
            .map(|cycle| cycle.into_iter().map(|i| self.tasks[i].id.clone()).collect())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::TaskStatus;

    fn task(id: &str, deps: Vec<&str>) -> Task {
        Task::new(
            id,
            &format!("Task {}", id),
            vec![],
            deps.into_iter().map(String::from).collect(),
        )
    }

    fn task_with_status(id: &str, deps: Vec<&str>, status: TaskStatus) -> Task {
        let mut t = task(id, deps);
        t.status = status;
        t
    }

    #[test]
    fn test_validate_clean_graph() {
        let tasks = vec![task("1.1", vec![]), task("1.2", vec!["1.1"])];
        let report = DependencyResolver::new(&tasks).validate();
        assert!(report.valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_validate_missing_dependency() {
        let tasks = vec![task("1.1", vec!["9.9"])];
        let report = DependencyResolver::new(&tasks).validate();
        assert!(!report.valid);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(
            report.issues[0],
            GraphIssue::Missing {
                task: "1.1".into(),
                dependency: "9.9".into()
            }
        );
    }

    #[test]
    fn test_validate_self_reference_reported_twice() {
        let tasks = vec![task("1.1", vec!["1.1"])];
        let report = DependencyResolver::new(&tasks).validate();
        assert!(!report.valid);
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, GraphIssue::SelfReference { task } if task == "1.1")));
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, GraphIssue::Circular { task, .. } if task == "1.1")));
    }

    #[test]
    fn test_validate_reports_all_issues_at_once() {
        let tasks = vec![
            task("1.1", vec!["9.9"]),
            task("1.2", vec!["1.3"]),
            task("1.3", vec!["1.2"]),
        ];
        let report = DependencyResolver::new(&tasks).validate();
        assert!(!report.valid);
        // One missing + one circular issue per cycle member.
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, GraphIssue::Missing { .. })));
        let circular: Vec<_> = report
            .issues
            .iter()
            .filter(|i| matches!(i, GraphIssue::Circular { .. }))
            .collect();
        assert_eq!(circular.len(), 2);
    }

    #[test]
    fn test_can_run_basics() {
        let tasks = vec![
            task_with_status("1.1", vec![], TaskStatus::Complete),
            task("1.2", vec!["1.1"]),
            task("1.3", vec!["1.2"]),
        ];
        let resolver = DependencyResolver::new(&tasks);

        assert!(!resolver.can_run("1.1")); // not pending
        assert!(resolver.can_run("1.2"));
        assert!(!resolver.can_run("1.3")); // dep pending
        assert!(!resolver.can_run("9.9")); // unknown
    }

    #[test]
    fn test_can_run_skipped_dependency_satisfies() {
        let tasks = vec![
            task_with_status("1.1", vec![], TaskStatus::Skipped),
            task("1.2", vec!["1.1"]),
        ];
        assert!(DependencyResolver::new(&tasks).can_run("1.2"));
    }

    #[test]
    fn test_can_run_failed_dependency_blocks() {
        let tasks = vec![
            task_with_status("1.1", vec![], TaskStatus::Failed),
            task("1.2", vec!["1.1"]),
        ];
        assert!(!DependencyResolver::new(&tasks).can_run("1.2"));
    }

    #[test]
    fn test_can_run_missing_dependency_always_false() {
        let tasks = vec![task("1.1", vec!["9.9"])];
        assert!(!DependencyResolver::new(&tasks).can_run("1.1"));
    }

    #[test]
    fn test_blocking_deps_declared_order() {
        let tasks = vec![
            task_with_status("1.1", vec![], TaskStatus::Complete),
            task_with_status("1.2", vec![], TaskStatus::Failed),
            task("1.3", vec![]),
            task("2.1", vec!["1.2", "1.1", "1.3"]),
        ];
        let resolver = DependencyResolver::new(&tasks);
        assert_eq!(resolver.blocking_deps("2.1"), vec!["1.2", "1.3"]);
        assert!(resolver.blocking_deps("1.1").is_empty());
        assert!(resolver.blocking_deps("9.9").is_empty());
    }

    #[test]
    fn test_next_runnable_smallest_id_first() {
        let tasks = vec![task("1.2", vec![]), task("1.1", vec![]), task("1.10", vec![])];
        let resolver = DependencyResolver::new(&tasks);
        assert_eq!(resolver.next_runnable().unwrap().id, "1.1");
    }

    #[test]
    fn test_next_runnable_progression() {
        // Two-task chain: 1.1, then 1.2 depends on 1.1.
        let mut tasks = vec![task("1.1", vec![]), task("1.2", vec!["1.1"])];
        let resolver = DependencyResolver::new(&tasks);
        assert_eq!(resolver.next_runnable().unwrap().id, "1.1");

        tasks[0].status = TaskStatus::Complete;
        let resolver = DependencyResolver::new(&tasks);
        assert_eq!(resolver.next_runnable().unwrap().id, "1.2");

        tasks[1].status = TaskStatus::Complete;
        let resolver = DependencyResolver::new(&tasks);
        assert!(resolver.next_runnable().is_none());
    }

    #[test]
    fn test_next_runnable_empty_set() {
        let resolver = DependencyResolver::new(&[]);
        assert!(resolver.next_runnable().is_none());
    }

    #[test]
    fn test_execution_order_respects_dependencies() {
        let tasks = vec![
            task("1.3", vec!["1.1", "1.2"]),
            task("1.1", vec![]),
            task("1.2", vec!["1.1"]),
        ];
        let resolver = DependencyResolver::new(&tasks);
        let order: Vec<&str> = resolver
            .execution_order()
            .unwrap()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(order, vec!["1.1", "1.2", "1.3"]);
    }

    #[test]
    fn test_execution_order_diamond() {
        // A; B dep A; C dep A; D dep [B, C]
        let tasks = vec![
            task("1.1", vec![]),
            task("1.2", vec!["1.1"]),
            task("1.3", vec!["1.1"]),
            task("1.4", vec!["1.2", "1.3"]),
        ];
        let resolver = DependencyResolver::new(&tasks);
        assert!(resolver.validate().valid);

        let order: Vec<&str> = resolver
            .execution_order()
            .unwrap()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        let pos = |id: &str| order.iter().position(|&t| t == id).unwrap();
        assert!(pos("1.1") < pos("1.2"));
        assert!(pos("1.1") < pos("1.3"));
        assert!(pos("1.2") < pos("1.4"));
        assert!(pos("1.3") < pos("1.4"));
    }

    #[test]
    fn test_execution_order_ties_broken_by_id() {
        let tasks = vec![task("2.1", vec![]), task("1.2", vec![]), task("1.1", vec![])];
        let resolver = DependencyResolver::new(&tasks);
        let order: Vec<&str> = resolver
            .execution_order()
            .unwrap()
            .iter()
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(order, vec!["1.1", "1.2", "2.1"]);
    }

    #[test]
    fn test_execution_order_fails_on_cycle() {
        let tasks = vec![
            task("1.1", vec!["1.3"]),
            task("1.2", vec!["1.1"]),
            task("1.3", vec!["1.2"]),
        ];
        let resolver = DependencyResolver::new(&tasks);
        let err = resolver.execution_order().unwrap_err();
        match err {
            GraphError::CircularDependency { cycle } => {
                assert_eq!(cycle.len(), 3);
            }
            other => panic!("expected CircularDependency, got {:?}", other),
        }
        assert!(!resolver.validate().valid);
        assert!(!resolver.find_cycles().is_empty());
    }

    #[test]
    fn test_execution_order_fails_on_unknown_dependency() {
        let tasks = vec![task("1.1", vec!["9.9"])];
        let err = DependencyResolver::new(&tasks).execution_order().unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
    }

    #[test]
    fn test_find_cycles_none_for_acyclic() {
        let tasks = vec![task("1.1", vec![]), task("1.2", vec!["1.1"])];
        assert!(DependencyResolver::new(&tasks).find_cycles().is_empty());
    }

    #[test]
    fn test_find_cycles_distinct_cycles() {
        let tasks = vec![
            task("1.1", vec!["1.2"]),
            task("1.2", vec!["1.1"]),
            task("2.1", vec!["2.2"]),
            task("2.2", vec!["2.1"]),
            task("3.1", vec![]),
        ];
        let cycles = DependencyResolver::new(&tasks).find_cycles();
        assert_eq!(cycles.len(), 2);
        for cycle in &cycles {
            assert_eq!(cycle.len(), 2);
        }
    }

    #[test]
    fn test_find_cycles_self_loop() {
        let tasks = vec![task("1.1", vec!["1.1"])];
        let cycles = DependencyResolver::new(&tasks).find_cycles();
        assert_eq!(cycles, vec![vec!["1.1".to_string()]]);
    }
}
