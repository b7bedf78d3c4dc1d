//! Plan data model and JSON loading for the foreman engine.
//!
//! This module provides:
//! - `Task` and `TaskStatus` — the smallest unit of orchestrated work
//! - `ImplementationPhase` — an ordered group of tasks for one milestone
//! - `ImplementationPlan` / `PlanFile` — the approved plan and its on-disk form
//! - `TaskResult` — the immutable record of one task attempt
//! - `compare_task_ids` — component-wise ordering of dotted task IDs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::time::Duration;

use crate::errors::FailureKind;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is waiting to run.
    #[default]
    Pending,
    /// Task is currently being executed by the agent.
    InProgress,
    /// Task completed with all acceptance criteria passing.
    Complete,
    /// Task failed (retries exhausted or aborted).
    Failed,
    /// Task was explicitly skipped; counts as satisfied for dependents.
    Skipped,
}

impl TaskStatus {
    /// Check if the status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Skipped)
    }

    /// Check if the status satisfies a dependent task's dependency.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, Self::Complete | Self::Skipped)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A single unit of orchestrated work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Dotted `phase.sequence` identifier, e.g. "2.3". Unique plan-wide.
    pub id: String,
    /// What the task accomplishes.
    pub description: String,
    /// Ordered acceptance criteria the agent must satisfy.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// IDs of tasks that must be complete or skipped first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Current status; mutated only through the state store.
    #[serde(default)]
    pub status: TaskStatus,
    /// Why the task failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Task {
    /// Create a new pending task.
    pub fn new(id: &str, description: &str, criteria: Vec<String>, depends_on: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            acceptance_criteria: criteria,
            depends_on,
            status: TaskStatus::Pending,
            failure_reason: None,
        }
    }
}

/// An ordered group of tasks representing one implementation milestone.
///
/// Immutable once approved upstream; only task statuses within it mutate
/// during execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImplementationPhase {
    /// Positive, unique phase number. Defines the total phase order.
    pub number: u32,
    /// Human-readable name of the phase.
    pub name: String,
    /// What the phase delivers.
    #[serde(default)]
    pub description: String,
    /// Tasks in plan-declared order.
    pub tasks: Vec<Task>,
}

impl ImplementationPhase {
    pub fn new(number: u32, name: &str, description: &str, tasks: Vec<Task>) -> Self {
        Self {
            number,
            name: name.to_string(),
            description: description.to_string(),
            tasks,
        }
    }

    /// Find a task by ID within this phase.
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// The approved implementation plan handed to the orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImplementationPlan {
    pub phases: Vec<ImplementationPhase>,
}

impl ImplementationPlan {
    pub fn new(phases: Vec<ImplementationPhase>) -> Self {
        Self { phases }
    }

    /// All tasks across every phase, in phase order.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.phases.iter().flat_map(|p| p.tasks.iter()).collect()
    }

    /// Find a task by ID anywhere in the plan.
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.phases.iter().find_map(|p| p.get_task(id))
    }

    /// Find a phase by number.
    pub fn get_phase(&self, number: u32) -> Option<&ImplementationPhase> {
        self.phases.iter().find(|p| p.number == number)
    }

    /// Phases sorted ascending by number.
    pub fn phases_in_order(&self) -> Vec<&ImplementationPhase> {
        let mut phases: Vec<&ImplementationPhase> = self.phases.iter().collect();
        phases.sort_by_key(|p| p.number);
        phases
    }
}

/// Represents the full plan.json file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanFile {
    /// Project name the plan was generated for.
    pub project: String,
    /// Timestamp when the plan was approved.
    pub generated_at: chrono::DateTime<chrono::Utc>,
    /// The phases of the plan.
    pub phases: Vec<ImplementationPhase>,
}

impl PlanFile {
    /// Load a plan from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        let plan: PlanFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse plan JSON: {}", path.display()))?;
        Ok(plan)
    }

    /// Save the plan to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize plan to JSON")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write plan file: {}", path.display()))?;
        Ok(())
    }

    pub fn into_plan(self) -> ImplementationPlan {
        ImplementationPlan::new(self.phases)
    }
}

/// Compare two dotted task IDs component-wise.
///
/// `"1.2"` precedes `"1.10"` precedes `"2.1"`. Non-numeric components fall
/// back to lexicographic comparison; a shorter ID that is a prefix of a
/// longer one sorts first.
pub fn compare_task_ids(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(xn), Ok(yn)) => xn.cmp(&yn),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Files touched during a task attempt, as reported by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileChangeSummary {
    pub files_added: Vec<String>,
    pub files_modified: Vec<String>,
    pub files_deleted: Vec<String>,
}

impl FileChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.files_added.is_empty()
            && self.files_modified.is_empty()
            && self.files_deleted.is_empty()
    }

    pub fn total(&self) -> usize {
        self.files_added.len() + self.files_modified.len() + self.files_deleted.len()
    }
}

/// Pass/fail verdict for one acceptance criterion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionStatus {
    /// 1-based index into the task's acceptance criteria.
    pub index: usize,
    pub passed: bool,
}

/// Test counts reported by the agent.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
}

/// Token/cost usage for one attempt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageStats {
    pub tokens: u64,
    pub cost_usd: f64,
}

/// The immutable record of one completed, failed, or skipped task attempt.
///
/// A retry produces a new `TaskResult` superseding the old one; results are
/// appended to the state store, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// ID of the task this attempt belongs to.
    pub task_id: String,
    /// Final status of the attempt.
    pub status: TaskStatus,
    /// Human-readable summary of what the agent did.
    pub summary: String,
    /// Files changed during the attempt.
    pub files_changed: FileChangeSummary,
    /// Structured key decisions the agent reported.
    pub decisions: Vec<String>,
    /// Test counts the agent reported.
    pub tests: TestCounts,
    /// Per-criterion pass/fail list.
    pub criteria: Vec<CriterionStatus>,
    /// Token/cost usage.
    pub usage: UsageStats,
    /// What went wrong, if the attempt failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Human-readable failure reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Checkpoint commit hash, if one was created for this result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    /// Number of attempts made (1 for a first-try success).
    pub attempts: u32,
    /// Wall-clock duration of the attempt(s).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl TaskResult {
    /// Create a successful result. Callers fill the parsed detail fields.
    pub fn success(task_id: &str, summary: &str, duration: Duration) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Complete,
            summary: summary.to_string(),
            files_changed: FileChangeSummary::default(),
            decisions: Vec::new(),
            tests: TestCounts::default(),
            criteria: Vec::new(),
            usage: UsageStats::default(),
            failure: None,
            failure_reason: None,
            checkpoint: None,
            attempts: 1,
            duration,
        }
    }

    /// Create a failed result.
    pub fn failure(task_id: &str, kind: FailureKind, reason: &str, duration: Duration) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            summary: String::new(),
            files_changed: FileChangeSummary::default(),
            decisions: Vec::new(),
            tests: TestCounts::default(),
            criteria: Vec::new(),
            usage: UsageStats::default(),
            failure: Some(kind),
            failure_reason: Some(reason.to_string()),
            checkpoint: None,
            attempts: 1,
            duration,
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_checkpoint(mut self, hash: &str) -> Self {
        self.checkpoint = Some(hash.to_string());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Complete
    }
}

/// Serde helpers for Duration serialization as milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
