//! Durable project state: task statuses, results, approvals.
//!
//! The executors mutate state through the `StateStore` trait so tests can
//! observe transitions without touching disk; `JsonStateStore` is the real
//! implementation and persists every mutation atomically.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::StateError;
use crate::plan::{ImplementationPhase, ImplementationPlan, Task, TaskResult, TaskStatus};

/// Everything persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Phase currently being executed, if a run is underway.
    pub current_phase: Option<u32>,
    pub phases: Vec<ImplementationPhase>,
    /// Append-only history; a retried task accrues multiple entries.
    pub results: Vec<TaskResult>,
    pub approved_phases: Vec<u32>,
}

impl ProjectState {
    pub fn new(project: &str, plan: ImplementationPlan) -> Self {
        let now = Utc::now();
        Self {
            project: project.to_string(),
            created_at: now,
            updated_at: now,
            current_phase: None,
            phases: plan.phases,
            results: Vec::new(),
            approved_phases: Vec::new(),
        }
    }

    fn find_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.phases
            .iter_mut()
            .flat_map(|p| p.tasks.iter_mut())
            .find(|t| t.id == id)
    }
}

/// Read/write access to persisted project state.
///
/// Methods take `&self`; implementations are internally synchronized so a
/// single store can be shared across the orchestrator and executors.
pub trait StateStore: Send + Sync {
    /// Snapshot of all phases with current task statuses.
    fn phases(&self) -> Vec<ImplementationPhase>;

    /// Snapshot of one task.
    fn get_task(&self, id: &str) -> Option<Task>;

    /// Transition a task and persist. `reason` is recorded for failures
    /// and cleared otherwise.
    fn set_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        reason: Option<String>,
    ) -> Result<(), StateError>;

    /// Append a result to the run history and persist.
    fn append_result(&self, result: TaskResult) -> Result<(), StateError>;

    /// All recorded results for one task, oldest first.
    fn results_for(&self, task_id: &str) -> Vec<TaskResult>;

    /// Record human sign-off on a completed phase.
    fn approve_phase(&self, number: u32) -> Result<(), StateError>;

    fn is_phase_approved(&self, number: u32) -> bool;

    fn set_current_phase(&self, number: u32) -> Result<(), StateError>;

    fn current_phase(&self) -> Option<u32>;

    /// Reset a failed task to pending so the next run picks it up again.
    /// Rejects tasks in any other status.
    fn retry_task(&self, id: &str) -> Result<(), StateError>;

    /// Mark a task skipped; it then satisfies its dependents without ever
    /// running.
    fn skip_task(&self, id: &str) -> Result<(), StateError>;
}

/// File-backed store. Every mutation rewrites the state file via a
/// temp-file-then-rename so a crash never leaves a half-written file.
pub struct JsonStateStore {
    path: PathBuf,
    state: Mutex<ProjectState>,
}

impl JsonStateStore {
    /// Create a fresh store from a plan, overwriting any file at `path`.
    pub fn create(path: impl Into<PathBuf>, project: &str, plan: ImplementationPlan) -> anyhow::Result<Self> {
        let store = Self {
            path: path.into(),
            state: Mutex::new(ProjectState::new(project, plan)),
        };
        store.persist_locked(&store.state.lock().unwrap())?;
        Ok(store)
    }

    /// Load an existing state file.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file: {}", path.display()))?;
        let state: ProjectState = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse state file: {}", path.display()))?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_locked(&self, state: &ProjectState) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &json)
            .with_context(|| format!("Failed to write state file: {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace state file: {}", self.path.display()))?;
        debug!(path = %self.path.display(), "state persisted");
        Ok(())
    }

    fn mutate<F>(&self, f: F) -> Result<(), StateError>
    where
        F: FnOnce(&mut ProjectState) -> Result<(), StateError>,
    {
        let mut state = self.state.lock().unwrap();
        f(&mut state)?;
        state.updated_at = Utc::now();
        self.persist_locked(&state).map_err(StateError::PersistFailed)
    }
}

impl StateStore for JsonStateStore {
    fn phases(&self) -> Vec<ImplementationPhase> {
        self.state.lock().unwrap().phases.clone()
    }

    fn get_task(&self, id: &str) -> Option<Task> {
        self.state
            .lock()
            .unwrap()
            .phases
            .iter()
            .flat_map(|p| p.tasks.iter())
            .find(|t| t.id == id)
            .cloned()
    }

    fn set_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        reason: Option<String>,
    ) -> Result<(), StateError> {
        self.mutate(|state| {
            let task = state
                .find_task_mut(id)
                .ok_or_else(|| StateError::TaskNotFound { id: id.to_string() })?;
            task.status = status;
            task.failure_reason = if status == TaskStatus::Failed {
                reason
            } else {
                None
            };
            Ok(())
        })
    }

    fn append_result(&self, result: TaskResult) -> Result<(), StateError> {
        self.mutate(|state| {
            state.results.push(result);
            Ok(())
        })
    }

    fn results_for(&self, task_id: &str) -> Vec<TaskResult> {
        self.state
            .lock()
            .unwrap()
            .results
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect()
    }

    fn approve_phase(&self, number: u32) -> Result<(), StateError> {
        self.mutate(|state| {
            if !state.phases.iter().any(|p| p.number == number) {
                return Err(StateError::PhaseNotFound { number });
            }
            if !state.approved_phases.contains(&number) {
                state.approved_phases.push(number);
            }
            Ok(())
        })
    }

    fn is_phase_approved(&self, number: u32) -> bool {
        self.state
            .lock()
            .unwrap()
            .approved_phases
            .contains(&number)
    }

    fn set_current_phase(&self, number: u32) -> Result<(), StateError> {
        self.mutate(|state| {
            if !state.phases.iter().any(|p| p.number == number) {
                return Err(StateError::PhaseNotFound { number });
            }
            state.current_phase = Some(number);
            Ok(())
        })
    }

    fn current_phase(&self) -> Option<u32> {
        self.state.lock().unwrap().current_phase
    }

    fn retry_task(&self, id: &str) -> Result<(), StateError> {
        self.mutate(|state| {
            let task = state
                .find_task_mut(id)
                .ok_or_else(|| StateError::TaskNotFound { id: id.to_string() })?;
            if task.status != TaskStatus::Failed {
                return Err(StateError::TaskNotFailed {
                    id: id.to_string(),
                    status: task.status.to_string(),
                });
            }
            task.status = TaskStatus::Pending;
            task.failure_reason = None;
            Ok(())
        })
    }

    fn skip_task(&self, id: &str) -> Result<(), StateError> {
        self.mutate(|state| {
            let task = state
                .find_task_mut(id)
                .ok_or_else(|| StateError::TaskNotFound { id: id.to_string() })?;
            task.status = TaskStatus::Skipped;
            task.failure_reason = None;
            Ok(())
        })
    }
}
