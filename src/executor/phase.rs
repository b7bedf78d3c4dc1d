//! Phase execution: run one phase's tasks in dependency order.
//!
//! The loop re-resolves readiness from a fresh state snapshot after every
//! task, so a completion immediately unblocks its dependents and a failure
//! immediately blocks them. A phase with failed tasks still runs every task
//! that remained independently runnable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::errors::{FailureKind, StateError};
use crate::events::{EventSink, OrchestrationEvent};
use crate::executor::task::{TaskContext, TaskExecutor};
use crate::graph::DependencyResolver;
use crate::plan::{TaskResult, TaskStatus};
use crate::state::StateStore;
use crate::tracker::CheckpointManager;

/// What happened in one phase run.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: u32,
    /// Task IDs that completed, in execution order.
    pub completed: Vec<String>,
    /// Task IDs that exhausted retries.
    pub failed: Vec<String>,
    /// Task IDs that never became runnable because a dependency failed.
    pub blocked: Vec<String>,
    /// One result per executed task, in execution order.
    pub results: Vec<TaskResult>,
    pub duration: Duration,
}

impl PhaseOutcome {
    pub fn success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct PhaseExecutor {
    executor: Arc<TaskExecutor>,
    store: Arc<dyn StateStore>,
    checkpoints: Option<Arc<CheckpointManager>>,
    events: EventSink,
    project: String,
}

impl PhaseExecutor {
    pub fn new(executor: Arc<TaskExecutor>, store: Arc<dyn StateStore>) -> Self {
        Self {
            executor,
            store,
            checkpoints: None,
            events: EventSink::disabled(),
            project: String::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointManager>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.project = project.to_string();
        self
    }

    /// Run every runnable task of the phase. Tasks already complete or
    /// skipped are left alone, which is what makes resumed runs work.
    pub async fn execute(&self, phase_number: u32) -> Result<PhaseOutcome, StateError> {
        let start = Instant::now();
        let phase = self
            .phase_snapshot(phase_number)
            .ok_or(StateError::PhaseNotFound {
                number: phase_number,
            })?;

        self.events.emit(OrchestrationEvent::PhaseStart {
            phase: phase.number,
            name: phase.name.clone(),
        });
        info!(phase = phase.number, name = %phase.name, tasks = phase.tasks.len(), "phase started");

        let ctx = TaskContext {
            project_name: self.project.clone(),
            phase_number: phase.number,
            phase_name: phase.name.clone(),
            phase_description: phase.description.clone(),
        };

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut results = Vec::new();
        let mut aborted = false;

        loop {
            // Fresh snapshot each round: statuses persisted below change
            // which tasks are runnable.
            let snapshot = self
                .phase_snapshot(phase_number)
                .ok_or(StateError::PhaseNotFound {
                    number: phase_number,
                })?;
            let resolver = DependencyResolver::new(&snapshot.tasks);
            let Some(task) = resolver.next_runnable().cloned() else {
                break;
            };

            self.store
                .set_task_status(&task.id, TaskStatus::InProgress, None)?;

            let max_retries = self.executor.config().max_retries;
            let mut result = self.executor.execute_with_retry(&task, &ctx, max_retries).await;

            if result.is_success() {
                self.store
                    .set_task_status(&task.id, TaskStatus::Complete, None)?;
                if let Some(cp) = &self.checkpoints {
                    if let Some(hash) = cp.commit_task(&result) {
                        result = result.with_checkpoint(&hash);
                    }
                }
                completed.push(task.id.clone());
            } else {
                let reason = result.failure_reason.clone();
                self.store
                    .set_task_status(&task.id, TaskStatus::Failed, reason)?;
                warn!(task = %task.id, reason = ?result.failure_reason, "task failed");
                failed.push(task.id.clone());
                if result.failure == Some(FailureKind::Aborted) {
                    aborted = true;
                }
            }

            self.store.append_result(result.clone())?;
            results.push(result);

            if aborted {
                break;
            }
        }

        // Anything still pending was blocked behind a failure (or the
        // abort); it keeps its pending status for the next run.
        let blocked: Vec<String> = self
            .phase_snapshot(phase_number)
            .map(|p| {
                p.tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Pending)
                    .map(|t| t.id.clone())
                    .collect()
            })
            .unwrap_or_default();

        let outcome = PhaseOutcome {
            phase: phase_number,
            completed,
            failed,
            blocked,
            results,
            duration: start.elapsed(),
        };

        self.events.emit(OrchestrationEvent::PhaseComplete {
            phase: phase_number,
            success: outcome.success(),
            completed: outcome.completed.len(),
            failed: outcome.failed.len(),
            duration_ms: outcome.duration.as_millis() as u64,
        });
        info!(
            phase = phase_number,
            completed = outcome.completed.len(),
            failed = outcome.failed.len(),
            blocked = outcome.blocked.len(),
            "phase finished"
        );

        Ok(outcome)
    }

    fn phase_snapshot(&self, number: u32) -> Option<crate::plan::ImplementationPhase> {
        self.store.phases().into_iter().find(|p| p.number == number)
    }
}
