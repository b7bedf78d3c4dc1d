//! Top-level orchestration: run a span of phases end to end.
//!
//! The orchestrator owns phase selection, the dry-run walk, checkpoint
//! branching, and the abort flag. Everything below it (phase loop, task
//! retries, git) is delegated.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::agent::AgentAdapter;
use crate::errors::FailureKind;
use crate::events::{EventSink, OrchestrationEvent};
use crate::executor::{ExecutorConfig, PhaseExecutor, PhaseOutcome, TaskExecutor};
use crate::graph::DependencyResolver;
use crate::plan::ImplementationPhase;
use crate::state::StateStore;
use crate::tracker::CheckpointManager;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// First phase to run; defaults to the plan's first phase.
    pub start_phase: Option<u32>,
    /// Last phase to run, inclusive; defaults to the plan's last phase.
    pub end_phase: Option<u32>,
    /// Walk the plan and report order without invoking the agent.
    pub dry_run: bool,
    /// Stop at the first phase with failed tasks instead of continuing.
    pub stop_on_failure: bool,
    pub task_timeout: Duration,
    pub max_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            start_phase: None,
            end_phase: None,
            dry_run: false,
            stop_on_failure: true,
            task_timeout: Duration::from_secs(300),
            max_retries: 2,
        }
    }
}

impl OrchestratorConfig {
    pub fn with_start_phase(mut self, phase: u32) -> Self {
        self.start_phase = Some(phase);
        self
    }

    pub fn with_end_phase(mut self, phase: u32) -> Self {
        self.end_phase = Some(phase);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_stop_on_failure(mut self, stop: bool) -> Self {
        self.stop_on_failure = stop;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

/// What a whole run produced.
#[derive(Debug, Clone)]
pub struct OrchestrationResult {
    pub phases_completed: usize,
    pub phases_failed: usize,
    pub outcomes: Vec<PhaseOutcome>,
    pub aborted: bool,
    pub duration: Duration,
}

impl OrchestrationResult {
    pub fn success(&self) -> bool {
        self.phases_failed == 0 && !self.aborted
    }
}

pub struct Orchestrator {
    adapter: Arc<dyn AgentAdapter>,
    store: Arc<dyn StateStore>,
    checkpoints: Option<Arc<CheckpointManager>>,
    config: OrchestratorConfig,
    events: EventSink,
    project: String,
    abort_flag: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        adapter: Arc<dyn AgentAdapter>,
        store: Arc<dyn StateStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            adapter,
            store,
            checkpoints: None,
            config,
            events: EventSink::disabled(),
            project: String::new(),
            abort_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_checkpoints(mut self, checkpoints: Arc<CheckpointManager>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.project = project.to_string();
        self
    }

    /// Request cancellation. Observed at task and phase boundaries; the
    /// in-flight agent call is killed.
    pub fn abort(&self) {
        self.abort_flag.store(true, Ordering::SeqCst);
        self.adapter.abort();
    }

    /// Run the configured phase span.
    pub async fn execute(&self) -> Result<OrchestrationResult> {
        let start = self.config.start_phase;
        self.run(start).await
    }

    /// Continue a previous run from the store's current-phase pointer.
    /// Completed tasks stay complete; only remaining work executes.
    pub async fn resume(&self) -> Result<OrchestrationResult> {
        let start = self.store.current_phase().or(self.config.start_phase);
        info!(start_phase = ?start, "resuming orchestration");
        self.run(start).await
    }

    async fn run(&self, start_phase: Option<u32>) -> Result<OrchestrationResult> {
        let started = Instant::now();
        let selection = self.select_phases(start_phase);

        self.events.emit(OrchestrationEvent::OrchestrationStart {
            total_phases: selection.len(),
        });

        if selection.is_empty() {
            warn!(start_phase = ?start_phase, end_phase = ?self.config.end_phase, "no phases selected; nothing to do");
            let result = OrchestrationResult {
                phases_completed: 0,
                phases_failed: 0,
                outcomes: Vec::new(),
                aborted: false,
                duration: started.elapsed(),
            };
            self.emit_final(&result);
            return Ok(result);
        }

        if self.config.dry_run {
            let result = self.dry_run(&selection, started);
            self.emit_final(&result);
            return Ok(result);
        }

        let exec_config = ExecutorConfig::default()
            .with_timeout(self.config.task_timeout)
            .with_max_retries(self.config.max_retries);
        let task_exec = Arc::new(
            TaskExecutor::new(self.adapter.clone(), exec_config)
                .with_events(self.events.clone())
                .with_abort_flag(self.abort_flag.clone()),
        );
        let mut phase_exec = PhaseExecutor::new(task_exec, self.store.clone())
            .with_events(self.events.clone())
            .with_project(&self.project);
        if let Some(cp) = &self.checkpoints {
            phase_exec = phase_exec.with_checkpoints(cp.clone());
        }

        let mut result = OrchestrationResult {
            phases_completed: 0,
            phases_failed: 0,
            outcomes: Vec::new(),
            aborted: false,
            duration: Duration::ZERO,
        };

        for phase in &selection {
            if self.abort_flag.load(Ordering::SeqCst) {
                result.aborted = true;
                break;
            }

            self.store
                .set_current_phase(phase.number)
                .with_context(|| format!("Failed to record current phase {}", phase.number))?;

            if let Some(cp) = &self.checkpoints {
                if let Err(err) = cp.start_phase(phase) {
                    warn!(phase = phase.number, error = %err, "phase branch setup failed; continuing without it");
                }
            }

            let outcome = phase_exec
                .execute(phase.number)
                .await
                .with_context(|| format!("Phase {} execution failed", phase.number))?;

            let phase_aborted = outcome
                .results
                .last()
                .is_some_and(|r| r.failure == Some(FailureKind::Aborted));

            if outcome.success() {
                result.phases_completed += 1;
                self.store
                    .approve_phase(phase.number)
                    .with_context(|| format!("Failed to mark phase {} approved", phase.number))?;
                if let Some(cp) = &self.checkpoints {
                    cp.commit_state_change(&format!(
                        "phase {} ({}) complete",
                        phase.number, phase.name
                    ));
                }
            } else {
                result.phases_failed += 1;
            }
            let failed_phase = !outcome.success();
            result.outcomes.push(outcome);

            if phase_aborted || self.abort_flag.load(Ordering::SeqCst) {
                result.aborted = true;
                break;
            }
            if failed_phase && self.config.stop_on_failure {
                info!(phase = phase.number, "stopping on phase failure");
                break;
            }
        }

        result.duration = started.elapsed();
        self.emit_final(&result);
        Ok(result)
    }

    /// Report each phase's planned execution order without running
    /// anything. Graph errors count the phase as failed.
    fn dry_run(&self, selection: &[ImplementationPhase], started: Instant) -> OrchestrationResult {
        let mut result = OrchestrationResult {
            phases_completed: 0,
            phases_failed: 0,
            outcomes: Vec::new(),
            aborted: false,
            duration: Duration::ZERO,
        };

        for phase in selection {
            let phase_start = Instant::now();
            self.events.emit(OrchestrationEvent::PhaseStart {
                phase: phase.number,
                name: phase.name.clone(),
            });

            let resolver = DependencyResolver::new(&phase.tasks);
            let (planned, failed) = match resolver.execution_order() {
                Ok(order) => {
                    let ids: Vec<String> = order.iter().map(|t| t.id.clone()).collect();
                    info!(phase = phase.number, order = ?ids, "dry run: planned order");
                    (ids, Vec::new())
                }
                Err(err) => {
                    warn!(phase = phase.number, error = %err, "dry run: phase graph invalid");
                    (Vec::new(), vec![format!("{err}")])
                }
            };

            let ok = failed.is_empty();
            if ok {
                result.phases_completed += 1;
            } else {
                result.phases_failed += 1;
            }

            let outcome = PhaseOutcome {
                phase: phase.number,
                completed: planned,
                failed: Vec::new(),
                blocked: Vec::new(),
                results: Vec::new(),
                duration: phase_start.elapsed(),
            };
            self.events.emit(OrchestrationEvent::PhaseComplete {
                phase: phase.number,
                success: ok,
                completed: outcome.completed.len(),
                failed: 0,
                duration_ms: outcome.duration.as_millis() as u64,
            });
            result.outcomes.push(outcome);

            if !ok && self.config.stop_on_failure {
                break;
            }
        }

        result.duration = started.elapsed();
        result
    }

    fn select_phases(&self, start_phase: Option<u32>) -> Vec<ImplementationPhase> {
        let mut phases = self.store.phases();
        phases.sort_by_key(|p| p.number);
        phases
            .into_iter()
            .filter(|p| start_phase.is_none_or(|s| p.number >= s))
            .filter(|p| self.config.end_phase.is_none_or(|e| p.number <= e))
            .collect()
    }

    fn emit_final(&self, result: &OrchestrationResult) {
        let event = if result.aborted {
            OrchestrationEvent::OrchestrationAborted {
                phases_completed: result.phases_completed,
                duration_ms: result.duration.as_millis() as u64,
            }
        } else {
            OrchestrationEvent::OrchestrationComplete {
                phases_completed: result.phases_completed,
                phases_failed: result.phases_failed,
                duration_ms: result.duration.as_millis() as u64,
            }
        };
        self.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentOutput, ChunkHandler};
    use crate::plan::{ImplementationPlan, Task, TaskStatus};
    use crate::state::JsonStateStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct CountingAdapter {
        calls: AtomicUsize,
    }

    impl CountingAdapter {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AgentAdapter for CountingAdapter {
        async fn execute(&self, prompt: &str) -> Result<AgentOutput> {
            self.execute_stream(prompt, &|_| {}).await
        }

        async fn execute_stream(
            &self,
            prompt: &str,
            _on_chunk: ChunkHandler<'_>,
        ) -> Result<AgentOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let id = prompt
                .lines()
                .find_map(|l| l.strip_prefix("## TASK "))
                .unwrap()
                .trim();
            Ok(AgentOutput {
                success: true,
                output: format!("<task-complete>{id}</task-complete>"),
                exit_code: 0,
                duration: Duration::from_millis(1),
            })
        }

        fn abort(&self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    fn two_phase_plan() -> ImplementationPlan {
        ImplementationPlan::new(vec![
            crate::plan::ImplementationPhase::new(
                1,
                "Foundation",
                "",
                vec![Task::new("1.1", "base", vec![], vec![])],
            ),
            crate::plan::ImplementationPhase::new(
                2,
                "Core",
                "",
                vec![Task::new("2.1", "engine", vec![], vec![])],
            ),
        ])
    }

    fn store_in(dir: &TempDir) -> Arc<JsonStateStore> {
        Arc::new(
            JsonStateStore::create(dir.path().join("state.json"), "demo", two_phase_plan())
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_execute_runs_selected_span_in_order() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let adapter = Arc::new(CountingAdapter::new());
        let orch = Orchestrator::new(adapter.clone(), store.clone(), OrchestratorConfig::default());

        let result = orch.execute().await.unwrap();
        assert!(result.success());
        assert_eq!(result.phases_completed, 2);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 2);
        assert!(store.is_phase_approved(1));
        assert!(store.is_phase_approved(2));
    }

    #[tokio::test]
    async fn test_phase_range_selection() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let adapter = Arc::new(CountingAdapter::new());
        let config = OrchestratorConfig::default()
            .with_start_phase(2)
            .with_end_phase(2);
        let orch = Orchestrator::new(adapter.clone(), store.clone(), config);

        let result = orch.execute().await.unwrap();
        assert_eq!(result.phases_completed, 1);
        assert_eq!(store.get_task("1.1").unwrap().status, TaskStatus::Pending);
        assert_eq!(store.get_task("2.1").unwrap().status, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn test_empty_selection_is_immediate_success() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let adapter = Arc::new(CountingAdapter::new());
        let config = OrchestratorConfig::default().with_start_phase(99);
        let orch = Orchestrator::new(adapter.clone(), store, config);

        let result = orch.execute().await.unwrap();
        assert!(result.success());
        assert_eq!(result.phases_completed, 0);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resume_starts_from_stored_pointer() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        store.set_current_phase(2).unwrap();
        let adapter = Arc::new(CountingAdapter::new());
        let orch = Orchestrator::new(adapter.clone(), store.clone(), OrchestratorConfig::default());

        let result = orch.resume().await.unwrap();
        assert_eq!(result.phases_completed, 1);
        assert_eq!(store.get_task("1.1").unwrap().status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_dry_run_reports_order_without_adapter() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let adapter = Arc::new(CountingAdapter::new());
        let config = OrchestratorConfig::default().with_dry_run(true);
        let orch = Orchestrator::new(adapter.clone(), store.clone(), config);

        let result = orch.execute().await.unwrap();
        assert!(result.success());
        assert_eq!(result.phases_completed, 2);
        assert_eq!(result.outcomes[0].completed, vec!["1.1"]);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
        // No state was mutated.
        assert_eq!(store.get_task("1.1").unwrap().status, TaskStatus::Pending);
    }
}
