//! Single-task execution against the agent adapter.
//!
//! The executor owns the per-task contract: build the prompt, stream the
//! attempt, turn raw output into a validated `TaskResult`, and retry with
//! backoff. Failures never escape this boundary as errors; they become
//! failed results carrying a `FailureKind`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::agent::AgentAdapter;
use crate::errors::FailureKind;
use crate::events::{EventSink, OrchestrationEvent};
use crate::executor::parser::{parse_task_output, parse_validation_verdict};
use crate::plan::{Task, TaskResult};

/// Configuration for task execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt (so `max_retries = 2` means up to 3
    /// attempts).
    pub max_retries: u32,
    /// Base delay between attempts; doubled after each failure.
    pub retry_backoff: Duration,
    /// Run the secondary validation pass after a self-reported success.
    pub validation_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_retries: 2,
            retry_backoff: Duration::from_secs(2),
            validation_enabled: false,
        }
    }
}

impl ExecutorConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation_enabled = enabled;
        self
    }
}

/// Phase/project context the caller supplies for prompt construction.
/// The executor does not own or look up any of this.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub project_name: String,
    pub phase_number: u32,
    pub phase_name: String,
    pub phase_description: String,
}

/// Outcome of the secondary validation pass.
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub passed: bool,
    pub validator_output: String,
}

/// Drives exactly one task attempt (or a retry series) to completion.
pub struct TaskExecutor {
    adapter: Arc<dyn AgentAdapter>,
    config: ExecutorConfig,
    events: EventSink,
    aborted: Arc<AtomicBool>,
}

impl TaskExecutor {
    pub fn new(adapter: Arc<dyn AgentAdapter>, config: ExecutorConfig) -> Self {
        Self {
            adapter,
            config,
            events: EventSink::disabled(),
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set the event sink for progress updates.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Share an external cancellation flag (the orchestrator's).
    pub fn with_abort_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.aborted = flag;
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Signal the in-flight attempt to stop. The current attempt settles as
    /// failed with an `Aborted` reason and no further retries happen.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.adapter.abort();
    }

    /// Whether an adapter call is currently in flight.
    pub fn is_running(&self) -> bool {
        self.adapter.is_running()
    }

    /// Run one attempt. Infallible at this boundary: adapter errors,
    /// timeouts, and unmet criteria all become failed `TaskResult`s.
    pub async fn execute(&self, task: &Task, ctx: &TaskContext) -> TaskResult {
        self.execute_attempt(task, ctx, 1).await
    }

    /// Run up to `1 + max_retries` attempts, stopping at the first success.
    /// Emits a retry event between attempts and backs off exponentially.
    /// On exhaustion returns the last failed result annotated with the
    /// number of attempts made.
    pub async fn execute_with_retry(
        &self,
        task: &Task,
        ctx: &TaskContext,
        max_retries: u32,
    ) -> TaskResult {
        let attempts_allowed = max_retries + 1;
        let mut last = None;

        for attempt in 1..=attempts_allowed {
            let result = self.execute_attempt(task, ctx, attempt).await;

            if result.is_success() {
                return result.with_attempts(attempt);
            }

            let is_final = result
                .failure
                .is_some_and(|kind| !kind.is_retryable());
            let reason = result
                .failure_reason
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string());
            last = Some(result);

            if is_final || attempt == attempts_allowed {
                break;
            }

            self.events.emit(OrchestrationEvent::TaskRetry {
                task_id: task.id.clone(),
                attempt: attempt + 1,
                reason,
            });

            let backoff = self.config.retry_backoff * 2u32.saturating_pow(attempt - 1);
            debug!(task = %task.id, attempt, backoff_ms = backoff.as_millis() as u64, "backing off before retry");
            tokio::time::sleep(backoff).await;
        }

        let result = last.expect("at least one attempt was made");
        let attempts = result.attempts.max(1);
        result.with_attempts(attempts)
    }

    async fn execute_attempt(&self, task: &Task, ctx: &TaskContext, attempt: u32) -> TaskResult {
        let start = Instant::now();

        self.events.emit(OrchestrationEvent::TaskStart {
            task_id: task.id.clone(),
            attempt,
        });

        if self.aborted.load(Ordering::SeqCst) {
            let result = TaskResult::failure(
                &task.id,
                FailureKind::Aborted,
                "orchestration aborted before the attempt started",
                start.elapsed(),
            )
            .with_attempts(attempt);
            self.emit_terminal(&result);
            return result;
        }

        let prompt = build_prompt(task, ctx);
        let events = self.events.clone();
        let task_id = task.id.clone();
        let on_chunk = move |chunk: &str| {
            events.emit(OrchestrationEvent::TaskProgress {
                task_id: task_id.clone(),
                chunk: chunk.to_string(),
            });
        };

        let call = self.adapter.execute_stream(&prompt, &on_chunk);
        let output = match tokio::time::timeout(self.config.timeout, call).await {
            Err(_) => {
                // Reap the stuck process; the run itself is not aborted.
                self.adapter.abort();
                let result = TaskResult::failure(
                    &task.id,
                    FailureKind::Timeout,
                    &format!(
                        "agent exceeded the {}s attempt timeout",
                        self.config.timeout.as_secs()
                    ),
                    start.elapsed(),
                )
                .with_attempts(attempt);
                self.emit_terminal(&result);
                return result;
            }
            Ok(Err(err)) => {
                let result = TaskResult::failure(
                    &task.id,
                    FailureKind::ExecutionFailed,
                    &format!("agent invocation failed: {err:#}"),
                    start.elapsed(),
                )
                .with_attempts(attempt);
                self.emit_terminal(&result);
                return result;
            }
            Ok(Ok(output)) => output,
        };

        if self.aborted.load(Ordering::SeqCst) {
            let result = TaskResult::failure(
                &task.id,
                FailureKind::Aborted,
                "attempt aborted",
                start.elapsed(),
            )
            .with_attempts(attempt);
            self.emit_terminal(&result);
            return result;
        }

        if !output.success {
            let result = TaskResult::failure(
                &task.id,
                FailureKind::ExecutionFailed,
                &format!("agent exited with code {}", output.exit_code),
                start.elapsed(),
            )
            .with_attempts(attempt);
            self.emit_terminal(&result);
            return result;
        }

        // Agent self-reported success is necessary but not sufficient: the
        // structured output still has to check out.
        let parsed = parse_task_output(&output.output);

        if !parsed.completes(&task.id) {
            let result = TaskResult::failure(
                &task.id,
                FailureKind::ParseError,
                "output contained no completion marker for this task",
                start.elapsed(),
            )
            .with_attempts(attempt);
            self.emit_terminal(&result);
            return result;
        }

        let failed = parsed.failed_criteria();
        if !failed.is_empty() {
            let result = TaskResult::failure(
                &task.id,
                FailureKind::CriteriaNotMet,
                &format!("acceptance criteria failing: {failed:?}"),
                start.elapsed(),
            )
            .with_attempts(attempt);
            self.emit_terminal(&result);
            return result;
        }

        if self.config.validation_enabled {
            let check = self.validate(task, &output.output).await;
            if !check.passed {
                let result = TaskResult::failure(
                    &task.id,
                    FailureKind::ValidatorFailed,
                    &format!("validator rejected the output: {}", check.validator_output),
                    start.elapsed(),
                )
                .with_attempts(attempt);
                self.emit_terminal(&result);
                return result;
            }
        }

        let summary = parsed
            .summary
            .clone()
            .unwrap_or_else(|| format!("Task {} complete", task.id));
        let mut result = TaskResult::success(&task.id, &summary, start.elapsed());
        result.files_changed = parsed.files_changed;
        result.decisions = parsed.decisions;
        result.tests = parsed.tests;
        result.criteria = parsed.criteria;
        result.usage = parsed.usage;
        let result = result.with_attempts(attempt);

        self.emit_terminal(&result);
        result
    }

    /// Secondary confidence pass: re-prompt the agent to judge the produced
    /// output against the task's acceptance criteria, independent of the
    /// self-reported completion marker.
    pub async fn validate(&self, task: &Task, raw_output: &str) -> ValidationCheck {
        let prompt = build_validation_prompt(task, raw_output);

        match self.adapter.execute(&prompt).await {
            Ok(output) => match parse_validation_verdict(&output.output) {
                Some(passed) => ValidationCheck {
                    passed,
                    validator_output: output.output,
                },
                None => {
                    warn!(task = %task.id, "validator returned no recognizable verdict");
                    ValidationCheck {
                        passed: false,
                        validator_output: output.output,
                    }
                }
            },
            Err(err) => ValidationCheck {
                passed: false,
                validator_output: format!("validator invocation failed: {err:#}"),
            },
        }
    }

    fn emit_terminal(&self, result: &TaskResult) {
        let event = if result.is_success() {
            OrchestrationEvent::TaskComplete {
                task_id: result.task_id.clone(),
                result: Box::new(result.clone()),
            }
        } else {
            OrchestrationEvent::TaskFailed {
                task_id: result.task_id.clone(),
                result: Box::new(result.clone()),
            }
        };
        self.events.emit(event);
    }
}

fn build_prompt(task: &Task, ctx: &TaskContext) -> String {
    let criteria = task
        .acceptance_criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are implementing one task of phase {number} - {phase} for project {project}.

## PHASE CONTEXT
{context}

## TASK {id}
{description}

## ACCEPTANCE CRITERIA
{criteria}

## CRITICAL RULES
1. Work only on this task; do not start work that belongs to other tasks
2. Verify each acceptance criterion before reporting its status
3. Report every file you touch with <file action="added|modified|deleted">path</file>
4. Report each criterion with <criterion n="N" status="pass|fail"/>
5. Only output <task-complete>{id}</task-complete> when the task is FULLY complete and verified

When complete, output:
<summary>what you did and why</summary>
<criterion n="1" status="pass"/>
<task-complete>{id}</task-complete>"#,
        number = ctx.phase_number,
        phase = ctx.phase_name,
        project = ctx.project_name,
        context = ctx.phase_description,
        id = task.id,
        description = task.description,
        criteria = criteria,
    )
}

fn build_validation_prompt(task: &Task, raw_output: &str) -> String {
    let criteria = task
        .acceptance_criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are reviewing completed work for task {id}. Judge strictly.

## ACCEPTANCE CRITERIA
{criteria}

## REPORTED OUTPUT
{raw_output}

Assess whether the reported work actually satisfies every criterion.
Output exactly one verdict tag: <validation>pass</validation> or <validation>fail</validation>,
followed by a short justification."#,
        id = task.id,
        criteria = criteria,
        raw_output = raw_output,
    )
}
