//! Task and phase execution.
//!
//! `TaskExecutor` drives a single task through the agent adapter with
//! timeout, retry, and structured-output validation; `PhaseExecutor` runs a
//! whole phase in dependency order on top of it; `parser` turns agent text
//! into structured results.

pub mod parser;
mod phase;
mod task;

pub use parser::{ParsedTaskOutput, parse_task_output, parse_validation_verdict};
pub use phase::{PhaseExecutor, PhaseOutcome};
pub use task::{ExecutorConfig, TaskContext, TaskExecutor, ValidationCheck};
