//! Typed error hierarchy for the foreman engine.
//!
//! Each subsystem gets its own enum:
//! - `GraphError` — dependency graph failures (only `execution_order` throws)
//! - `StateError` — illegal state-store operations, surfaced to the caller
//! - `GitError` — checkpoint failures, logged and treated as best-effort
//!
//! Task execution failures are deliberately *not* errors: they travel inside
//! `TaskResult` as a `FailureKind` so they never cross the executor boundary
//! as a `Result::Err` (the retry layer owns them).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the dependency graph resolver.
///
/// `validate()` reports problems as structured issues instead of erroring;
/// this type exists for `execution_order()`, which has no valid answer for a
/// cyclic graph and must refuse rather than return a partial order.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Circular dependency detected among tasks: {cycle:?}")]
    CircularDependency { cycle: Vec<String> },

    #[error("Task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },
}

/// Errors from the project state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Task {id} not found in plan")]
    TaskNotFound { id: String },

    #[error("Task {id} is not in failed status (current: {status}); only failed tasks can be retried")]
    TaskNotFailed { id: String, status: String },

    #[error("Phase {number} not found in plan")]
    PhaseNotFound { number: u32 },

    #[error("Failed to persist state: {0}")]
    PersistFailed(#[source] anyhow::Error),
}

/// Errors from the version-control checkpoint layer.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("Not a git repository: {path}")]
    NotRepo { path: String },

    #[error("Git operation '{operation}' failed: {message}")]
    OperationFailed { operation: String, message: String },
}

impl GitError {
    pub fn operation(operation: &str, err: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<git2::Error> for GitError {
    fn from(err: git2::Error) -> Self {
        Self::OperationFailed {
            operation: "git2".to_string(),
            message: err.message().to_string(),
        }
    }
}

/// Why a task attempt failed.
///
/// Every kind is recoverable at the retry layer except `Aborted`, which is
/// final regardless of retries remaining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The adapter exceeded its allotted duration.
    Timeout,
    /// Non-zero exit / adapter-level error.
    ExecutionFailed,
    /// Output contained no recognizable completion marker.
    ParseError,
    /// Structured output present, but one or more acceptance criteria failed.
    CriteriaNotMet,
    /// The secondary validation pass rejected the output.
    ValidatorFailed,
    /// The run was cancelled; no further retries are attempted.
    Aborted,
}

impl FailureKind {
    /// Whether the retry layer may attempt the task again.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Aborted)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::ExecutionFailed => "execution_failed",
            Self::ParseError => "parse_error",
            Self::CriteriaNotMet => "criteria_not_met",
            Self::ValidatorFailed => "validator_failed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_circular_carries_cycle() {
        let err = GraphError::CircularDependency {
            cycle: vec!["1.1".into(), "1.2".into()],
        };
        assert!(err.to_string().contains("1.1"));
        assert!(err.to_string().contains("1.2"));
    }

    #[test]
    fn state_error_task_not_failed_is_matchable() {
        let err = StateError::TaskNotFailed {
            id: "2.3".into(),
            status: "complete".into(),
        };
        match &err {
            StateError::TaskNotFailed { id, status } => {
                assert_eq!(id, "2.3");
                assert_eq!(status, "complete");
            }
            _ => panic!("Expected TaskNotFailed"),
        }
    }

    #[test]
    fn git_error_from_git2() {
        let inner = git2::Error::from_str("bad ref");
        let err: GitError = inner.into();
        assert!(err.to_string().contains("bad ref"));
    }

    #[test]
    fn failure_kind_retryability() {
        assert!(FailureKind::Timeout.is_retryable());
        assert!(FailureKind::ExecutionFailed.is_retryable());
        assert!(FailureKind::ParseError.is_retryable());
        assert!(FailureKind::CriteriaNotMet.is_retryable());
        assert!(FailureKind::ValidatorFailed.is_retryable());
        assert!(!FailureKind::Aborted.is_retryable());
    }

    #[test]
    fn failure_kind_display_matches_serde() {
        let json = serde_json::to_string(&FailureKind::CriteriaNotMet).unwrap();
        assert_eq!(json, "\"criteria_not_met\"");
        assert_eq!(FailureKind::CriteriaNotMet.to_string(), "criteria_not_met");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&GraphError::UnknownDependency {
            task: "1.1".into(),
            dependency: "9.9".into(),
        });
        assert_std_error(&StateError::TaskNotFound { id: "1.1".into() });
        assert_std_error(&GitError::NotRepo { path: "/tmp".into() });
    }
}
