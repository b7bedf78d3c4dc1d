//! Foreman - drive an implementation plan through an external coding agent.
//!
//! The engine takes an approved multi-phase plan, resolves each phase's
//! task dependency graph, and executes tasks one at a time by prompting a
//! coding agent subprocess. Progress is persisted after every task, each
//! phase runs on its own git branch with checkpoint commits, and the whole
//! run streams structured events to any listener.
//!
//! ```no_run
//! use std::sync::Arc;
//! use foreman::agent::{AgentConfig, ClaudeAdapter};
//! use foreman::orchestrator::{Orchestrator, OrchestratorConfig};
//! use foreman::state::JsonStateStore;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(JsonStateStore::load("state.json")?);
//! let adapter = Arc::new(ClaudeAdapter::new(AgentConfig::new("claude", ".".into())));
//! let orchestrator = Orchestrator::new(adapter, store, OrchestratorConfig::default())
//!     .with_project("my-project");
//! let result = orchestrator.execute().await?;
//! println!("completed {} phases", result.phases_completed);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod errors;
pub mod events;
pub mod executor;
pub mod graph;
pub mod orchestrator;
pub mod plan;
pub mod runner;
pub mod state;
pub mod tracker;

pub use errors::{FailureKind, GitError, GraphError, StateError};
pub use events::{EventSink, OrchestrationEvent};
pub use orchestrator::{OrchestrationResult, Orchestrator, OrchestratorConfig};
pub use plan::{ImplementationPhase, ImplementationPlan, PlanFile, Task, TaskResult, TaskStatus};
