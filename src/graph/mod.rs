//! Dependency graph resolution for task scheduling.
//!
//! The resolver models the plan's tasks as a directed graph over task IDs
//! and answers the scheduling questions the executors need:
//!
//! 1. **Validation** — a full structural report (missing deps,
//!    self-references, cycles) without short-circuiting
//! 2. **Readiness** — which tasks can run given current statuses
//! 3. **Ordering** — a deterministic topological execution order
//!
//! ## Example
//!
//! ```
//! use foreman::graph::DependencyResolver;
//! use foreman::plan::Task;
//!
//! let tasks = vec![
//!     Task::new("1.1", "Scaffold crate", vec![], vec![]),
//!     Task::new("1.2", "Wire config", vec![], vec!["1.1".to_string()]),
//! ];
//!
//! let resolver = DependencyResolver::new(&tasks);
//! assert!(resolver.validate().valid);
//! assert_eq!(resolver.next_runnable().unwrap().id, "1.1");
//! ```

mod resolver;

pub use resolver::{DependencyResolver, GraphIssue, ValidationReport};
