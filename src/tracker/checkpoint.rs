//! Checkpointing policy on top of `GitClient`.
//!
//! Each implementation phase runs on its own branch; every task completion
//! and state change becomes a commit. Checkpointing is best-effort at the
//! orchestration boundary: a git hiccup is logged, never fatal to the run.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::GitError;
use crate::plan::{ImplementationPhase, TaskResult};
use crate::tracker::GitClient;

const COMMIT_DESCRIPTION_LIMIT: usize = 72;

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Master switch; when off every operation is a no-op returning `None`.
    pub enabled: bool,
    /// Commit after each completed task (phase branches are still created).
    pub auto_commit: bool,
    /// First path segment of phase branch names.
    pub branch_prefix: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_commit: true,
            branch_prefix: "foreman".to_string(),
        }
    }
}

impl CheckpointConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_branch_prefix(mut self, prefix: &str) -> Self {
        self.branch_prefix = prefix.to_string();
        self
    }

    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }
}

pub struct CheckpointManager {
    client: Arc<dyn GitClient>,
    config: CheckpointConfig,
}

impl CheckpointManager {
    pub fn new(client: Arc<dyn GitClient>, config: CheckpointConfig) -> Self {
        Self { client, config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Switch to the phase's working branch, creating it at HEAD if needed.
    /// Pending changes are committed first so the switch never clobbers
    /// work in progress. Returns the branch name, or `None` when disabled.
    pub fn start_phase(&self, phase: &ImplementationPhase) -> Result<Option<String>, GitError> {
        if !self.config.enabled {
            return Ok(None);
        }

        self.ensure_clean()?;

        let branch = format!(
            "{}/phase-{}-{}",
            self.config.branch_prefix,
            phase.number,
            slug(&phase.name)
        );
        if !self.client.branch_exists(&branch)? {
            self.client.create_branch(&branch)?;
            debug!(branch = %branch, "created phase branch");
        }
        self.client.checkout(&branch)?;
        Ok(Some(branch))
    }

    /// Commit the working tree for a completed task. Best-effort: errors
    /// are logged and swallowed. Returns the commit hash, or `None` when
    /// disabled, auto-commit is off, or the tree is already clean.
    pub fn commit_task(&self, result: &TaskResult) -> Option<String> {
        if !self.config.auto_commit {
            return None;
        }
        let message = format!(
            "task: {} - {}",
            result.task_id,
            truncate_description(&result.summary)
        );
        match self.checkpoint(&message) {
            Ok(hash) => hash,
            Err(err) => {
                warn!(task = %result.task_id, error = %err, "task checkpoint failed");
                None
            }
        }
    }

    /// Commit a bookkeeping change (state file updates and the like).
    /// Best-effort like `commit_task`, and subject to the same auto-commit
    /// toggle.
    pub fn commit_state_change(&self, description: &str) -> Option<String> {
        if !self.config.auto_commit {
            return None;
        }
        match self.checkpoint(&format!("chore: {}", truncate_description(description))) {
            Ok(hash) => hash,
            Err(err) => {
                warn!(error = %err, "state checkpoint failed");
                None
            }
        }
    }

    /// Stage and commit everything. Clean tree is a no-op returning
    /// `Ok(None)`, which makes repeated checkpoints idempotent.
    pub fn checkpoint(&self, message: &str) -> Result<Option<String>, GitError> {
        if !self.config.enabled {
            return Ok(None);
        }
        if !self.client.has_uncommitted_changes()? {
            return Ok(None);
        }
        self.client.add_all()?;
        let hash = self.client.commit(message)?;
        debug!(hash = %hash, "checkpoint committed");
        Ok(Some(hash))
    }

    /// Commit any pending changes so a branch switch is safe.
    fn ensure_clean(&self) -> Result<(), GitError> {
        if self.client.has_uncommitted_changes()? {
            self.client.add_all()?;
            self.client.commit("chore: save pending changes")?;
        }
        Ok(())
    }
}

/// Lowercase, alphanumeric-and-hyphen branch segment from a phase name.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_hyphen = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_hyphen = false;
        } else if !last_hyphen {
            out.push('-');
            last_hyphen = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("phase");
    }
    out
}

/// Cap the description component of a commit message; the `<type>:` prefix
/// is not counted against the limit.
fn truncate_description(description: &str) -> String {
    if description.chars().count() <= COMMIT_DESCRIPTION_LIMIT {
        return description.to_string();
    }
    let mut out: String = description
        .chars()
        .take(COMMIT_DESCRIPTION_LIMIT - 1)
        .collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory git double recording calls.
    #[derive(Default)]
    struct FakeGit {
        dirty: Mutex<bool>,
        branches: Mutex<Vec<String>>,
        current: Mutex<String>,
        commits: Mutex<Vec<String>>,
    }

    impl FakeGit {
        fn dirty() -> Self {
            let git = Self::default();
            *git.dirty.lock().unwrap() = true;
            git
        }

        fn commits(&self) -> Vec<String> {
            self.commits.lock().unwrap().clone()
        }
    }

    impl GitClient for FakeGit {
        fn is_repo(&self) -> bool {
            true
        }
        fn current_branch(&self) -> Result<String, GitError> {
            Ok(self.current.lock().unwrap().clone())
        }
        fn branch_exists(&self, name: &str) -> Result<bool, GitError> {
            Ok(self.branches.lock().unwrap().iter().any(|b| b == name))
        }
        fn create_branch(&self, name: &str) -> Result<(), GitError> {
            self.branches.lock().unwrap().push(name.to_string());
            Ok(())
        }
        fn checkout(&self, name: &str) -> Result<(), GitError> {
            *self.current.lock().unwrap() = name.to_string();
            Ok(())
        }
        fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
            Ok(*self.dirty.lock().unwrap())
        }
        fn add_all(&self) -> Result<(), GitError> {
            Ok(())
        }
        fn commit(&self, message: &str) -> Result<String, GitError> {
            self.commits.lock().unwrap().push(message.to_string());
            *self.dirty.lock().unwrap() = false;
            Ok(format!("abc{:04}", self.commits.lock().unwrap().len()))
        }
    }

    fn phase() -> ImplementationPhase {
        ImplementationPhase::new(2, "Core Engine!", "build it", vec![])
    }

    #[test]
    fn test_start_phase_creates_and_checks_out_branch() {
        let git = Arc::new(FakeGit::default());
        let manager = CheckpointManager::new(git.clone(), CheckpointConfig::default());

        let branch = manager.start_phase(&phase()).unwrap().unwrap();
        assert_eq!(branch, "foreman/phase-2-core-engine");
        assert_eq!(git.current_branch().unwrap(), branch);

        // Second start reuses the existing branch.
        manager.start_phase(&phase()).unwrap();
        assert_eq!(git.branches.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_start_phase_commits_pending_changes_first() {
        let git = Arc::new(FakeGit::dirty());
        let manager = CheckpointManager::new(git.clone(), CheckpointConfig::default());
        manager.start_phase(&phase()).unwrap();
        assert_eq!(git.commits(), vec!["chore: save pending changes"]);
    }

    #[test]
    fn test_disabled_is_noop() {
        let git = Arc::new(FakeGit::dirty());
        let manager = CheckpointManager::new(git.clone(), CheckpointConfig::disabled());
        assert_eq!(manager.start_phase(&phase()).unwrap(), None);
        assert_eq!(manager.checkpoint("task: 1.1").unwrap(), None);
        assert!(git.commits().is_empty());
    }

    #[test]
    fn test_commit_task_then_clean_tree_is_none() {
        let git = Arc::new(FakeGit::dirty());
        let manager = CheckpointManager::new(git.clone(), CheckpointConfig::default());
        let result = TaskResult::success("1.1", "did the thing", Duration::from_secs(1));

        let first = manager.commit_task(&result);
        assert!(first.is_some());

        // Tree is clean now; an identical call commits nothing.
        let second = manager.commit_task(&result);
        assert_eq!(second, None);
        assert_eq!(git.commits().len(), 1);
    }

    #[test]
    fn test_auto_commit_off_skips_task_and_state_commits() {
        let git = Arc::new(FakeGit::dirty());
        let config = CheckpointConfig::default().with_auto_commit(false);
        let manager = CheckpointManager::new(git.clone(), config);
        let result = TaskResult::success("1.1", "did the thing", Duration::from_secs(1));
        assert_eq!(manager.commit_task(&result), None);
        assert_eq!(manager.commit_state_change("phase 1 complete"), None);
        assert!(git.commits().is_empty());
    }

    #[test]
    fn test_description_truncation() {
        let long = "x".repeat(200);
        let description = truncate_description(&long);
        assert_eq!(description.chars().count(), COMMIT_DESCRIPTION_LIMIT);
        assert!(description.ends_with('…'));

        assert_eq!(truncate_description("tidy up"), "tidy up");
    }

    #[test]
    fn test_commit_message_prefix_survives_truncation() {
        // The limit applies to the description, not the whole subject.
        let git = Arc::new(FakeGit::dirty());
        let manager = CheckpointManager::new(git.clone(), CheckpointConfig::default());
        let result = TaskResult::success("1.1", &"x".repeat(200), Duration::from_secs(1));

        manager.commit_task(&result).unwrap();
        let message = git.commits().pop().unwrap();
        assert!(message.starts_with("task: 1.1 - "));
        let description = message.strip_prefix("task: 1.1 - ").unwrap();
        assert_eq!(description.chars().count(), COMMIT_DESCRIPTION_LIMIT);
        assert!(description.ends_with('…'));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Core Engine!"), "core-engine");
        assert_eq!(slug("  API / Wiring  "), "api-wiring");
        assert_eq!(slug("!!!"), "phase");
    }
}
