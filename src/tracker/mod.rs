//! Version-control plumbing behind the checkpoint layer.
//!
//! `GitClient` is the seam: the checkpoint manager talks to it, tests swap
//! in a double, and `Git2Client` does the real work via libgit2. The client
//! re-opens the repository per call so it stays `Send + Sync` without
//! holding libgit2 handles across awaits.

mod checkpoint;

pub use checkpoint::{CheckpointConfig, CheckpointManager};

use std::path::{Path, PathBuf};

use git2::{BranchType, IndexAddOption, Repository, Signature, StatusOptions};

use crate::errors::GitError;

/// Minimal git surface the checkpoint layer needs.
pub trait GitClient: Send + Sync {
    fn is_repo(&self) -> bool;
    fn current_branch(&self) -> Result<String, GitError>;
    fn branch_exists(&self, name: &str) -> Result<bool, GitError>;
    /// Create a local branch at HEAD. Does not switch to it.
    fn create_branch(&self, name: &str) -> Result<(), GitError>;
    fn checkout(&self, name: &str) -> Result<(), GitError>;
    /// Any staged, unstaged, or untracked changes.
    fn has_uncommitted_changes(&self) -> Result<bool, GitError>;
    fn add_all(&self) -> Result<(), GitError>;
    /// Commit the index; returns the new commit hash.
    fn commit(&self, message: &str) -> Result<String, GitError>;
}

/// libgit2-backed client rooted at one repository path.
#[derive(Debug)]
pub struct Git2Client {
    path: PathBuf,
}

impl Git2Client {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Like `new`, but fails fast when the path is not inside a repository.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, GitError> {
        let client = Self::new(path);
        client.repo()?;
        Ok(client)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn repo(&self) -> Result<Repository, GitError> {
        Repository::discover(&self.path).map_err(|_| GitError::NotRepo {
            path: self.path.display().to_string(),
        })
    }

    fn signature(repo: &Repository) -> Result<Signature<'static>, git2::Error> {
        repo.signature()
            .or_else(|_| Signature::now("foreman", "foreman@localhost"))
    }
}

impl GitClient for Git2Client {
    fn is_repo(&self) -> bool {
        self.repo().is_ok()
    }

    fn current_branch(&self) -> Result<String, GitError> {
        let repo = self.repo()?;
        let head = repo
            .head()
            .map_err(|e| GitError::operation("resolve HEAD", e.message()))?;
        head.shorthand()
            .map(str::to_string)
            .ok_or_else(|| GitError::operation("resolve HEAD", "HEAD is not a named branch"))
    }

    fn branch_exists(&self, name: &str) -> Result<bool, GitError> {
        let repo = self.repo()?;
        Ok(repo.find_branch(name, BranchType::Local).is_ok())
    }

    fn create_branch(&self, name: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        let head = repo
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(|e| GitError::operation("create branch", e.message()))?;
        repo.branch(name, &head, false)
            .map_err(|e| GitError::operation("create branch", e.message()))?;
        Ok(())
    }

    fn checkout(&self, name: &str) -> Result<(), GitError> {
        let repo = self.repo()?;
        let refname = format!("refs/heads/{name}");
        let obj = repo
            .revparse_single(&refname)
            .map_err(|e| GitError::operation("checkout", e.message()))?;
        repo.checkout_tree(&obj, None)
            .map_err(|e| GitError::operation("checkout", e.message()))?;
        repo.set_head(&refname)
            .map_err(|e| GitError::operation("checkout", e.message()))?;
        Ok(())
    }

    fn has_uncommitted_changes(&self) -> Result<bool, GitError> {
        let repo = self.repo()?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut opts))
            .map_err(|e| GitError::operation("status", e.message()))?;
        Ok(!statuses.is_empty())
    }

    fn add_all(&self) -> Result<(), GitError> {
        let repo = self.repo()?;
        let mut index = repo
            .index()
            .map_err(|e| GitError::operation("stage changes", e.message()))?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(|e| GitError::operation("stage changes", e.message()))?;
        index
            .write()
            .map_err(|e| GitError::operation("stage changes", e.message()))?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String, GitError> {
        let repo = self.repo()?;
        let op = |e: git2::Error| GitError::operation("commit", e.message().to_string());

        let mut index = repo.index().map_err(op)?;
        let tree_id = index.write_tree().map_err(op)?;
        let tree = repo.find_tree(tree_id).map_err(op)?;
        let sig = Self::signature(&repo).map_err(op)?;

        // First commit on an unborn branch has no parent.
        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<_> = parent.iter().collect();

        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .map_err(op)?;
        Ok(oid.to_string())
    }
}
