//! Version-control backend boundary.
//!
//! All pipeline mutations of a working copy go through the
//! [`VersionControlBackend`] trait so the workflow and conflict engine can
//! be exercised against a fake in tests. [`working_copy::GitWorkingCopy`]
//! is the production implementation.

pub mod working_copy;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RepositoryConfig;
use crate::errors::GitError;

pub use working_copy::GitWorkingCopy;

/// Result of a no-commit, no-fast-forward trial merge.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// True if the merge completed without conflicts.
    pub clean: bool,
    /// Paths left unmerged in the working tree.
    pub conflicted_paths: Vec<String>,
    /// Raw merge command output, kept for conflict kinds the unmerged-path
    /// scan misses (rename / delete-modify).
    pub raw_output: String,
}

/// Operations against one local working copy, keyed by repository id.
///
/// Every call is blocking I/O against the working copy and must be treated
/// as a potentially long-running unit of work. Two concurrent mutating
/// calls against the same repository race; the workflow holds a
/// per-repository lock around its stage sequence.
#[async_trait]
pub trait VersionControlBackend: Send + Sync {
    /// Check out an existing local branch.
    async fn checkout(&self, branch: &str) -> Result<(), GitError>;

    /// Pull the current branch up to date. A working copy without a remote
    /// is left as-is.
    async fn pull(&self) -> Result<(), GitError>;

    /// Create (or reset) a local branch at the current HEAD.
    ///
    /// Re-creating an existing branch is a reset, not an error — branch
    /// names are deterministic and re-runs of a workflow are expected to
    /// land on the same name.
    async fn create_branch(&self, name: &str) -> Result<(), GitError>;

    /// Delete a local branch. Returns whether a branch was actually
    /// deleted; a missing branch with `ignore_missing` is `Ok(false)`.
    async fn delete_branch(&self, name: &str, ignore_missing: bool) -> Result<bool, GitError>;

    /// Attempt a no-commit, no-fast-forward merge of `source` into the
    /// currently checked-out branch. Conflicts are reported in the
    /// [`MergeOutcome`]; only non-conflict faults surface as errors.
    async fn trial_merge(&self, source: &str) -> Result<MergeOutcome, GitError>;

    /// Abort an in-progress merge, restoring the pre-merge tree.
    async fn abort_merge(&self) -> Result<(), GitError>;

    /// Stage the given paths and commit them, returning the commit hash.
    async fn stage_and_commit(&self, paths: &[String], message: &str) -> Result<String, GitError>;

    /// Paths that differ between two branches.
    async fn diff_name_only(&self, a: &str, b: &str) -> Result<Vec<String>, GitError>;

    /// Read a file from the working tree.
    async fn read_file(&self, path: &str) -> Result<String, GitError>;

    /// Write a file into the working tree, creating parent directories.
    async fn write_file(&self, path: &str, content: &str) -> Result<(), GitError>;

    /// Stage a single file.
    async fn stage_file(&self, path: &str) -> Result<(), GitError>;
}

/// Opens a backend for a configured repository.
pub trait BackendFactory: Send + Sync {
    fn open(&self, repo: &RepositoryConfig) -> Result<Arc<dyn VersionControlBackend>, GitError>;
}

/// Factory producing [`GitWorkingCopy`] backends over local paths.
#[derive(Debug, Default)]
pub struct LocalBackendFactory;

impl BackendFactory for LocalBackendFactory {
    fn open(&self, repo: &RepositoryConfig) -> Result<Arc<dyn VersionControlBackend>, GitError> {
        Ok(Arc::new(GitWorkingCopy::open(&repo.local_path)?))
    }
}
