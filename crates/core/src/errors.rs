//! Comprehensive error types for the mergeflow core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Business outcomes (a review not being approved, a conflict staying
//! unresolved) are *not* errors here — they travel inside result structs.
//! These enums are reserved for genuine operational faults.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from version-control operations against a local working copy.
#[derive(Debug, Error)]
pub enum GitError {
    /// The working-copy path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, tag, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// A `git` subprocess exited with a non-zero status for a reason other
    /// than a merge conflict.
    #[error("git command failed (exit {exit_code}): {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// A file inside the working copy could not be read or written.
    #[error("working tree file error at '{path}': {detail}")]
    WorkingTreeFile { path: String, detail: String },

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Workflow errors
// ---------------------------------------------------------------------------

/// Errors from the approved-review automation workflow.
///
/// Inside a pipeline run these are captured at stage boundaries and
/// folded into the [`crate::models::WorkflowRunResult`]; the secondary
/// operations (rejection, gates, sweeps) raise them directly.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The review id does not resolve.
    #[error("review #{0} not found")]
    ReviewNotFound(i64),

    /// The review is not in APPROVED status.
    #[error("review #{id} is not approved (status: {status})")]
    NotApproved { id: i64, status: String },

    /// No repository id was given and no active repository is configured.
    #[error("no active repository configured")]
    NoActiveRepository,

    /// The repository id does not resolve.
    #[error("repository '{0}' not found")]
    RepositoryNotFound(String),

    /// Underlying version-control fault during a stage.
    #[error("workflow git error: {0}")]
    Git(#[from] GitError),

    /// Database fault while recording workflow state.
    #[error("workflow database error: {0}")]
    Database(#[from] DatabaseError),

    /// Conflict-engine fault (not an unresolved conflict, an actual fault).
    #[error("workflow conflict error: {0}")]
    Conflict(#[from] ConflictError),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from the conflict detection / resolution engine.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The trial-merge mechanism failed and the diff fallback failed too.
    #[error("conflict detection failed for {source_branch} -> {target_branch}: {detail}")]
    DetectionFailed {
        source_branch: String,
        target_branch: String,
        detail: String,
    },

    /// Underlying version-control fault.
    #[error("conflict git error: {0}")]
    Git(#[from] GitError),

    /// Database fault while recording the merge operation.
    #[error("conflict database error: {0}")]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// An update would move a record backwards through its lifecycle.
    #[error("invalid status transition for {entity} {id}: already terminal")]
    TerminalStatus { entity: String, id: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from the notification boundary.
///
/// The workflow logs these and continues; they never abort a run.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The configured channel failed to deliver.
    #[error("notification delivery failed: {0}")]
    DeliveryFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = WorkflowError::ReviewNotFound(42);
        assert_eq!(err.to_string(), "review #42 not found");

        let err = WorkflowError::NotApproved {
            id: 7,
            status: "pending".into(),
        };
        assert!(err.to_string().contains("not approved"));

        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = GitError::CommandFailed {
            exit_code: 128,
            stderr: "fatal: not a git repository".into(),
        };
        assert!(err.to_string().contains("exit 128"));

        let err = ConflictError::DetectionFailed {
            source_branch: "feature/x".into(),
            target_branch: "main".into(),
            detail: "both paths failed".into(),
        };
        assert_eq!(
            err.to_string(),
            "conflict detection failed for feature/x -> main: both paths failed"
        );
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let git_err = GitError::RefNotFound("main".into());
        let core_err: CoreError = git_err.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let db_err = DatabaseError::NotFound {
            entity: "pull_request".into(),
            id: "abc".into(),
        };
        let core_err: CoreError = CoreError::Database(db_err);
        assert!(matches!(core_err, CoreError::Database(_)));
    }
}
