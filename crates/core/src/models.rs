//! Domain model types used throughout mergeflow.
//!
//! These types bridge the automation workflow, the conflict engine, the
//! database layer, and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

/// Lifecycle status of a review.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Completed,
}

impl ReviewStatus {
    /// Parse a status string; unknown values map to `Pending`.
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "completed" => Self::Completed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// The reviewed artifact linked to a review: a generated test file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewArtifact {
    /// Destination path inside the repository, relative to its root.
    pub file_path: String,
    /// Full file content to commit.
    pub content: String,
}

impl ReviewArtifact {
    /// Short name derived from the artifact file path (stem without
    /// extension), used in commit messages and PR titles.
    pub fn name(&self) -> &str {
        let file_name = self
            .file_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.file_path);
        file_name.split('.').next().unwrap_or(file_name)
    }
}

/// Quality metrics attached to a review by the review subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewMetrics {
    /// Quality score in percent (0.0 - 100.0).
    pub quality_score: f64,
    /// When the review was completed, if it was.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Kind of a review comment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CommentKind {
    Comment,
    Issue,
    Suggestion,
}

impl std::fmt::Display for CommentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Comment => write!(f, "comment"),
            Self::Issue => write!(f, "issue"),
            Self::Suggestion => write!(f, "suggestion"),
        }
    }
}

/// A single comment left on a review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewComment {
    pub author: String,
    pub body: String,
    pub kind: CommentKind,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

/// Escalation bookkeeping for stalled reviews.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationInfo {
    /// How many times this review has been escalated.
    pub count: u32,
    /// When the last escalation notification was sent.
    pub last_escalated_at: DateTime<Utc>,
}

/// A review of a generated test artifact, owned by the review subsystem.
///
/// The workflow only reads reviews and triggers status transitions back
/// into the [`crate::review::ReviewStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub status: ReviewStatus,
    pub priority: String,
    pub assignee: Option<String>,
    pub reviewer: Option<String>,
    pub artifact: ReviewArtifact,
    pub metrics: Option<ReviewMetrics>,
    pub comments: Vec<ReviewComment>,
    pub escalation: Option<EscalationInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Git operation (the OperationLog record)
// ---------------------------------------------------------------------------

/// Kind of a version-control action attempted by the pipeline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GitOperationKind {
    BranchCreate,
    Commit,
    PrCreate,
    PrUpdate,
    Merge,
    BranchDelete,
}

impl GitOperationKind {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "commit" => Self::Commit,
            "pr_create" => Self::PrCreate,
            "pr_update" => Self::PrUpdate,
            "merge" => Self::Merge,
            "branch_delete" => Self::BranchDelete,
            _ => Self::BranchCreate,
        }
    }
}

impl std::fmt::Display for GitOperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BranchCreate => write!(f, "branch_create"),
            Self::Commit => write!(f, "commit"),
            Self::PrCreate => write!(f, "pr_create"),
            Self::PrUpdate => write!(f, "pr_update"),
            Self::Merge => write!(f, "merge"),
            Self::BranchDelete => write!(f, "branch_delete"),
        }
    }
}

/// Status of a git operation.
///
/// Transitions are monotonic: pending -> in_progress -> one of
/// {completed, failed, cancelled}. The persistence layer refuses updates
/// to records already in a terminal status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GitOperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl GitOperationStatus {
    /// Whether this status ends the record's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn from_str_val(s: &str) -> Self {
        match s {
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for GitOperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One record per attempted version-control action. Append-only audit trail:
/// created at stage start, moved to a terminal status at stage end, never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitOperation {
    pub id: String,
    pub repository_id: String,
    pub review_id: Option<i64>,
    pub kind: GitOperationKind,
    pub status: GitOperationStatus,
    pub branch_name: Option<String>,
    pub commit_hash: Option<String>,
    pub pr_number: Option<i64>,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub triggered_by: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GitOperation {
    /// Create a new in-progress operation with a fresh UUID.
    pub fn begin(
        repository_id: &str,
        review_id: Option<i64>,
        kind: GitOperationKind,
        triggered_by: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            repository_id: repository_id.to_string(),
            review_id,
            kind,
            status: GitOperationStatus::InProgress,
            branch_name: None,
            commit_hash: None,
            pr_number: None,
            output: None,
            error_message: None,
            triggered_by: triggered_by.to_string(),
            created_at: now,
            started_at: Some(now),
            completed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Pull request
// ---------------------------------------------------------------------------

/// Status of a pull request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestStatus {
    Draft,
    Open,
    Approved,
    ChangesRequested,
    Merged,
    Closed,
    Conflict,
}

impl PullRequestStatus {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "open" => Self::Open,
            "approved" => Self::Approved,
            "changes_requested" => Self::ChangesRequested,
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            "conflict" => Self::Conflict,
            _ => Self::Draft,
        }
    }
}

impl std::fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Open => write!(f, "open"),
            Self::Approved => write!(f, "approved"),
            Self::ChangesRequested => write!(f, "changes_requested"),
            Self::Merged => write!(f, "merged"),
            Self::Closed => write!(f, "closed"),
            Self::Conflict => write!(f, "conflict"),
        }
    }
}

/// CI state for a pull request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CiState {
    Pending,
    Running,
    Passed,
    Failed,
}

impl CiState {
    pub fn from_str_val(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "passed" => Self::Passed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for CiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Typed CI metadata on a pull request (not an untyped key-value bag).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiStatus {
    pub state: CiState,
    pub triggered_at: DateTime<Utc>,
}

/// The proposed merge produced by a workflow run. Created once per run;
/// mutated by the conflict and CI stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: String,
    pub repository_id: String,
    pub review_id: i64,
    pub pr_number: i64,
    pub title: String,
    pub description: String,
    pub source_branch: String,
    pub target_branch: String,
    pub status: PullRequestStatus,
    pub mergeable: Option<bool>,
    pub ci_status: Option<CiStatus>,
    pub merge_commit_sha: Option<String>,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Workflow run result
// ---------------------------------------------------------------------------

/// Outcome of one stage of the automation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: String,
    pub success: bool,
    pub message: String,
}

/// Aggregate outcome of one `process_approved_review` invocation.
///
/// Built fresh per call and never persisted. `stages` preserves execution
/// order; `success` is false only for precondition failures and operational
/// faults (an unresolved conflict is a stage-level outcome, see the error
/// taxonomy).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunResult {
    pub review_id: i64,
    pub stages: Vec<StageResult>,
    pub success: bool,
    pub error: Option<String>,
}

impl WorkflowRunResult {
    pub fn new(review_id: i64) -> Self {
        Self {
            review_id,
            stages: Vec::new(),
            success: true,
            error: None,
        }
    }

    /// Early-return failure result (review lookup / precondition errors).
    pub fn failed(review_id: i64, error: impl Into<String>) -> Self {
        Self {
            review_id,
            stages: Vec::new(),
            success: false,
            error: Some(error.into()),
        }
    }

    /// Append a stage outcome.
    pub fn push_stage(&mut self, stage: &str, success: bool, message: impl Into<String>) {
        self.stages.push(StageResult {
            stage: stage.to_string(),
            success,
            message: message.into(),
        });
    }

    /// Look up a stage result by name.
    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }
}

// ---------------------------------------------------------------------------
// Secondary operation reports
// ---------------------------------------------------------------------------

/// A regeneration request emitted for a rejected review when
/// auto-regeneration is enabled. Queuing it is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegenerationRequest {
    pub original_review_id: i64,
    pub original_artifact_path: String,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
}

/// Outcome of `process_rejected_review`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectionResult {
    pub review_id: i64,
    pub notified: bool,
    pub regeneration: Option<RegenerationRequest>,
}

/// One entry of the quality-gate checklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Quality-gate checklist result: `passed` is the AND of all checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGateReport {
    pub review_id: i64,
    pub checks: Vec<GateCheck>,
    pub passed: bool,
}

/// Outcome of one stalled-review sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StalledSweepReport {
    pub swept: usize,
    pub escalated: usize,
}

/// Outcome of one cleanup pass over merged pull requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub candidates: usize,
    pub deleted_branches: usize,
    pub skipped_missing: usize,
}
