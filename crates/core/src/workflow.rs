//! The review-to-merge automation pipeline.
//!
//! [`AutomationWorkflow`] turns an approved review into a branch, a
//! commit, and a pull request, then runs conflict detection and CI
//! hand-off. Every version-control action is recorded as a
//! [`GitOperation`] before it runs and completed or failed afterwards, so
//! the operation log always reflects what was attempted.
//!
//! Error taxonomy: a review that fails its preconditions, and a run that
//! hits an operational fault (git, database), come back as a
//! [`WorkflowRunResult`] with `success == false`. An unresolved merge
//! conflict is a *stage* outcome, not a run failure: the conflict stage
//! reports `success == false`, CI is skipped, and the overall run stays
//! successful.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{Duration, Utc};
use regex_lite::Regex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{RepositoryConfig, RepositoryRegistry, WorkflowConfig};
use crate::conflict::{ConflictResolver, StrategyChoice};
use crate::db::Database;
use crate::errors::WorkflowError;
use crate::git::{BackendFactory, VersionControlBackend};
use crate::models::{
    CiState, CiStatus, CleanupReport, GateCheck, GitOperation, GitOperationKind, PullRequest,
    PullRequestStatus, QualityGateReport, RegenerationRequest, RejectionResult, Review,
    ReviewStatus, StalledSweepReport, WorkflowRunResult,
};
use crate::notify::Notifier;
use crate::review::ReviewStore;

const TRIGGERED_BY: &str = "workflow";
const MAX_SLUG_LEN: usize = 100;

/// Stage names, in pipeline order.
pub const STAGE_BRANCH_CREATED: &str = "branch_created";
pub const STAGE_TEST_COMMITTED: &str = "test_committed";
pub const STAGE_PR_CREATED: &str = "pr_created";
pub const STAGE_CONFLICTS_RESOLVED: &str = "conflicts_resolved";
pub const STAGE_CI_PASSED: &str = "ci_passed";

/// Derive a branch-safe slug from a review title: lowercase, runs of
/// non-alphanumerics collapsed to single hyphens, trimmed, at most 100
/// characters.
pub fn sanitize_branch_name(title: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM
        .get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"));
    let lowered = title.to_lowercase();
    let slug = re.replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    let mut slug = slug.chars().take(MAX_SLUG_LEN).collect::<String>();
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Commit message for the reviewed artifact: conventional subject line
/// plus the review metadata a later `git log` reader will want.
fn commit_message(review: &Review) -> String {
    let mut message = format!(
        "test: add {}\n\nAutomated commit for review #{}: {}\n",
        review.artifact.name(),
        review.id,
        review.title
    );
    if !review.description.is_empty() {
        message.push_str(&format!("\n{}\n", review.description));
    }
    message.push_str(&format!("\nStatus: {}\n", review.status));
    message.push_str(&format!("Priority: {}\n", review.priority));
    if let Some(assignee) = &review.assignee {
        message.push_str(&format!("Assignee: {assignee}\n"));
    }
    if let Some(reviewer) = &review.reviewer {
        message.push_str(&format!("Reviewer: {reviewer}\n"));
    }
    if let Some(metrics) = &review.metrics {
        message.push_str(&format!("Quality score: {:.1}%\n", metrics.quality_score));
        if let Some(completed) = metrics.completed_at {
            message.push_str(&format!("Review completed: {}\n", completed.to_rfc3339()));
        }
    }
    message
}

/// A fault inside the stage pipeline: the stage it happened in and the
/// human-readable detail. Operation records are failed at the raise site.
struct StageFault {
    stage: &'static str,
    detail: String,
}

impl StageFault {
    fn new(stage: &'static str, detail: impl Into<String>) -> Self {
        Self {
            stage,
            detail: detail.into(),
        }
    }
}

/// Orchestrates the review-to-merge pipeline over one or more
/// repositories. All collaborators are injected, so the whole pipeline
/// can run against fakes in tests.
pub struct AutomationWorkflow {
    config: WorkflowConfig,
    registry: Arc<dyn RepositoryRegistry>,
    backends: Arc<dyn BackendFactory>,
    reviews: Arc<dyn ReviewStore>,
    notifier: Arc<dyn Notifier>,
    db: Arc<Database>,
    // One async mutex per repository id: two runs against the same
    // working copy must not interleave.
    repo_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AutomationWorkflow {
    pub fn new(
        config: WorkflowConfig,
        registry: Arc<dyn RepositoryRegistry>,
        backends: Arc<dyn BackendFactory>,
        reviews: Arc<dyn ReviewStore>,
        notifier: Arc<dyn Notifier>,
        db: Arc<Database>,
    ) -> Self {
        Self {
            config,
            registry,
            backends,
            reviews,
            notifier,
            db,
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    /// The branch a given review's run will use. Deterministic, so
    /// re-running a review lands on the same branch.
    pub fn branch_name(&self, review: &Review) -> String {
        format!(
            "{}/{}-{}",
            self.config.branch_prefix,
            review.id,
            sanitize_branch_name(&review.title)
        )
    }

    fn repo_lock(&self, repository_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .repo_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(repository_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn resolve_repository(
        &self,
        repository_id: Option<&str>,
    ) -> Result<RepositoryConfig, WorkflowError> {
        match repository_id {
            Some(id) => self
                .registry
                .get(id)
                .ok_or_else(|| WorkflowError::RepositoryNotFound(id.to_string())),
            None => self
                .registry
                .active_default()
                .ok_or(WorkflowError::NoActiveRepository),
        }
    }

    /// Run the full pipeline for an approved review.
    ///
    /// Precondition failures (unknown review, not approved, no
    /// repository) come back as a failed result with zero stages and no
    /// operation records. `Err` is reserved for database faults in the
    /// orchestration bookkeeping itself.
    pub async fn process_approved_review(
        &self,
        review_id: i64,
        repository_id: Option<&str>,
    ) -> Result<WorkflowRunResult, WorkflowError> {
        let review = match self.reviews.get(review_id)? {
            Some(r) => r,
            None => {
                return Ok(WorkflowRunResult::failed(
                    review_id,
                    WorkflowError::ReviewNotFound(review_id).to_string(),
                ))
            }
        };
        if review.status != ReviewStatus::Approved {
            return Ok(WorkflowRunResult::failed(
                review_id,
                WorkflowError::NotApproved {
                    id: review_id,
                    status: review.status.to_string(),
                }
                .to_string(),
            ));
        }
        let repo = match self.resolve_repository(repository_id) {
            Ok(r) => r,
            Err(e) => return Ok(WorkflowRunResult::failed(review_id, e.to_string())),
        };
        let backend = match self.backends.open(&repo) {
            Ok(b) => b,
            Err(e) => return Ok(WorkflowRunResult::failed(review_id, e.to_string())),
        };

        let lock = self.repo_lock(&repo.id);
        let _guard = lock.lock().await;

        info!(
            review_id,
            repository = %repo.id,
            title = %review.title,
            "processing approved review"
        );

        let mut result = WorkflowRunResult::new(review_id);
        match self
            .run_pipeline(&review, &repo, backend.as_ref(), &mut result)
            .await
        {
            Ok(()) => {
                // Unresolved conflicts leave the run "successful" but
                // short of the CI stage; only a full run completes the
                // review.
                let fully_completed = result
                    .stage(STAGE_CI_PASSED)
                    .map(|s| s.success)
                    .unwrap_or(false);
                if fully_completed {
                    self.reviews.update_status(
                        review.id,
                        ReviewStatus::Completed,
                        "automation pipeline completed",
                    )?;
                    if let Err(e) = self.notifier.notify_review_approved(&review).await {
                        warn!(error = %e, "approval notification failed");
                    }
                    info!(review_id, "pipeline completed");
                }
                Ok(result)
            }
            Err(fault) => {
                error!(review_id, stage = fault.stage, detail = %fault.detail, "pipeline fault");
                result.push_stage(fault.stage, false, fault.detail.clone());
                result.success = false;
                result.error = Some(fault.detail.clone());
                let reason = format!("automation failed at {}: {}", fault.stage, fault.detail);
                if let Err(e) = self.notifier.notify_review_rejected(&review, &reason).await {
                    warn!(error = %e, "rejection notification failed");
                }
                Ok(result)
            }
        }
    }

    /// The five stages, in order. Returns `Err` only for operational
    /// faults; an unresolved conflict records its stage outcome in
    /// `result` and skips CI without raising.
    async fn run_pipeline(
        &self,
        review: &Review,
        repo: &RepositoryConfig,
        backend: &dyn VersionControlBackend,
        result: &mut WorkflowRunResult,
    ) -> Result<(), StageFault> {
        let branch = self
            .stage_create_branch(review, repo, backend)
            .await?;
        result.push_stage(STAGE_BRANCH_CREATED, true, branch.clone());

        let commit = self
            .stage_commit_artifact(review, repo, backend)
            .await?;
        result.push_stage(STAGE_TEST_COMMITTED, true, commit);

        let pr = self.stage_create_pr(review, repo, &branch).await?;
        result.push_stage(
            STAGE_PR_CREATED,
            true,
            format!("pull request #{}", pr.pr_number),
        );

        let conflicts_clear = self
            .stage_resolve_conflicts(review, repo, backend, &pr, result)
            .await?;
        if !conflicts_clear {
            // CI never runs against a conflicted branch.
            debug!(review_id = review.id, "skipping CI, conflicts unresolved");
            return Ok(());
        }

        self.stage_trigger_ci(&pr).await?;
        result.push_stage(STAGE_CI_PASSED, true, "CI pipeline triggered".to_string());
        Ok(())
    }

    async fn stage_create_branch(
        &self,
        review: &Review,
        repo: &RepositoryConfig,
        backend: &dyn VersionControlBackend,
    ) -> Result<String, StageFault> {
        let branch = self.branch_name(review);
        let mut op = GitOperation::begin(
            &repo.id,
            Some(review.id),
            GitOperationKind::BranchCreate,
            TRIGGERED_BY,
        );
        op.branch_name = Some(branch.clone());
        self.record(STAGE_BRANCH_CREATED, self.db.insert_operation(&op))?;

        let work = async {
            backend.checkout(&repo.default_branch).await?;
            backend.pull().await?;
            backend.create_branch(&branch).await?;
            backend.checkout(&branch).await
        };
        match work.await {
            Ok(()) => {
                self.record(
                    STAGE_BRANCH_CREATED,
                    self.db
                        .complete_operation(&op.id, &format!("created branch {branch}"), None),
                )?;
                Ok(branch)
            }
            Err(e) => Err(self.fail_op(STAGE_BRANCH_CREATED, &op.id, e)),
        }
    }

    async fn stage_commit_artifact(
        &self,
        review: &Review,
        repo: &RepositoryConfig,
        backend: &dyn VersionControlBackend,
    ) -> Result<String, StageFault> {
        let artifact = &review.artifact;
        let op = GitOperation::begin(
            &repo.id,
            Some(review.id),
            GitOperationKind::Commit,
            TRIGGERED_BY,
        );
        self.record(STAGE_TEST_COMMITTED, self.db.insert_operation(&op))?;

        let message = commit_message(review);
        let work = async {
            backend
                .write_file(&artifact.file_path, &artifact.content)
                .await?;
            backend
                .stage_and_commit(std::slice::from_ref(&artifact.file_path), &message)
                .await
        };
        match work.await {
            Ok(sha) => {
                self.record(
                    STAGE_TEST_COMMITTED,
                    self.db.complete_operation(
                        &op.id,
                        &format!("committed {}", artifact.file_path),
                        Some(&sha),
                    ),
                )?;
                Ok(sha)
            }
            Err(e) => Err(self.fail_op(STAGE_TEST_COMMITTED, &op.id, e)),
        }
    }

    async fn stage_create_pr(
        &self,
        review: &Review,
        repo: &RepositoryConfig,
        branch: &str,
    ) -> Result<PullRequest, StageFault> {
        let op = GitOperation::begin(
            &repo.id,
            Some(review.id),
            GitOperationKind::PrCreate,
            TRIGGERED_BY,
        );
        self.record(STAGE_PR_CREATED, self.db.insert_operation(&op))?;

        let pr_number = self.record(STAGE_PR_CREATED, self.db.next_pr_number(&repo.id))?;
        let pr = PullRequest {
            id: Uuid::new_v4().to_string(),
            repository_id: repo.id.clone(),
            review_id: review.id,
            pr_number,
            title: format!("Add test: {}", review.artifact.name()),
            description: self.pr_description(review),
            source_branch: branch.to_string(),
            target_branch: repo.default_branch.clone(),
            status: PullRequestStatus::Open,
            mergeable: None,
            ci_status: None,
            merge_commit_sha: None,
            created_at: Utc::now(),
            merged_at: None,
            closed_at: None,
        };
        self.record(STAGE_PR_CREATED, self.db.insert_pull_request(&pr))?;
        self.record(
            STAGE_PR_CREATED,
            self.db.complete_operation(
                &op.id,
                &format!("opened pull request #{pr_number} ({branch})"),
                None,
            ),
        )?;
        Ok(pr)
    }

    /// Markdown body for the generated pull request.
    fn pr_description(&self, review: &Review) -> String {
        let mut body = String::new();
        body.push_str("## Automated test review merge\n\n");
        body.push_str(&format!("**Review ID**: #{}\n", review.id));
        body.push_str(&format!("**Title**: {}\n", review.title));
        body.push_str(&format!("**Artifact**: `{}`\n", review.artifact.file_path));
        if let Some(metrics) = &review.metrics {
            body.push_str(&format!(
                "**Quality score**: {:.1}%\n",
                metrics.quality_score
            ));
        }
        if !review.description.is_empty() {
            body.push_str(&format!("\n{}\n", review.description));
        }
        let limit = self.config.pr_comment_limit;
        if limit > 0 && !review.comments.is_empty() {
            body.push_str("\n### Recent review comments\n\n");
            let skip = review.comments.len().saturating_sub(limit);
            for comment in review.comments.iter().skip(skip) {
                body.push_str(&format!(
                    "- **{}** ({}): {}\n",
                    comment.author, comment.kind, comment.body
                ));
            }
        }
        body
    }

    /// Detect conflicts against the target branch and try to resolve
    /// them. Returns whether the branch ended up conflict-free.
    async fn stage_resolve_conflicts(
        &self,
        review: &Review,
        repo: &RepositoryConfig,
        backend: &dyn VersionControlBackend,
        pr: &PullRequest,
        result: &mut WorkflowRunResult,
    ) -> Result<bool, StageFault> {
        let resolver = ConflictResolver::new(
            repo.id.clone(),
            self.backend_arc(repo)?,
            Arc::clone(&self.db),
        );
        let report = resolver
            .detect_conflicts(&pr.source_branch, &pr.target_branch)
            .await
            .map_err(|e| StageFault::new(STAGE_CONFLICTS_RESOLVED, e.to_string()))?;

        if !report.has_conflicts {
            self.record(
                STAGE_CONFLICTS_RESOLVED,
                self.db.set_pull_request_mergeable(&pr.id, true),
            )?;
            result.push_stage(STAGE_CONFLICTS_RESOLVED, true, "no conflicts");
            return Ok(true);
        }

        if let Err(e) = self
            .notifier
            .notify_conflict_detected(&repo.id, &report.conflicts)
            .await
        {
            warn!(error = %e, "conflict notification failed");
        }

        // Materialize the conflicts on the review branch by merging the
        // target into it, then rewrite the conflicted files in place.
        let fault = |e: crate::errors::GitError| {
            StageFault::new(STAGE_CONFLICTS_RESOLVED, e.to_string())
        };
        backend.checkout(&pr.source_branch).await.map_err(fault)?;
        let merge = backend.trial_merge(&pr.target_branch).await.map_err(fault)?;
        if merge.clean {
            // The sandbox merge conflicted but this direction does not;
            // nothing to resolve, and possibly no merge to abort.
            if let Err(e) = backend.abort_merge().await {
                debug!(error = %e, "no in-progress merge to abort");
            }
            self.record(
                STAGE_CONFLICTS_RESOLVED,
                self.db.set_pull_request_mergeable(&pr.id, true),
            )?;
            result.push_stage(STAGE_CONFLICTS_RESOLVED, true, "no conflicts on branch");
            return Ok(true);
        }

        // Detection merged the review branch into the target; this merge
        // runs the other way, so each suggestion's sides swap (the target
        // is now the incoming side).
        let conflicts: Vec<_> = report
            .conflicts
            .iter()
            .cloned()
            .map(|mut c| {
                c.suggested = c.suggested.flip_sides();
                c
            })
            .collect();
        let resolution = resolver
            .auto_resolve_conflicts(&conflicts, StrategyChoice::Smart)
            .await
            .map_err(|e| StageFault::new(STAGE_CONFLICTS_RESOLVED, e.to_string()))?;

        if resolution.all_resolved() {
            let message = format!(
                "merge: resolve conflicts with {} for review #{}",
                pr.target_branch, review.id
            );
            backend
                .stage_and_commit(&resolution.resolved, &message)
                .await
                .map_err(fault)?;
            self.record(
                STAGE_CONFLICTS_RESOLVED,
                self.db.set_pull_request_mergeable(&pr.id, true),
            )?;
            result.push_stage(
                STAGE_CONFLICTS_RESOLVED,
                true,
                format!("auto-resolved {} file(s)", resolution.resolved.len()),
            );
            Ok(true)
        } else {
            backend.abort_merge().await.map_err(fault)?;
            self.record(
                STAGE_CONFLICTS_RESOLVED,
                self.db
                    .update_pull_request_status(&pr.id, PullRequestStatus::Conflict),
            )?;
            self.record(
                STAGE_CONFLICTS_RESOLVED,
                self.db.set_pull_request_mergeable(&pr.id, false),
            )?;
            let unresolved: Vec<&str> = resolution
                .failed
                .iter()
                .map(|f| f.file_path.as_str())
                .collect();
            result.push_stage(
                STAGE_CONFLICTS_RESOLVED,
                false,
                format!("unresolved conflicts in: {}", unresolved.join(", ")),
            );
            Ok(false)
        }
    }

    async fn stage_trigger_ci(&self, pr: &PullRequest) -> Result<(), StageFault> {
        // CI runs externally; this stage only kicks it off and stamps the
        // trigger time.
        let ci = CiStatus {
            state: CiState::Running,
            triggered_at: Utc::now(),
        };
        self.record(
            STAGE_CI_PASSED,
            self.db.set_pull_request_ci_status(&pr.id, &ci),
        )?;
        Ok(())
    }

    // A second Arc-typed handle to the backend for the resolver. The
    // factory caches nothing, so this re-opens the working copy.
    fn backend_arc(
        &self,
        repo: &RepositoryConfig,
    ) -> Result<Arc<dyn VersionControlBackend>, StageFault> {
        self.backends
            .open(repo)
            .map_err(|e| StageFault::new(STAGE_CONFLICTS_RESOLVED, e.to_string()))
    }

    fn record<T>(
        &self,
        stage: &'static str,
        res: Result<T, crate::errors::DatabaseError>,
    ) -> Result<T, StageFault> {
        res.map_err(|e| StageFault::new(stage, e.to_string()))
    }

    fn fail_op(
        &self,
        stage: &'static str,
        op_id: &str,
        err: crate::errors::GitError,
    ) -> StageFault {
        if let Err(db_err) = self.db.fail_operation(op_id, &err.to_string()) {
            warn!(op_id, error = %db_err, "failed to mark operation as failed");
        }
        StageFault::new(stage, err.to_string())
    }

    /// Handle a rejected review: transition it, notify the author, and
    /// optionally emit a regeneration request.
    pub async fn process_rejected_review(
        &self,
        review_id: i64,
        reason: &str,
    ) -> Result<RejectionResult, WorkflowError> {
        let review = self
            .reviews
            .get(review_id)?
            .ok_or(WorkflowError::ReviewNotFound(review_id))?;

        self.reviews
            .update_status(review_id, ReviewStatus::Rejected, reason)?;

        let notified = match self.notifier.notify_review_rejected(&review, reason).await {
            Ok(()) => true,
            Err(e) => {
                warn!(review_id, error = %e, "rejection notification failed");
                false
            }
        };

        let regeneration = if self.config.auto_regenerate {
            info!(review_id, "queueing regeneration for rejected review");
            Some(RegenerationRequest {
                original_review_id: review_id,
                original_artifact_path: review.artifact.file_path.clone(),
                reason: reason.to_string(),
                requested_at: Utc::now(),
            })
        } else {
            None
        };

        Ok(RejectionResult {
            review_id,
            notified,
            regeneration,
        })
    }

    /// Evaluate the merge-readiness checklist for a review without
    /// mutating anything.
    pub async fn enforce_quality_gates(
        &self,
        review_id: i64,
    ) -> Result<QualityGateReport, WorkflowError> {
        let review = self
            .reviews
            .get(review_id)?
            .ok_or(WorkflowError::ReviewNotFound(review_id))?;

        let mut checks = Vec::new();
        checks.push(GateCheck {
            name: "approved".into(),
            passed: review.status == ReviewStatus::Approved,
            detail: format!("status is {}", review.status),
        });

        checks.push(GateCheck {
            name: "reviewer_assigned".into(),
            passed: review.reviewer.is_some(),
            detail: review
                .reviewer
                .clone()
                .unwrap_or_else(|| "nobody assigned".into()),
        });

        checks.push(GateCheck {
            name: "metrics_present".into(),
            passed: review.metrics.is_some(),
            detail: if review.metrics.is_some() {
                "metrics recorded".into()
            } else {
                "no metrics recorded".into()
            },
        });

        let score = review.metrics.as_ref().map(|m| m.quality_score);
        checks.push(GateCheck {
            name: "quality_score".into(),
            passed: score.map(|s| s >= self.config.min_quality_score).unwrap_or(false),
            detail: match score {
                Some(s) => format!(
                    "score {:.1}% (minimum {:.1}%)",
                    s, self.config.min_quality_score
                ),
                None => "no metrics recorded".into(),
            },
        });

        let open_issues = review
            .comments
            .iter()
            .filter(|c| c.kind == crate::models::CommentKind::Issue && !c.resolved)
            .count();
        checks.push(GateCheck {
            name: "no_unresolved_issues".into(),
            passed: open_issues == 0,
            detail: format!("{open_issues} unresolved issue comment(s)"),
        });

        // CI integration is external; until a reporting hook lands this
        // gate only records that nothing failed.
        checks.push(GateCheck {
            name: "ci_checks".into(),
            passed: true,
            detail: "no failing CI checks reported".into(),
        });

        let passed = checks.iter().all(|c| c.passed);
        Ok(QualityGateReport {
            review_id,
            checks,
            passed,
        })
    }

    /// Sweep for reviews stuck in pending / in-progress past the stall
    /// threshold, notifying and escalating each one.
    pub async fn handle_stalled_reviews(&self) -> Result<StalledSweepReport, WorkflowError> {
        let cutoff = Utc::now() - Duration::hours(self.config.stall_threshold_hours as i64);
        let stalled = self.reviews.list_stalled(cutoff)?;

        let mut report = StalledSweepReport {
            swept: stalled.len(),
            escalated: 0,
        };
        for review in &stalled {
            // Notification failures are logged and swallowed; the
            // escalation stamp goes on regardless.
            if let Err(e) = self.notifier.notify_review_stalled(review).await {
                warn!(review_id = review.id, error = %e, "stall notification failed");
            }
            match self.reviews.record_escalation(review.id, Utc::now()) {
                Ok(info) => {
                    report.escalated += 1;
                    debug!(review_id = review.id, count = info.count, "review escalated");
                }
                Err(e) => {
                    warn!(review_id = review.id, error = %e, "escalation bookkeeping failed")
                }
            }
        }
        if report.swept > 0 {
            info!(
                swept = report.swept,
                escalated = report.escalated,
                "stalled review sweep complete"
            );
        }
        Ok(report)
    }

    /// Delete source branches of pull requests merged more than
    /// `days_old` days ago, across all active repositories.
    ///
    /// Already-deleted branches are counted and skipped, so re-running
    /// the cleanup is harmless. A branch-delete operation record is
    /// written only when a branch was actually removed.
    pub async fn cleanup_completed_workflows(
        &self,
        days_old: u32,
    ) -> Result<CleanupReport, WorkflowError> {
        let cutoff = Utc::now() - Duration::days(i64::from(days_old));
        let mut report = CleanupReport::default();

        for repo in self.registry.list_active() {
            let backend = match self.backends.open(&repo) {
                Ok(b) => b,
                Err(e) => {
                    warn!(repository = %repo.id, error = %e, "skipping repository in cleanup");
                    continue;
                }
            };
            let lock = self.repo_lock(&repo.id);
            let _guard = lock.lock().await;

            let merged = self.db.merged_pull_requests_before(&repo.id, cutoff)?;
            report.candidates += merged.len();

            for pr in merged {
                match backend.delete_branch(&pr.source_branch, true).await {
                    Ok(true) => {
                        let mut op = GitOperation::begin(
                            &repo.id,
                            Some(pr.review_id),
                            GitOperationKind::BranchDelete,
                            TRIGGERED_BY,
                        );
                        op.branch_name = Some(pr.source_branch.clone());
                        self.db.insert_operation(&op)?;
                        self.db.complete_operation(
                            &op.id,
                            &format!("deleted merged branch {}", pr.source_branch),
                            None,
                        )?;
                        report.deleted_branches += 1;
                        info!(
                            repository = %repo.id,
                            branch = %pr.source_branch,
                            "cleaned up merged branch"
                        );
                    }
                    Ok(false) => report.skipped_missing += 1,
                    Err(e) => {
                        warn!(
                            repository = %repo.id,
                            branch = %pr.source_branch,
                            error = %e,
                            "branch cleanup failed"
                        );
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_basic() {
        assert_eq!(sanitize_branch_name("Fix payment retries"), "fix-payment-retries");
    }

    #[test]
    fn test_sanitize_collapses_symbol_runs() {
        assert_eq!(sanitize_branch_name("Fix!!  bug #42"), "fix-bug-42");
        assert_eq!(sanitize_branch_name("--already--dashed--"), "already-dashed");
    }

    #[test]
    fn test_sanitize_never_emits_double_hyphen() {
        for title in ["a !@# b", "x--y", "  (weird)  [title]  "] {
            let slug = sanitize_branch_name(title);
            assert!(!slug.contains("--"), "slug {slug:?} from {title:?}");
            assert!(!slug.starts_with('-') && !slug.ends_with('-'));
        }
    }

    #[test]
    fn test_sanitize_truncates_to_100() {
        let long = "x".repeat(300);
        assert_eq!(sanitize_branch_name(&long).len(), 100);
        // Truncation must not leave a trailing hyphen.
        let tricky = format!("{} {}", "a".repeat(99), "b".repeat(50));
        let slug = sanitize_branch_name(&tricky);
        assert!(slug.len() <= 100);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn test_sanitize_empty_and_symbols_only() {
        assert_eq!(sanitize_branch_name(""), "");
        assert_eq!(sanitize_branch_name("!!!"), "");
    }

    #[test]
    fn test_commit_message_content() {
        let review = Review {
            id: 42,
            title: "Fix payment retries".into(),
            description: "Covers the retry backoff paths.".into(),
            status: crate::models::ReviewStatus::Approved,
            priority: "high".into(),
            assignee: Some("dana".into()),
            reviewer: Some("kim".into()),
            artifact: crate::models::ReviewArtifact {
                file_path: "tests/test_payment_retries.py".into(),
                content: "assert True\n".into(),
            },
            metrics: Some(crate::models::ReviewMetrics {
                quality_score: 91.0,
                completed_at: None,
            }),
            comments: Vec::new(),
            escalation: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let message = commit_message(&review);
        assert!(message.starts_with("test: add test_payment_retries\n"));
        assert!(message.contains("review #42"));
        assert!(message.contains("Reviewer: kim"));
        assert!(message.contains("Quality score: 91.0%"));
    }
}
