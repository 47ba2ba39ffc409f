//! Typed query helpers for every table used by the automation pipeline.
//!
//! The `git_operations` table is the OperationLog: one row per attempted
//! version-control action, append-only. Stage history for a review is its
//! rows read back in creation order.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::models::{
    CiState, CiStatus, EscalationInfo, GitOperation, GitOperationKind, GitOperationStatus,
    PullRequest, PullRequestStatus, Review, ReviewArtifact, ReviewComment, ReviewMetrics,
    ReviewStatus,
};

fn to_rfc3339(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_dt(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn opt_dt(value: Option<String>) -> Option<DateTime<Utc>> {
    value.as_deref().and_then(parse_dt)
}

// ---------------------------------------------------------------------------
// Git operations (OperationLog)
// ---------------------------------------------------------------------------

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<GitOperation> {
    let kind: String = row.get("kind")?;
    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    Ok(GitOperation {
        id: row.get("id")?,
        repository_id: row.get("repository_id")?,
        review_id: row.get("review_id")?,
        kind: GitOperationKind::from_str_val(&kind),
        status: GitOperationStatus::from_str_val(&status),
        branch_name: row.get("branch_name")?,
        commit_hash: row.get("commit_hash")?,
        pr_number: row.get("pr_number")?,
        output: row.get("output")?,
        error_message: row.get("error_message")?,
        triggered_by: row.get("triggered_by")?,
        created_at: parse_dt(&created_at).unwrap_or_else(Utc::now),
        started_at: opt_dt(started_at),
        completed_at: opt_dt(completed_at),
    })
}

impl Database {
    /// Append a new operation record.
    pub fn insert_operation(&self, op: &GitOperation) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT INTO git_operations
                 (id, repository_id, review_id, kind, status, branch_name, commit_hash,
                  pr_number, output, error_message, triggered_by, created_at, started_at,
                  completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                op.id,
                op.repository_id,
                op.review_id,
                op.kind.to_string(),
                op.status.to_string(),
                op.branch_name,
                op.commit_hash,
                op.pr_number,
                op.output,
                op.error_message,
                op.triggered_by,
                to_rfc3339(&op.created_at),
                op.started_at.as_ref().map(to_rfc3339),
                op.completed_at.as_ref().map(to_rfc3339),
            ],
        )?;
        debug!(op_id = %op.id, kind = %op.kind, "operation recorded");
        Ok(())
    }

    /// Move an operation to a new status.
    ///
    /// Enforces monotonicity: a record already in a terminal status
    /// (completed / failed / cancelled) is never updated again.
    pub fn update_operation_status(
        &self,
        id: &str,
        status: GitOperationStatus,
        output: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let completed_at = status.is_terminal().then(|| to_rfc3339(&Utc::now()));
        let updated = self.conn().execute(
            "UPDATE git_operations
             SET status = ?2,
                 output = COALESCE(?3, output),
                 error_message = COALESCE(?4, error_message),
                 completed_at = COALESCE(?5, completed_at)
             WHERE id = ?1 AND status IN ('pending', 'in_progress')",
            params![
                id,
                status.to_string(),
                output,
                error_message,
                completed_at
            ],
        )?;

        if updated == 0 {
            let exists: bool = self.conn().query_row(
                "SELECT COUNT(*) > 0 FROM git_operations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )?;
            if exists {
                return Err(DatabaseError::TerminalStatus {
                    entity: "git_operation".into(),
                    id: id.to_string(),
                });
            }
            return Err(DatabaseError::NotFound {
                entity: "git_operation".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Mark an operation completed, attaching output and an optional commit.
    pub fn complete_operation(
        &self,
        id: &str,
        output: &str,
        commit_hash: Option<&str>,
    ) -> Result<(), DatabaseError> {
        if let Some(hash) = commit_hash {
            self.conn().execute(
                "UPDATE git_operations SET commit_hash = ?2 WHERE id = ?1",
                params![id, hash],
            )?;
        }
        self.update_operation_status(id, GitOperationStatus::Completed, Some(output), None)
    }

    /// Mark an operation failed with the fault message.
    pub fn fail_operation(&self, id: &str, error_message: &str) -> Result<(), DatabaseError> {
        self.update_operation_status(id, GitOperationStatus::Failed, None, Some(error_message))
    }

    /// All operations for a review, in creation order. Read back in order,
    /// these reconstruct the exact stage history.
    pub fn operations_for_review(&self, review_id: i64) -> Result<Vec<GitOperation>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM git_operations WHERE review_id = ?1 ORDER BY created_at, rowid",
        )?;
        let ops = stmt
            .query_map(params![review_id], operation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ops)
    }

    /// Count of operations recorded for a review.
    pub fn count_operations_for_review(&self, review_id: i64) -> Result<i64, DatabaseError> {
        let count = self.conn().query_row(
            "SELECT COUNT(*) FROM git_operations WHERE review_id = ?1",
            params![review_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Most recent operations across all repositories.
    pub fn recent_operations(&self, limit: usize) -> Result<Vec<GitOperation>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM git_operations ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let ops = stmt
            .query_map(params![limit as i64], operation_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ops)
    }
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

fn pull_request_from_row(row: &Row<'_>) -> rusqlite::Result<PullRequest> {
    let status: String = row.get("status")?;
    let ci_state: Option<String> = row.get("ci_state")?;
    let ci_triggered_at: Option<String> = row.get("ci_triggered_at")?;
    let created_at: String = row.get("created_at")?;
    let merged_at: Option<String> = row.get("merged_at")?;
    let closed_at: Option<String> = row.get("closed_at")?;

    let ci_status = match (ci_state, opt_dt(ci_triggered_at)) {
        (Some(state), Some(triggered_at)) => Some(CiStatus {
            state: CiState::from_str_val(&state),
            triggered_at,
        }),
        _ => None,
    };

    Ok(PullRequest {
        id: row.get("id")?,
        repository_id: row.get("repository_id")?,
        review_id: row.get("review_id")?,
        pr_number: row.get("pr_number")?,
        title: row.get("title")?,
        description: row.get("description")?,
        source_branch: row.get("source_branch")?,
        target_branch: row.get("target_branch")?,
        status: PullRequestStatus::from_str_val(&status),
        mergeable: row.get("mergeable")?,
        ci_status,
        merge_commit_sha: row.get("merge_commit_sha")?,
        created_at: parse_dt(&created_at).unwrap_or_else(Utc::now),
        merged_at: opt_dt(merged_at),
        closed_at: opt_dt(closed_at),
    })
}

impl Database {
    /// Next free PR number for a repository (1-based).
    pub fn next_pr_number(&self, repository_id: &str) -> Result<i64, DatabaseError> {
        let max: Option<i64> = self.conn().query_row(
            "SELECT MAX(pr_number) FROM pull_requests WHERE repository_id = ?1",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0) + 1)
    }

    /// Insert a new pull request record.
    pub fn insert_pull_request(&self, pr: &PullRequest) -> Result<(), DatabaseError> {
        self.conn().execute(
            "INSERT INTO pull_requests
                 (id, repository_id, review_id, pr_number, title, description,
                  source_branch, target_branch, status, mergeable, ci_state,
                  ci_triggered_at, merge_commit_sha, created_at, merged_at, closed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                pr.id,
                pr.repository_id,
                pr.review_id,
                pr.pr_number,
                pr.title,
                pr.description,
                pr.source_branch,
                pr.target_branch,
                pr.status.to_string(),
                pr.mergeable,
                pr.ci_status.as_ref().map(|c| c.state.to_string()),
                pr.ci_status.as_ref().map(|c| to_rfc3339(&c.triggered_at)),
                pr.merge_commit_sha,
                to_rfc3339(&pr.created_at),
                pr.merged_at.as_ref().map(to_rfc3339),
                pr.closed_at.as_ref().map(to_rfc3339),
            ],
        )?;
        debug!(pr_id = %pr.id, pr_number = pr.pr_number, "pull request recorded");
        Ok(())
    }

    /// Fetch a pull request by id.
    pub fn get_pull_request(&self, id: &str) -> Result<Option<PullRequest>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM pull_requests WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], pull_request_from_row)?;
        match rows.next() {
            Some(pr) => Ok(Some(pr?)),
            None => Ok(None),
        }
    }

    /// Update a pull request's status, stamping merge / close timestamps.
    pub fn update_pull_request_status(
        &self,
        id: &str,
        status: PullRequestStatus,
    ) -> Result<(), DatabaseError> {
        let now = to_rfc3339(&Utc::now());
        let merged_at = matches!(status, PullRequestStatus::Merged).then_some(now.clone());
        let closed_at = matches!(status, PullRequestStatus::Closed).then_some(now);
        let updated = self.conn().execute(
            "UPDATE pull_requests
             SET status = ?2,
                 merged_at = COALESCE(?3, merged_at),
                 closed_at = COALESCE(?4, closed_at)
             WHERE id = ?1",
            params![id, status.to_string(), merged_at, closed_at],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "pull_request".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Record the mergeable verdict from conflict detection.
    pub fn set_pull_request_mergeable(
        &self,
        id: &str,
        mergeable: bool,
    ) -> Result<(), DatabaseError> {
        self.conn().execute(
            "UPDATE pull_requests SET mergeable = ?2 WHERE id = ?1",
            params![id, mergeable],
        )?;
        Ok(())
    }

    /// Stamp the typed CI status sub-structure on a pull request.
    pub fn set_pull_request_ci_status(
        &self,
        id: &str,
        ci: &CiStatus,
    ) -> Result<(), DatabaseError> {
        let updated = self.conn().execute(
            "UPDATE pull_requests SET ci_state = ?2, ci_triggered_at = ?3 WHERE id = ?1",
            params![id, ci.state.to_string(), to_rfc3339(&ci.triggered_at)],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "pull_request".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Merged pull requests whose merge timestamp is older than `cutoff`.
    pub fn merged_pull_requests_before(
        &self,
        repository_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PullRequest>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM pull_requests
             WHERE repository_id = ?1 AND status = 'merged' AND merged_at < ?2
             ORDER BY merged_at",
        )?;
        let prs = stmt
            .query_map(
                params![repository_id, to_rfc3339(&cutoff)],
                pull_request_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(prs)
    }
}

// ---------------------------------------------------------------------------
// Reviews (read-model backing SqliteReviewStore)
// ---------------------------------------------------------------------------

fn review_from_row(row: &Row<'_>) -> rusqlite::Result<Review> {
    let status: String = row.get("status")?;
    let comments_json: String = row.get("comments")?;
    let quality_score: Option<f64> = row.get("quality_score")?;
    let metrics_completed_at: Option<String> = row.get("metrics_completed_at")?;
    let escalation_count: u32 = row.get("escalation_count")?;
    let last_escalated_at: Option<String> = row.get("last_escalated_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let comments: Vec<ReviewComment> = serde_json::from_str(&comments_json).unwrap_or_default();
    let metrics = quality_score.map(|score| ReviewMetrics {
        quality_score: score,
        completed_at: opt_dt(metrics_completed_at),
    });
    let escalation = opt_dt(last_escalated_at).map(|at| EscalationInfo {
        count: escalation_count,
        last_escalated_at: at,
    });

    Ok(Review {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: ReviewStatus::from_str_val(&status),
        priority: row.get("priority")?,
        assignee: row.get("assignee")?,
        reviewer: row.get("reviewer")?,
        artifact: ReviewArtifact {
            file_path: row.get("artifact_path")?,
            content: row.get("artifact_content")?,
        },
        metrics,
        comments,
        escalation,
        created_at: parse_dt(&created_at).unwrap_or_else(Utc::now),
        updated_at: parse_dt(&updated_at).unwrap_or_else(Utc::now),
    })
}

impl Database {
    /// Insert or replace a review row.
    pub fn upsert_review(&self, review: &Review) -> Result<(), DatabaseError> {
        let comments =
            serde_json::to_string(&review.comments).unwrap_or_else(|_| "[]".to_string());
        self.conn().execute(
            "INSERT OR REPLACE INTO reviews
                 (id, title, description, status, priority, assignee, reviewer,
                  artifact_path, artifact_content, quality_score, metrics_completed_at,
                  comments, escalation_count, last_escalated_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                review.id,
                review.title,
                review.description,
                review.status.to_string(),
                review.priority,
                review.assignee,
                review.reviewer,
                review.artifact.file_path,
                review.artifact.content,
                review.metrics.as_ref().map(|m| m.quality_score),
                review
                    .metrics
                    .as_ref()
                    .and_then(|m| m.completed_at.as_ref())
                    .map(to_rfc3339),
                comments,
                review.escalation.as_ref().map(|e| e.count).unwrap_or(0),
                review
                    .escalation
                    .as_ref()
                    .map(|e| to_rfc3339(&e.last_escalated_at)),
                to_rfc3339(&review.created_at),
                to_rfc3339(&review.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Fetch a review by id.
    pub fn get_review(&self, id: i64) -> Result<Option<Review>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT * FROM reviews WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], review_from_row)?;
        match rows.next() {
            Some(review) => Ok(Some(review?)),
            None => Ok(None),
        }
    }

    /// Transition a review's status, leaving an audit note.
    pub fn update_review_status(
        &self,
        id: i64,
        status: ReviewStatus,
        note: &str,
    ) -> Result<(), DatabaseError> {
        let updated = self.conn().execute(
            "UPDATE reviews SET status = ?2, status_note = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, status.to_string(), note, to_rfc3339(&Utc::now())],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "review".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Pending / in-progress reviews created before `cutoff`.
    pub fn reviews_stalled_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Review>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT * FROM reviews
             WHERE status IN ('pending', 'in_progress') AND created_at < ?1
             ORDER BY created_at",
        )?;
        let reviews = stmt
            .query_map(params![to_rfc3339(&cutoff)], review_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reviews)
    }

    /// Stamp escalation metadata on a review, incrementing the counter.
    pub fn record_review_escalation(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<EscalationInfo, DatabaseError> {
        let updated = self.conn().execute(
            "UPDATE reviews
             SET escalation_count = escalation_count + 1,
                 last_escalated_at = ?2,
                 updated_at = ?2
             WHERE id = ?1",
            params![id, to_rfc3339(&at)],
        )?;
        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "review".into(),
                id: id.to_string(),
            });
        }
        let count: u32 = self.conn().query_row(
            "SELECT escalation_count FROM reviews WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(EscalationInfo {
            count,
            last_escalated_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GitOperationKind;
    use chrono::Duration;

    fn test_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn sample_operation(review_id: i64) -> GitOperation {
        GitOperation::begin("billing", Some(review_id), GitOperationKind::BranchCreate, "workflow")
    }

    fn sample_pr(repo: &str, number: i64) -> PullRequest {
        PullRequest {
            id: uuid::Uuid::new_v4().to_string(),
            repository_id: repo.to_string(),
            review_id: 42,
            pr_number: number,
            title: "Add tests".into(),
            description: String::new(),
            source_branch: format!("test-review/{number}-x"),
            target_branch: "main".into(),
            status: PullRequestStatus::Draft,
            mergeable: None,
            ci_status: None,
            merge_commit_sha: None,
            created_at: Utc::now(),
            merged_at: None,
            closed_at: None,
        }
    }

    #[test]
    fn test_operation_round_trip() {
        let db = test_db();
        let mut op = sample_operation(7);
        op.branch_name = Some("test-review/7-x".into());
        db.insert_operation(&op).unwrap();

        db.complete_operation(&op.id, "branch created", Some("abc123")).unwrap();

        let ops = db.operations_for_review(7).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, GitOperationStatus::Completed);
        assert_eq!(ops[0].commit_hash.as_deref(), Some("abc123"));
        assert_eq!(ops[0].branch_name.as_deref(), Some("test-review/7-x"));
        assert!(ops[0].completed_at.is_some());
    }

    #[test]
    fn test_operation_status_is_monotonic() {
        let db = test_db();
        let op = sample_operation(1);
        db.insert_operation(&op).unwrap();
        db.fail_operation(&op.id, "network down").unwrap();

        // A terminal record cannot be moved again.
        let err = db.complete_operation(&op.id, "late success", None).unwrap_err();
        assert!(matches!(err, DatabaseError::TerminalStatus { .. }));

        let ops = db.operations_for_review(1).unwrap();
        assert_eq!(ops[0].status, GitOperationStatus::Failed);
        assert_eq!(ops[0].error_message.as_deref(), Some("network down"));
    }

    #[test]
    fn test_operations_preserve_creation_order() {
        let db = test_db();
        for kind in [
            GitOperationKind::BranchCreate,
            GitOperationKind::Commit,
            GitOperationKind::PrCreate,
            GitOperationKind::Merge,
        ] {
            let op = GitOperation::begin("billing", Some(9), kind, "workflow");
            db.insert_operation(&op).unwrap();
        }
        let kinds: Vec<GitOperationKind> = db
            .operations_for_review(9)
            .unwrap()
            .into_iter()
            .map(|o| o.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![
                GitOperationKind::BranchCreate,
                GitOperationKind::Commit,
                GitOperationKind::PrCreate,
                GitOperationKind::Merge,
            ]
        );
    }

    #[test]
    fn test_pr_numbering_and_ci_status() {
        let db = test_db();
        assert_eq!(db.next_pr_number("billing").unwrap(), 1);

        let pr = sample_pr("billing", 1);
        db.insert_pull_request(&pr).unwrap();
        assert_eq!(db.next_pr_number("billing").unwrap(), 2);

        let ci = CiStatus {
            state: CiState::Running,
            triggered_at: Utc::now(),
        };
        db.set_pull_request_ci_status(&pr.id, &ci).unwrap();

        let stored = db.get_pull_request(&pr.id).unwrap().unwrap();
        assert_eq!(stored.ci_status.unwrap().state, CiState::Running);
    }

    #[test]
    fn test_merged_before_cutoff() {
        let db = test_db();
        let pr = sample_pr("billing", 1);
        db.insert_pull_request(&pr).unwrap();
        db.update_pull_request_status(&pr.id, PullRequestStatus::Merged).unwrap();

        // Just merged: not older than a 7-day cutoff.
        let cutoff = Utc::now() - Duration::days(7);
        assert!(db.merged_pull_requests_before("billing", cutoff).unwrap().is_empty());

        // A cutoff in the future captures it.
        let cutoff = Utc::now() + Duration::days(1);
        let merged = db.merged_pull_requests_before("billing", cutoff).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(merged[0].merged_at.is_some());
    }

    #[test]
    fn test_review_escalation_counter() {
        let db = test_db();
        let review = Review {
            id: 5,
            title: "Stalled one".into(),
            description: String::new(),
            status: ReviewStatus::Pending,
            priority: "medium".into(),
            assignee: None,
            reviewer: None,
            artifact: ReviewArtifact {
                file_path: "tests/test_x.py".into(),
                content: String::new(),
            },
            metrics: None,
            comments: Vec::new(),
            escalation: None,
            created_at: Utc::now() - Duration::hours(72),
            updated_at: Utc::now(),
        };
        db.upsert_review(&review).unwrap();

        let stalled = db
            .reviews_stalled_before(Utc::now() - Duration::hours(48))
            .unwrap();
        assert_eq!(stalled.len(), 1);

        let info = db.record_review_escalation(5, Utc::now()).unwrap();
        assert_eq!(info.count, 1);
        let info = db.record_review_escalation(5, Utc::now()).unwrap();
        assert_eq!(info.count, 2);

        let stored = db.get_review(5).unwrap().unwrap();
        assert_eq!(stored.escalation.unwrap().count, 2);
    }
}
