//! Review repository boundary.
//!
//! Reviews are owned by the review subsystem; the workflow only reads them
//! and triggers status transitions back. [`ReviewStore`] is the abstract
//! contract; [`SqliteReviewStore`] backs the CLI and standalone deployments,
//! [`InMemoryReviewStore`] is the test double.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::db::Database;
use crate::errors::DatabaseError;
use crate::models::{EscalationInfo, Review, ReviewStatus};

/// Abstract contract the workflow requires from the review subsystem.
pub trait ReviewStore: Send + Sync {
    /// Fetch a review by id.
    fn get(&self, id: i64) -> Result<Option<Review>, DatabaseError>;

    /// Transition a review's status, leaving a note for the audit trail.
    fn update_status(&self, id: i64, status: ReviewStatus, note: &str)
        -> Result<(), DatabaseError>;

    /// Pending / in-progress reviews created before `cutoff`.
    fn list_stalled(&self, cutoff: DateTime<Utc>) -> Result<Vec<Review>, DatabaseError>;

    /// Stamp escalation metadata (incrementing counter) on a review.
    fn record_escalation(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<EscalationInfo, DatabaseError>;
}

// ---------------------------------------------------------------------------
// SQLite-backed store
// ---------------------------------------------------------------------------

/// Review store backed by the shared SQLite database.
pub struct SqliteReviewStore {
    db: Arc<Database>,
}

impl SqliteReviewStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a review (ingestion side, used by the CLI).
    pub fn upsert(&self, review: &Review) -> Result<(), DatabaseError> {
        self.db.upsert_review(review)
    }
}

impl ReviewStore for SqliteReviewStore {
    fn get(&self, id: i64) -> Result<Option<Review>, DatabaseError> {
        self.db.get_review(id)
    }

    fn update_status(
        &self,
        id: i64,
        status: ReviewStatus,
        note: &str,
    ) -> Result<(), DatabaseError> {
        self.db.update_review_status(id, status, note)
    }

    fn list_stalled(&self, cutoff: DateTime<Utc>) -> Result<Vec<Review>, DatabaseError> {
        self.db.reviews_stalled_before(cutoff)
    }

    fn record_escalation(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<EscalationInfo, DatabaseError> {
        self.db.record_review_escalation(id, at)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// In-memory review store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryReviewStore {
    reviews: Mutex<HashMap<i64, Review>>,
}

impl InMemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a review.
    pub fn insert(&self, review: Review) {
        self.reviews
            .lock()
            .expect("review store lock")
            .insert(review.id, review);
    }
}

impl ReviewStore for InMemoryReviewStore {
    fn get(&self, id: i64) -> Result<Option<Review>, DatabaseError> {
        Ok(self
            .reviews
            .lock()
            .expect("review store lock")
            .get(&id)
            .cloned())
    }

    fn update_status(
        &self,
        id: i64,
        status: ReviewStatus,
        _note: &str,
    ) -> Result<(), DatabaseError> {
        let mut reviews = self.reviews.lock().expect("review store lock");
        let review = reviews.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "review".into(),
            id: id.to_string(),
        })?;
        review.status = status;
        review.updated_at = Utc::now();
        Ok(())
    }

    fn list_stalled(&self, cutoff: DateTime<Utc>) -> Result<Vec<Review>, DatabaseError> {
        let reviews = self.reviews.lock().expect("review store lock");
        let mut stalled: Vec<Review> = reviews
            .values()
            .filter(|r| {
                matches!(r.status, ReviewStatus::Pending | ReviewStatus::InProgress)
                    && r.created_at < cutoff
            })
            .cloned()
            .collect();
        stalled.sort_by_key(|r| r.created_at);
        Ok(stalled)
    }

    fn record_escalation(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<EscalationInfo, DatabaseError> {
        let mut reviews = self.reviews.lock().expect("review store lock");
        let review = reviews.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "review".into(),
            id: id.to_string(),
        })?;
        let count = review.escalation.as_ref().map(|e| e.count).unwrap_or(0) + 1;
        let info = EscalationInfo {
            count,
            last_escalated_at: at,
        };
        review.escalation = Some(info.clone());
        review.updated_at = at;
        Ok(info)
    }
}
