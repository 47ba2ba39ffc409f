//! Notification boundary.
//!
//! Delivery transports (email, Slack, webhooks) live outside this crate.
//! [`Notifier`] is the fire-and-forget contract the workflow talks to; every
//! call site logs and swallows failures, so a broken channel can never abort
//! a run. [`LogNotifier`] is the built-in channel that writes structured
//! tracing events.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::conflict::Conflict;
use crate::errors::NotificationError;
use crate::models::Review;

/// Fire-and-forget notification contract.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// A review made it through the pipeline to a merge-ready state.
    async fn notify_review_approved(&self, review: &Review) -> Result<(), NotificationError>;

    /// A review was rejected, or a run failed with an operational fault.
    async fn notify_review_rejected(
        &self,
        review: &Review,
        reason: &str,
    ) -> Result<(), NotificationError>;

    /// Trial merge found conflicts between the review branch and the target.
    async fn notify_conflict_detected(
        &self,
        repository_id: &str,
        conflicts: &[Conflict],
    ) -> Result<(), NotificationError>;

    /// A review has been sitting in pending / in-progress past the threshold.
    async fn notify_review_stalled(&self, review: &Review) -> Result<(), NotificationError>;
}

/// Notifier that emits structured log events instead of delivering anywhere.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_review_approved(&self, review: &Review) -> Result<(), NotificationError> {
        info!(review_id = review.id, title = %review.title, "review approved and merged");
        Ok(())
    }

    async fn notify_review_rejected(
        &self,
        review: &Review,
        reason: &str,
    ) -> Result<(), NotificationError> {
        warn!(review_id = review.id, reason, "review rejected");
        Ok(())
    }

    async fn notify_conflict_detected(
        &self,
        repository_id: &str,
        conflicts: &[Conflict],
    ) -> Result<(), NotificationError> {
        warn!(
            repository_id,
            count = conflicts.len(),
            files = ?conflicts.iter().map(|c| c.file_path.as_str()).collect::<Vec<_>>(),
            "merge conflicts detected"
        );
        Ok(())
    }

    async fn notify_review_stalled(&self, review: &Review) -> Result<(), NotificationError> {
        warn!(
            review_id = review.id,
            status = %review.status,
            "review stalled, escalating"
        );
        Ok(())
    }
}
