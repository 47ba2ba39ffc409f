//! mergeflow-core: review-to-merge automation.
//!
//! This crate turns approved test reviews into merged code: it creates a
//! branch per review, commits the reviewed artifact, opens a pull
//! request, detects and resolves merge conflicts, and hands the branch to
//! CI. Every version-control action lands in a persistent operation log.
//!
//! The main entry points are [`workflow::AutomationWorkflow`] for the
//! pipeline and [`conflict::ConflictResolver`] for stand-alone conflict
//! work.

pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod git;
pub mod models;
pub mod notify;
pub mod review;
pub mod workflow;

pub use config::AppConfig;
pub use conflict::{Conflict, ConflictReport, ConflictResolver, ResolutionStrategy};
pub use db::Database;
pub use errors::CoreError;
pub use models::{Review, ReviewStatus, WorkflowRunResult};
pub use workflow::AutomationWorkflow;
