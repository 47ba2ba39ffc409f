//! TOML-based configuration system for mergeflow.
//!
//! Configuration carries the repository registry (local working copies the
//! pipeline operates on) and the workflow tunables. Loaded once at startup
//! and handed to components explicitly — no ambient global state.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Workflow behaviour settings.
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Repositories the pipeline may operate on.
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,

    /// Persistence settings.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;

        debug!(
            repositories = config.repositories.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Validate field values that serde cannot check.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workflow.branch_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "workflow.branch_prefix".into(),
                detail: "must not be empty".into(),
            });
        }
        if !(0.0..=100.0).contains(&self.workflow.min_quality_score) {
            return Err(ConfigError::InvalidValue {
                field: "workflow.min_quality_score".into(),
                detail: "must be between 0 and 100".into(),
            });
        }
        if self.workflow.stall_threshold_hours == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workflow.stall_threshold_hours".into(),
                detail: "must be greater than zero".into(),
            });
        }
        for repo in &self.repositories {
            if repo.id.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "repositories.id".into(),
                    detail: "must not be empty".into(),
                });
            }
            if repo.default_branch.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: format!("repositories.{}.default_branch", repo.id),
                    detail: "must not be empty".into(),
                });
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig::default(),
            repositories: Vec::new(),
            database: DatabaseConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Workflow behaviour configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Prefix for generated branch names (default `test-review`).
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Minimum quality score (percent) required by the quality gates.
    #[serde(default = "default_min_quality_score")]
    pub min_quality_score: f64,

    /// Hours after which a pending / in-progress review counts as stalled.
    #[serde(default = "default_stall_threshold_hours")]
    pub stall_threshold_hours: u64,

    /// Whether a rejected review emits a regeneration request.
    #[serde(default)]
    pub auto_regenerate: bool,

    /// How many trailing review comments appear in a PR description.
    #[serde(default = "default_pr_comment_limit")]
    pub pr_comment_limit: usize,
}

fn default_branch_prefix() -> String {
    "test-review".into()
}
fn default_min_quality_score() -> f64 {
    70.0
}
fn default_stall_threshold_hours() -> u64 {
    48
}
fn default_pr_comment_limit() -> usize {
    5
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            min_quality_score: default_min_quality_score(),
            stall_threshold_hours: default_stall_threshold_hours(),
            auto_regenerate: false,
            pr_comment_limit: default_pr_comment_limit(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

/// A single repository the pipeline may operate on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Stable identifier used in operation records and locks.
    pub id: String,

    /// Filesystem path of the local working copy.
    pub local_path: PathBuf,

    /// Branch the pipeline branches from and merges back into.
    #[serde(default = "default_branch_name")]
    pub default_branch: String,

    /// Inactive repositories are skipped by bulk operations.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_branch_name() -> String {
    "main".into()
}
fn default_active() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mergeflow.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repository registry
// ---------------------------------------------------------------------------

/// Resolver for repository configuration, consumed by the workflow.
pub trait RepositoryRegistry: Send + Sync {
    /// The first active repository, if any.
    fn active_default(&self) -> Option<RepositoryConfig>;

    /// Look up a repository by id.
    fn get(&self, id: &str) -> Option<RepositoryConfig>;

    /// All active repositories, in configuration order.
    fn list_active(&self) -> Vec<RepositoryConfig>;
}

impl RepositoryRegistry for AppConfig {
    fn active_default(&self) -> Option<RepositoryConfig> {
        self.repositories.iter().find(|r| r.active).cloned()
    }

    fn get(&self, id: &str) -> Option<RepositoryConfig> {
        self.repositories.iter().find(|r| r.id == id).cloned()
    }

    fn list_active(&self) -> Vec<RepositoryConfig> {
        self.repositories
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
            [workflow]
            branch_prefix = "test-review"
            min_quality_score = 80.0
            stall_threshold_hours = 24
            auto_regenerate = true

            [[repositories]]
            id = "billing"
            local_path = "/srv/repos/billing"
            default_branch = "main"

            [[repositories]]
            id = "archive"
            local_path = "/srv/repos/archive"
            active = false

            [database]
            path = "/var/lib/mergeflow/mergeflow.db"
        "#
    }

    #[test]
    fn test_parse_full_config() {
        let config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.workflow.min_quality_score, 80.0);
        assert_eq!(config.workflow.stall_threshold_hours, 24);
        assert!(config.workflow.auto_regenerate);
        assert_eq!(config.repositories.len(), 2);
        assert_eq!(config.repositories[1].default_branch, "main");
    }

    #[test]
    fn test_defaults() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.workflow.branch_prefix, "test-review");
        assert_eq!(config.workflow.stall_threshold_hours, 48);
        assert_eq!(config.workflow.pr_comment_limit, 5);
        assert!(!config.workflow.auto_regenerate);
    }

    #[test]
    fn test_registry_resolution() {
        let config: AppConfig = toml::from_str(sample_toml()).unwrap();
        assert_eq!(config.active_default().unwrap().id, "billing");
        assert_eq!(config.get("archive").unwrap().id, "archive");
        assert!(config.get("nope").is_none());
        assert_eq!(config.list_active().len(), 1);
    }

    #[test]
    fn test_validation_rejects_bad_score() {
        let mut config: AppConfig = toml::from_str(sample_toml()).unwrap();
        config.workflow.min_quality_score = 150.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AppConfig::load("/nonexistent/mergeflow.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
