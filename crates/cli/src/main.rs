//! mergeflow command-line management tool.
//!
//! Provides subcommands for driving the review-to-merge pipeline,
//! inspecting the operation log, running conflict detection and
//! resolution, and generating / validating configuration files.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use tracing_subscriber::EnvFilter;

use mergeflow_core::config::{AppConfig, RepositoryRegistry};
use mergeflow_core::conflict::{ConflictResolver, ResolutionStrategy, StrategyChoice};
use mergeflow_core::db::Database;
use mergeflow_core::git::{BackendFactory, LocalBackendFactory};
use mergeflow_core::models::WorkflowRunResult;
use mergeflow_core::notify::LogNotifier;
use mergeflow_core::review::SqliteReviewStore;
use mergeflow_core::workflow::AutomationWorkflow;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// mergeflow command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "mergeflow",
    version,
    about = "Drive and inspect the review-to-merge automation pipeline"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "./mergeflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline for an approved review.
    Process {
        /// Review ID.
        review_id: i64,

        /// Repository ID (defaults to the first active repository).
        #[arg(long)]
        repo: Option<String>,

        /// Print the run result as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Mark a review rejected and notify its author.
    Reject {
        /// Review ID.
        review_id: i64,

        /// Why the review was rejected.
        #[arg(long)]
        reason: String,
    },

    /// Evaluate the merge-readiness checklist for a review.
    Gates {
        /// Review ID.
        review_id: i64,
    },

    /// Sweep for stalled reviews and escalate them.
    Stalled,

    /// Delete source branches of old merged pull requests.
    Cleanup {
        /// Only clean up pull requests merged at least this many days ago.
        #[arg(long, default_value = "7")]
        days: u32,
    },

    /// Detect and resolve merge conflicts.
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },

    /// Show recent operation-log entries.
    Operations {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./mergeflow.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,
}

#[derive(Subcommand, Debug)]
enum ConflictsAction {
    /// Detect conflicts merging a source branch into a target branch.
    Detect {
        /// Repository ID (defaults to the first active repository).
        #[arg(long)]
        repo: Option<String>,

        /// Branch to merge from.
        #[arg(long)]
        source: String,

        /// Branch to merge into.
        #[arg(long)]
        target: String,
    },

    /// Resolve conflicts on the source branch by merging the target in.
    Resolve {
        /// Repository ID (defaults to the first active repository).
        #[arg(long)]
        repo: Option<String>,

        /// Branch to resolve on.
        #[arg(long)]
        source: String,

        /// Branch to merge in.
        #[arg(long)]
        target: String,

        /// Strategy: accept_current, accept_incoming, auto_merge, or
        /// smart (per-file suggestions).
        #[arg(long, default_value = "smart")]
        strategy: String,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI; RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        _ => {
            let config = AppConfig::load(&cli.config).context("failed to load configuration")?;
            let db = open_database(&config)?;

            match cli.command {
                Commands::Process {
                    review_id,
                    repo,
                    json,
                } => cmd_process(&config, db, review_id, repo.as_deref(), json).await,
                Commands::Reject { review_id, reason } => {
                    cmd_reject(&config, db, review_id, &reason).await
                }
                Commands::Gates { review_id } => cmd_gates(&config, db, review_id).await,
                Commands::Stalled => cmd_stalled(&config, db).await,
                Commands::Cleanup { days } => cmd_cleanup(&config, db, days).await,
                Commands::Conflicts { action } => cmd_conflicts(&config, db, action).await,
                Commands::Operations { limit } => cmd_operations(&db, limit),
                _ => unreachable!(),
            }
        }
    }
}

fn open_database(config: &AppConfig) -> Result<Arc<Database>> {
    let db = Database::new(&config.database.path).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    Ok(Arc::new(db))
}

fn build_workflow(config: &AppConfig, db: Arc<Database>) -> AutomationWorkflow {
    AutomationWorkflow::new(
        config.workflow.clone(),
        Arc::new(config.clone()),
        Arc::new(LocalBackendFactory),
        Arc::new(SqliteReviewStore::new(db.clone())),
        Arc::new(LogNotifier::new()),
        db,
    )
}

// ---------------------------------------------------------------------------
// Pipeline commands
// ---------------------------------------------------------------------------

async fn cmd_process(
    config: &AppConfig,
    db: Arc<Database>,
    review_id: i64,
    repo: Option<&str>,
    json: bool,
) -> Result<()> {
    let workflow = build_workflow(config, db);
    let result = workflow
        .process_approved_review(review_id, repo)
        .await
        .context("pipeline run failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_run_result(&result);
    }

    if !result.success {
        anyhow::bail!(
            "run for review #{} failed: {}",
            review_id,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_run_result(result: &WorkflowRunResult) {
    println!();
    println!("Review #{}", result.review_id);
    println!();

    if result.stages.is_empty() {
        println!(
            "  No stages ran: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Stage", "Result", "Detail"]);
    for stage in &result.stages {
        let status = if stage.success {
            Cell::new("✓ ok").fg(comfy_table::Color::Green)
        } else {
            Cell::new("✗ failed").fg(comfy_table::Color::Red)
        };
        table.add_row(vec![Cell::new(&stage.stage), status, Cell::new(&stage.message)]);
    }
    println!("{table}");
    println!();
}

async fn cmd_reject(
    config: &AppConfig,
    db: Arc<Database>,
    review_id: i64,
    reason: &str,
) -> Result<()> {
    let workflow = build_workflow(config, db);
    let result = workflow
        .process_rejected_review(review_id, reason)
        .await
        .context("rejection failed")?;

    println!("Review #{} rejected.", result.review_id);
    println!(
        "  Author notified : {}",
        if result.notified { "yes" } else { "no" }
    );
    match result.regeneration {
        Some(req) => println!("  Regeneration    : queued for {}", req.original_artifact_path),
        None => println!("  Regeneration    : disabled"),
    }
    Ok(())
}

async fn cmd_gates(config: &AppConfig, db: Arc<Database>, review_id: i64) -> Result<()> {
    let workflow = build_workflow(config, db);
    let report = workflow
        .enforce_quality_gates(review_id)
        .await
        .context("quality-gate evaluation failed")?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Check", "Result", "Detail"]);
    for check in &report.checks {
        let status = if check.passed {
            Cell::new("✓ pass").fg(comfy_table::Color::Green)
        } else {
            Cell::new("✗ fail").fg(comfy_table::Color::Red)
        };
        table.add_row(vec![Cell::new(&check.name), status, Cell::new(&check.detail)]);
    }
    println!("{table}");
    println!();
    if report.passed {
        println!("Review #{} passes all quality gates.", review_id);
        Ok(())
    } else {
        anyhow::bail!("review #{} does not pass quality gates", review_id)
    }
}

async fn cmd_stalled(config: &AppConfig, db: Arc<Database>) -> Result<()> {
    let workflow = build_workflow(config, db);
    let report = workflow
        .handle_stalled_reviews()
        .await
        .context("stalled-review sweep failed")?;

    println!(
        "Swept {} stalled review(s), escalated {}.",
        report.swept, report.escalated
    );
    Ok(())
}

async fn cmd_cleanup(config: &AppConfig, db: Arc<Database>, days: u32) -> Result<()> {
    let workflow = build_workflow(config, db);
    let report = workflow
        .cleanup_completed_workflows(days)
        .await
        .context("cleanup failed")?;

    println!("Cleanup of pull requests merged over {days} day(s) ago:");
    println!("  Candidates       : {}", report.candidates);
    println!("  Branches deleted : {}", report.deleted_branches);
    println!("  Already gone     : {}", report.skipped_missing);
    Ok(())
}

// ---------------------------------------------------------------------------
// Conflict commands
// ---------------------------------------------------------------------------

fn open_resolver(
    config: &AppConfig,
    db: Arc<Database>,
    repo: Option<&str>,
) -> Result<(ConflictResolver, Arc<dyn mergeflow_core::git::VersionControlBackend>)> {
    let repo_config = match repo {
        Some(id) => config
            .get(id)
            .with_context(|| format!("repository '{id}' is not configured"))?,
        None => config
            .active_default()
            .context("no active repository configured")?,
    };
    let backend = LocalBackendFactory
        .open(&repo_config)
        .context("failed to open working copy")?;
    let resolver = ConflictResolver::new(repo_config.id, backend.clone(), db);
    Ok((resolver, backend))
}

async fn cmd_conflicts(config: &AppConfig, db: Arc<Database>, action: ConflictsAction) -> Result<()> {
    match action {
        ConflictsAction::Detect {
            repo,
            source,
            target,
        } => {
            let (resolver, _) = open_resolver(config, db, repo.as_deref())?;
            let report = resolver
                .detect_conflicts(&source, &target)
                .await
                .context("conflict detection failed")?;

            if !report.has_conflicts {
                println!("No conflicts: {source} merges cleanly into {target}.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["File", "Kind", "Sections", "Suggested", "Auto?"]);
            for conflict in &report.conflicts {
                table.add_row(vec![
                    Cell::new(&conflict.file_path),
                    Cell::new(conflict.kind.to_string()),
                    Cell::new(conflict.sections.len()),
                    Cell::new(conflict.suggested.to_string()),
                    Cell::new(if conflict.auto_resolvable { "yes" } else { "no" }),
                ]);
            }
            println!("{table}");
            println!();
            println!(
                "{} conflict(s) merging {source} into {target}.",
                report.conflicts.len()
            );
            Ok(())
        }
        ConflictsAction::Resolve {
            repo,
            source,
            target,
            strategy,
        } => {
            let choice = parse_strategy(&strategy)?;
            let (resolver, backend) = open_resolver(config, db, repo.as_deref())?;

            let report = resolver
                .detect_conflicts(&source, &target)
                .await
                .context("conflict detection failed")?;
            if !report.has_conflicts {
                println!("Nothing to resolve: {source} merges cleanly into {target}.");
                return Ok(());
            }

            // Materialize the conflicts on the source branch, then
            // rewrite them in place.
            backend.checkout(&source).await?;
            let merge = backend.trial_merge(&target).await?;
            if merge.clean {
                // An up-to-date merge leaves nothing to abort.
                backend.abort_merge().await.ok();
                println!("Nothing to resolve on {source}.");
                return Ok(());
            }

            // The suggestions came from the sandbox merge, which ran in
            // the opposite direction; swap their sides for this one.
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
                .auto_resolve_conflicts(&conflicts, choice)
                .await
                .context("resolution failed")?;

            if resolution.all_resolved() {
                let sha = backend
                    .stage_and_commit(
                        &resolution.resolved,
                        &format!("merge: resolve conflicts with {target}"),
                    )
                    .await?;
                println!(
                    "Resolved {} file(s), committed {}.",
                    resolution.resolved.len(),
                    &sha[..12.min(sha.len())]
                );
            } else {
                backend.abort_merge().await?;
                println!(
                    "Resolved {} file(s); {} left for manual resolution:",
                    resolution.resolved.len(),
                    resolution.failed.len()
                );
                for failure in &resolution.failed {
                    println!("  {} — {}", failure.file_path, failure.reason);
                }
                anyhow::bail!("not all conflicts could be resolved");
            }
            Ok(())
        }
    }
}

fn parse_strategy(s: &str) -> Result<StrategyChoice> {
    if s == "smart" {
        return Ok(StrategyChoice::Smart);
    }
    ResolutionStrategy::from_str_val(s)
        .map(StrategyChoice::Fixed)
        .with_context(|| {
            format!(
                "unknown strategy '{s}' (expected accept_current, accept_incoming, \
                 auto_merge, manual, or smart)"
            )
        })
}

// ---------------------------------------------------------------------------
// Operation log
// ---------------------------------------------------------------------------

fn cmd_operations(db: &Database, limit: usize) -> Result<()> {
    let ops = db
        .recent_operations(limit)
        .context("failed to read operation log")?;

    if ops.is_empty() {
        println!("No operations recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["When", "Repository", "Review", "Kind", "Status", "Detail"]);
    for op in &ops {
        let status = match op.status.to_string().as_str() {
            "completed" => Cell::new("✓ completed").fg(comfy_table::Color::Green),
            "failed" => Cell::new("✗ failed").fg(comfy_table::Color::Red),
            other => Cell::new(other),
        };
        let detail = op
            .error_message
            .as_deref()
            .or(op.output.as_deref())
            .or(op.branch_name.as_deref())
            .unwrap_or("-");
        table.add_row(vec![
            Cell::new(op.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(&op.repository_id),
            Cell::new(
                op.review_id
                    .map(|id| format!("#{id}"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(op.kind.to_string()),
            status,
            Cell::new(detail),
        ]);
    }
    println!("{table}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_init(output: &PathBuf) -> Result<()> {
    let default_config = r#"# mergeflow configuration
# See documentation for all available options.

[workflow]
branch_prefix = "test-review"
min_quality_score = 70.0
stall_threshold_hours = 48
auto_regenerate = false
pr_comment_limit = 5

[[repositories]]
id = "main-repo"
local_path = "/srv/repos/main"
default_branch = "main"
active = true

[database]
path = "./mergeflow.db"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!("Default configuration written to {}", output.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your repository paths");
    println!(
        "  2. Validate with: mergeflow validate --config {}",
        output.display()
    );
    Ok(())
}

fn cmd_validate(config_path: &PathBuf) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let config = AppConfig::load(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");
    println!("  [OK] All required fields are valid");

    println!();
    println!("Configuration summary:");
    println!("  Branch prefix : {}", config.workflow.branch_prefix);
    println!("  Min quality   : {:.1}%", config.workflow.min_quality_score);
    println!("  Repositories  : {}", config.repositories.len());
    for repo in &config.repositories {
        println!(
            "    {} -> {} ({})",
            repo.id,
            repo.local_path.display(),
            if repo.active { "active" } else { "inactive" }
        );
    }
    println!("  Database      : {}", config.database.path.display());
    Ok(())
}
