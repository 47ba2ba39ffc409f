//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The current schema
//! version is tracked in the SQLite `user_version` pragma.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[(
    1,
    "initial schema",
    r#"
        CREATE TABLE IF NOT EXISTS git_operations (
            id              TEXT PRIMARY KEY,
            repository_id   TEXT NOT NULL,
            review_id       INTEGER,
            kind            TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'in_progress', 'completed', 'failed', 'cancelled')),
            branch_name     TEXT,
            commit_hash     TEXT,
            pr_number       INTEGER,
            output          TEXT,
            error_message   TEXT,
            triggered_by    TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            started_at      TEXT,
            completed_at    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_git_operations_review ON git_operations (review_id);
        CREATE INDEX IF NOT EXISTS idx_git_operations_repo ON git_operations (repository_id);
        CREATE INDEX IF NOT EXISTS idx_git_operations_status ON git_operations (status);

        CREATE TABLE IF NOT EXISTS pull_requests (
            id              TEXT PRIMARY KEY,
            repository_id   TEXT NOT NULL,
            review_id       INTEGER NOT NULL,
            pr_number       INTEGER NOT NULL,
            title           TEXT NOT NULL,
            description     TEXT NOT NULL DEFAULT '',
            source_branch   TEXT NOT NULL,
            target_branch   TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'draft',
            mergeable       INTEGER,
            ci_state        TEXT,
            ci_triggered_at TEXT,
            merge_commit_sha TEXT,
            created_at      TEXT NOT NULL,
            merged_at       TEXT,
            closed_at       TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_pull_requests_repo ON pull_requests (repository_id);
        CREATE INDEX IF NOT EXISTS idx_pull_requests_status ON pull_requests (status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_pull_requests_number
            ON pull_requests (repository_id, pr_number);

        CREATE TABLE IF NOT EXISTS reviews (
            id                  INTEGER PRIMARY KEY,
            title               TEXT NOT NULL,
            description         TEXT NOT NULL DEFAULT '',
            status              TEXT NOT NULL DEFAULT 'pending',
            priority            TEXT NOT NULL DEFAULT 'medium',
            assignee            TEXT,
            reviewer            TEXT,
            artifact_path       TEXT NOT NULL,
            artifact_content    TEXT NOT NULL DEFAULT '',
            quality_score       REAL,
            metrics_completed_at TEXT,
            comments            TEXT NOT NULL DEFAULT '[]',
            escalation_count    INTEGER NOT NULL DEFAULT 0,
            last_escalated_at   TEXT,
            status_note         TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_reviews_status ON reviews (status);
        "#,
)];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        assert!(tables.contains(&"git_operations".to_string()));
        assert!(tables.contains(&"pull_requests".to_string()));
        assert!(tables.contains(&"reviews".to_string()));
    }
}
