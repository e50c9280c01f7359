//! Connection bootstrap for the embedded relational store.
//!
//! Opens a SQLite pool with a 5 s busy timeout and foreign-key enforcement
//! enabled, then runs the idempotent `CREATE TABLE IF NOT EXISTS` schema.
//! Migrations are safe to re-run on every startup — there is no migration
//! versioning table, matching the "idempotent CREATE-IF-NOT-EXISTS" contract.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

use crate::error::StoreError;

/// Open (creating if necessary) the store at `database_url` and run migrations.
///
/// `database_url` is a SQLite connection string, e.g. `sqlite://./data/hydra.db`
/// or `sqlite::memory:` for ephemeral test databases.
///
/// # Errors
///
/// Returns [`StoreError::Open`] if the connection or migration fails.
pub async fn connect(database_url: &str) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| StoreError::Open {
            path: database_url.to_owned(),
            reason: e.to_string(),
        })?
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Open {
            path: database_url.to_owned(),
            reason: e.to_string(),
        })?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run the idempotent schema migrations against an already-open pool.
///
/// # Errors
///
/// Returns [`StoreError::Open`] if any statement fails.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| StoreError::Open {
                path: "<pool>".to_owned(),
                reason: format!("migration failed: {e}\nstatement: {statement}"),
            })?;
    }
    Ok(())
}

const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS user_quotas (
        username TEXT PRIMARY KEY,
        email TEXT NOT NULL,
        role TEXT NOT NULL,
        max_memory_gb REAL NOT NULL,
        max_cpus REAL NOT NULL,
        max_storage_gb REAL NOT NULL,
        node_approvals TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS container_configs (
        username TEXT PRIMARY KEY REFERENCES user_quotas(username),
        current_node TEXT NOT NULL,
        preset_tier TEXT NOT NULL,
        memory_gb REAL NOT NULL,
        cpus REAL NOT NULL,
        storage_gb REAL NOT NULL,
        gpu_count INTEGER NOT NULL DEFAULT 0,
        resources_expire_at TEXT,
        last_migration_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS approval_requests (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL REFERENCES user_quotas(username),
        target_node TEXT NOT NULL,
        request_type TEXT NOT NULL,
        memory_gb REAL NOT NULL,
        cpus REAL NOT NULL,
        storage_gb REAL NOT NULL,
        gpu_count INTEGER NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        reason TEXT,
        reviewer TEXT,
        created_at TEXT NOT NULL,
        decided_at TEXT,
        expires_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_approval_requests_user_type_status
        ON approval_requests (username, request_type, status)",
    "CREATE TABLE IF NOT EXISTS share_links (
        token TEXT PRIMARY KEY,
        owner_username TEXT NOT NULL REFERENCES user_quotas(username),
        container_name TEXT NOT NULL,
        endpoint TEXT NOT NULL,
        access TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        view_count INTEGER NOT NULL DEFAULT 0,
        last_accessed TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS migration_records (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL REFERENCES user_quotas(username),
        from_node TEXT NOT NULL,
        to_node TEXT NOT NULL,
        current_step INTEGER NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        error_message TEXT,
        step_log TEXT NOT NULL DEFAULT '[]'
    )",
    "CREATE INDEX IF NOT EXISTS idx_migration_records_user_status
        ON migration_records (username, status)",
    "CREATE TABLE IF NOT EXISTS activity_log_entries (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        category TEXT NOT NULL,
        action TEXT NOT NULL,
        target TEXT,
        success INTEGER NOT NULL,
        duration_ms INTEGER,
        details TEXT,
        ip_address TEXT,
        user_agent TEXT,
        session_id TEXT,
        request_id TEXT,
        estimated_size INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_activity_log_entries_user_ts
        ON activity_log_entries (username, timestamp)",
    "CREATE TABLE IF NOT EXISTS activity_log_archive (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        category TEXT NOT NULL,
        action TEXT NOT NULL,
        target TEXT,
        success INTEGER NOT NULL,
        duration_ms INTEGER,
        details TEXT,
        ip_address TEXT,
        user_agent TEXT,
        session_id TEXT,
        request_id TEXT,
        estimated_size INTEGER NOT NULL,
        archive_year INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_activity_log_archive_user_year
        ON activity_log_archive (username, archive_year)",
    "CREATE TABLE IF NOT EXISTS security_events (
        id TEXT PRIMARY KEY,
        timestamp TEXT NOT NULL,
        username TEXT NOT NULL,
        container_name TEXT NOT NULL,
        event_type TEXT NOT NULL,
        severity TEXT NOT NULL,
        description TEXT NOT NULL,
        metrics TEXT NOT NULL DEFAULT '{}',
        action_taken TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_security_events_user_ts
        ON security_events (username, timestamp)",
];

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_creates_schema_idempotently() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        // Re-running migrations against the same pool must not error.
        run_migrations(&pool).await.expect("second migration run");

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM user_quotas")
            .fetch_one(&pool)
            .await
            .expect("query user_quotas");
        assert_eq!(row.0, 0);
    }
}
