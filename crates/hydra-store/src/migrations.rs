//! Migration record repository.

use std::str::FromStr;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{MigrationRecord, MigrationStatus, MigrationStep};

/// CRUD access to migration records, backed by the `migration_records` table.
#[derive(Clone)]
pub struct MigrationRepository {
    pool: SqlitePool,
}

impl MigrationRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new in-progress migration record.
    ///
    /// Callers must have already superseded any prior in-progress record for
    /// this user via [`Self::find_in_progress`] and [`Self::mark_failed`] —
    /// only one migration may be in progress per user at a time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn insert(&self, record: &MigrationRecord) -> Result<(), StoreError> {
        let step_log = serde_json::to_string(&record.step_log)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;

        sqlx::query(
            "INSERT INTO migration_records
                (id, username, from_node, to_node, current_step, status,
                 started_at, completed_at, error_message, step_log)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.username)
        .bind(&record.from_node)
        .bind(&record.to_node)
        .bind(record.current_step)
        .bind(record.status.as_str())
        .bind(record.started_at.to_rfc3339())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(&record.error_message)
        .bind(step_log)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append a step to the log and advance `current_step`, persisting both
    /// in one write so a reader never observes a log entry without the
    /// matching step counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such record exists.
    pub async fn advance(&self, record: &MigrationRecord) -> Result<(), StoreError> {
        let step_log = serde_json::to_string(&record.step_log)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;

        let result = sqlx::query(
            "UPDATE migration_records
             SET current_step = ?, status = ?, completed_at = ?, error_message = ?, step_log = ?
             WHERE id = ?",
        )
        .bind(record.current_step)
        .bind(record.status.as_str())
        .bind(record.completed_at.map(|t| t.to_rfc3339()))
        .bind(&record.error_message)
        .bind(step_log)
        .bind(&record.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "migration_record".to_owned(),
                key: record.id.clone(),
            });
        }
        Ok(())
    }

    /// Find the in-progress migration for a user, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn find_in_progress(&self, username: &str) -> Result<Option<MigrationRecord>, StoreError> {
        let row = sqlx::query_as::<_, MigrationRow>(
            "SELECT id, username, from_node, to_node, current_step, status,
                    started_at, completed_at, error_message, step_log
             FROM migration_records
             WHERE username = ? AND status = 'in_progress'",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MigrationRow::into_record).transpose()
    }

    /// Find a record by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such record exists.
    pub async fn get(&self, id: &str) -> Result<MigrationRecord, StoreError> {
        let row = sqlx::query_as::<_, MigrationRow>(
            "SELECT id, username, from_node, to_node, current_step, status,
                    started_at, completed_at, error_message, step_log
             FROM migration_records WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "migration_record".to_owned(),
            key: id.to_owned(),
        })?;

        row.into_record()
    }

    /// List all migration records for a user, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_for_user(&self, username: &str) -> Result<Vec<MigrationRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MigrationRow>(
            "SELECT id, username, from_node, to_node, current_step, status,
                    started_at, completed_at, error_message, step_log
             FROM migration_records
             WHERE username = ?
             ORDER BY started_at DESC",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MigrationRow::into_record).collect()
    }
}

#[derive(sqlx::FromRow)]
struct MigrationRow {
    id: String,
    username: String,
    from_node: String,
    to_node: String,
    current_step: i32,
    status: String,
    started_at: String,
    completed_at: Option<String>,
    error_message: Option<String>,
    step_log: String,
}

impl MigrationRow {
    fn into_record(self) -> Result<MigrationRecord, StoreError> {
        let parse = |s: &str| -> Result<chrono::DateTime<Utc>, StoreError> {
            Ok(chrono::DateTime::parse_from_rfc3339(s)
                .map_err(|e| StoreError::Serialization { reason: e.to_string() })?
                .with_timezone(&Utc))
        };
        let step_log: Vec<MigrationStep> = serde_json::from_str(&self.step_log)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;

        Ok(MigrationRecord {
            id: self.id,
            username: self.username,
            from_node: self.from_node,
            to_node: self.to_node,
            current_step: self.current_step,
            status: MigrationStatus::from_str(&self.status)
                .map_err(|reason| StoreError::Serialization { reason })?,
            started_at: parse(&self.started_at)?,
            completed_at: self.completed_at.as_deref().map(parse).transpose()?,
            error_message: self.error_message,
            step_log,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pool::connect;
    use crate::quotas::QuotaRepository;
    use crate::models::{NodeApprovals, Role, UserQuota};
    use uuid::Uuid;

    async fn setup_with_user(username: &str) -> MigrationRepository {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let quotas = QuotaRepository::new(pool.clone());
        let now = Utc::now();
        quotas
            .upsert(&UserQuota {
                username: username.to_owned(),
                email: format!("{username}@example.edu"),
                role: Role::Student,
                max_memory_gb: 4.0,
                max_cpus: 2.0,
                max_storage_gb: 20.0,
                node_approvals: NodeApprovals::new(),
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("seed quota");
        MigrationRepository::new(pool)
    }

    fn sample_record(username: &str) -> MigrationRecord {
        MigrationRecord {
            id: Uuid::new_v4().to_string(),
            username: username.to_owned(),
            from_node: "hydra".to_owned(),
            to_node: "cerberus".to_owned(),
            current_step: 0,
            status: MigrationStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            step_log: vec![MigrationStep {
                step: 0,
                timestamp: Utc::now(),
                message: "migration started".to_owned(),
            }],
        }
    }

    #[tokio::test]
    async fn insert_then_find_in_progress() {
        let repo = setup_with_user("jack").await;
        let record = sample_record("jack");
        repo.insert(&record).await.expect("insert");

        let found = repo.find_in_progress("jack").await.expect("query").expect("present");
        assert_eq!(found.current_step, 0);
    }

    #[tokio::test]
    async fn advance_updates_step_and_log() {
        let repo = setup_with_user("kira").await;
        let mut record = sample_record("kira");
        repo.insert(&record).await.expect("insert");

        record.current_step = 10;
        record.status = MigrationStatus::Completed;
        record.completed_at = Some(Utc::now());
        record.step_log.push(MigrationStep {
            step: 10,
            timestamp: Utc::now(),
            message: "migration completed".to_owned(),
        });
        repo.advance(&record).await.expect("advance");

        let fetched = repo.get(&record.id).await.expect("get");
        assert_eq!(fetched.status, MigrationStatus::Completed);
        assert_eq!(fetched.step_log.len(), 2);
        assert!(repo.find_in_progress("kira").await.expect("query").is_none());
    }
}
