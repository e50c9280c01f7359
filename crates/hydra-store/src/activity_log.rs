//! Activity log repository.
//!
//! Entries accumulate in `activity_log_entries` until a user's total
//! estimated footprint crosses the configured cap's 80% threshold, at which
//! point the oldest 20% of their entries are rolled into
//! `activity_log_archive` rather than deleted outright — the archive is
//! still queryable, just not counted against the live cap.

use std::str::FromStr;

use chrono::{Datelike, Utc};
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{ActivityCategory, ActivityLogEntry};

/// CRUD access to the activity log, backed by `activity_log_entries` and
/// `activity_log_archive`.
#[derive(Clone)]
pub struct ActivityLogRepository {
    pool: SqlitePool,
}

impl ActivityLogRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an entry to the live log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn append(&self, entry: &ActivityLogEntry) -> Result<(), StoreError> {
        let details = entry
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;

        sqlx::query(
            "INSERT INTO activity_log_entries
                (id, username, timestamp, category, action, target, success, duration_ms,
                 details, ip_address, user_agent, session_id, request_id, estimated_size)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id)
        .bind(&entry.username)
        .bind(entry.timestamp.to_rfc3339())
        .bind(entry.category.as_str())
        .bind(&entry.action)
        .bind(&entry.target)
        .bind(entry.success)
        .bind(entry.duration_ms)
        .bind(details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(&entry.session_id)
        .bind(&entry.request_id)
        .bind(entry.estimated_size())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Sum of `estimated_size` across a user's live (non-archived) entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn live_footprint(&self, username: &str) -> Result<i64, StoreError> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT SUM(estimated_size) FROM activity_log_entries WHERE username = ?",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0.unwrap_or(0))
    }

    /// If a user's live footprint exceeds `threshold_fraction` of `cap_bytes`,
    /// move their oldest `archive_fraction` of live entries into the archive
    /// table. Returns the number of entries archived (0 if under threshold).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any query fails.
    pub async fn archive_if_over_threshold(
        &self,
        username: &str,
        cap_bytes: i64,
        threshold_fraction: f64,
        archive_fraction: f64,
    ) -> Result<u64, StoreError> {
        let footprint = self.live_footprint(username).await?;
        #[allow(clippy::cast_precision_loss)]
        if (footprint as f64) < cap_bytes as f64 * threshold_fraction {
            return Ok(0);
        }

        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM activity_log_entries WHERE username = ?",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        if count == 0 {
            return Ok(0);
        }

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
        let to_archive = ((count as f64) * archive_fraction).ceil() as i64;
        let to_archive = to_archive.max(1).min(count);

        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT id, username, timestamp, category, action, target, success, duration_ms,
                    details, ip_address, user_agent, session_id, request_id, estimated_size
             FROM activity_log_entries
             WHERE username = ?
             ORDER BY timestamp ASC
             LIMIT ?",
        )
        .bind(username)
        .bind(to_archive)
        .fetch_all(&self.pool)
        .await?;

        let mut archived = 0u64;
        for row in rows {
            let entry = row.clone().into_entry()?;
            let archive_year = entry.timestamp.year();

            sqlx::query(
                "INSERT INTO activity_log_archive
                    (id, username, timestamp, category, action, target, success, duration_ms,
                     details, ip_address, user_agent, session_id, request_id, estimated_size, archive_year)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.username)
            .bind(&row.timestamp)
            .bind(&row.category)
            .bind(&row.action)
            .bind(&row.target)
            .bind(row.success)
            .bind(row.duration_ms)
            .bind(&row.details)
            .bind(&row.ip_address)
            .bind(&row.user_agent)
            .bind(&row.session_id)
            .bind(&row.request_id)
            .bind(row.estimated_size)
            .bind(archive_year)
            .execute(&self.pool)
            .await?;

            sqlx::query("DELETE FROM activity_log_entries WHERE id = ?")
                .bind(&row.id)
                .execute(&self.pool)
                .await?;

            archived += 1;
        }

        Ok(archived)
    }

    /// Move every live entry whose timestamp falls in a prior calendar year
    /// into the archive, keyed by that year. Intended to run once per year.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any query fails.
    pub async fn roll_over_prior_years(&self, current_year: i32) -> Result<u64, StoreError> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT id, username, timestamp, category, action, target, success, duration_ms,
                    details, ip_address, user_agent, session_id, request_id, estimated_size
             FROM activity_log_entries
             WHERE CAST(strftime('%Y', timestamp) AS INTEGER) < ?",
        )
        .bind(current_year)
        .fetch_all(&self.pool)
        .await?;

        let mut moved = 0u64;
        for row in rows {
            let entry = row.clone().into_entry()?;
            sqlx::query(
                "INSERT INTO activity_log_archive
                    (id, username, timestamp, category, action, target, success, duration_ms,
                     details, ip_address, user_agent, session_id, request_id, estimated_size, archive_year)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&row.id)
            .bind(&row.username)
            .bind(&row.timestamp)
            .bind(&row.category)
            .bind(&row.action)
            .bind(&row.target)
            .bind(row.success)
            .bind(row.duration_ms)
            .bind(&row.details)
            .bind(&row.ip_address)
            .bind(&row.user_agent)
            .bind(&row.session_id)
            .bind(&row.request_id)
            .bind(row.estimated_size)
            .bind(entry.timestamp.year())
            .execute(&self.pool)
            .await?;

            sqlx::query("DELETE FROM activity_log_entries WHERE id = ?")
                .bind(&row.id)
                .execute(&self.pool)
                .await?;

            moved += 1;
        }

        Ok(moved)
    }

    /// List a user's live entries, most recent first, limited to `limit` rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_recent(&self, username: &str, limit: i64) -> Result<Vec<ActivityLogEntry>, StoreError> {
        let rows = sqlx::query_as::<_, ActivityRow>(
            "SELECT id, username, timestamp, category, action, target, success, duration_ms,
                    details, ip_address, user_agent, session_id, request_id, estimated_size
             FROM activity_log_entries
             WHERE username = ?
             ORDER BY timestamp DESC
             LIMIT ?",
        )
        .bind(username)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ActivityRow::into_entry).collect()
    }
}

#[derive(Clone, sqlx::FromRow)]
struct ActivityRow {
    id: String,
    username: String,
    timestamp: String,
    category: String,
    action: String,
    target: Option<String>,
    success: bool,
    duration_ms: Option<i64>,
    details: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    session_id: Option<String>,
    request_id: Option<String>,
    estimated_size: i64,
}

impl ActivityRow {
    fn into_entry(self) -> Result<ActivityLogEntry, StoreError> {
        let timestamp = chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?
            .with_timezone(&Utc);
        let details = self
            .details
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;

        Ok(ActivityLogEntry {
            id: self.id,
            username: self.username,
            timestamp,
            category: ActivityCategory::from_str(&self.category)
                .map_err(|reason| StoreError::Serialization { reason })?,
            action: self.action,
            target: self.target,
            success: self.success,
            duration_ms: self.duration_ms,
            details,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            session_id: self.session_id,
            request_id: self.request_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pool::connect;
    use uuid::Uuid;

    fn sample_entry(username: &str, timestamp: chrono::DateTime<Utc>) -> ActivityLogEntry {
        ActivityLogEntry {
            id: Uuid::new_v4().to_string(),
            username: username.to_owned(),
            timestamp,
            category: ActivityCategory::Container,
            action: "container.start".to_owned(),
            target: Some("jupyter".to_owned()),
            success: true,
            duration_ms: Some(120),
            details: None,
            ip_address: Some("10.0.0.5".to_owned()),
            user_agent: None,
            session_id: None,
            request_id: None,
        }
    }

    #[tokio::test]
    async fn append_then_list_recent() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = ActivityLogRepository::new(pool);
        repo.append(&sample_entry("liam", Utc::now())).await.expect("append");

        let recent = repo.list_recent("liam", 10).await.expect("list");
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn archive_moves_oldest_fraction_over_threshold() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = ActivityLogRepository::new(pool);

        for i in 0..10 {
            let ts = Utc::now() - chrono::Duration::minutes(10 - i);
            repo.append(&sample_entry("mia", ts)).await.expect("append");
        }

        let footprint = repo.live_footprint("mia").await.expect("footprint");
        let archived = repo
            .archive_if_over_threshold("mia", footprint, 0.5, 0.2)
            .await
            .expect("archive");
        assert!(archived >= 2);

        let remaining = repo.list_recent("mia", 100).await.expect("list");
        assert_eq!(remaining.len() as u64, 10 - archived);
    }

    #[tokio::test]
    async fn archive_is_noop_under_threshold() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = ActivityLogRepository::new(pool);
        repo.append(&sample_entry("noah", Utc::now())).await.expect("append");

        let archived = repo
            .archive_if_over_threshold("noah", 1_000_000_000, 0.8, 0.2)
            .await
            .expect("archive");
        assert_eq!(archived, 0);
    }

    #[tokio::test]
    async fn roll_over_prior_years_moves_old_entries() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = ActivityLogRepository::new(pool);
        let old = Utc::now() - chrono::Duration::days(400);
        repo.append(&sample_entry("olga", old)).await.expect("append old");
        repo.append(&sample_entry("olga", Utc::now())).await.expect("append new");

        let moved = repo.roll_over_prior_years(Utc::now().year()).await.expect("roll over");
        assert_eq!(moved, 1);

        let remaining = repo.list_recent("olga", 100).await.expect("list");
        assert_eq!(remaining.len(), 1);
    }
}
