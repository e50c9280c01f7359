//! Security event repository.

use std::str::FromStr;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{ActionTaken, SecurityEvent, Severity};

/// Append-only access to security events, backed by the `security_events` table.
#[derive(Clone)]
pub struct SecurityEventRepository {
    pool: SqlitePool,
}

impl SecurityEventRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a new event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn record(&self, event: &SecurityEvent) -> Result<(), StoreError> {
        let metrics = serde_json::to_string(&event.metrics)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;

        sqlx::query(
            "INSERT INTO security_events
                (id, timestamp, username, container_name, event_type, severity,
                 description, metrics, action_taken)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(event.timestamp.to_rfc3339())
        .bind(&event.username)
        .bind(&event.container_name)
        .bind(&event.event_type)
        .bind(event.severity.as_str())
        .bind(&event.description)
        .bind(metrics)
        .bind(event.action_taken.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// List a user's events, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_for_user(&self, username: &str, limit: i64) -> Result<Vec<SecurityEvent>, StoreError> {
        let rows = sqlx::query_as::<_, SecurityEventRow>(
            "SELECT id, timestamp, username, container_name, event_type, severity,
                    description, metrics, action_taken
             FROM security_events
             WHERE username = ?
             ORDER BY timestamp DESC
             LIMIT ?",
        )
        .bind(username)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SecurityEventRow::into_event).collect()
    }

    /// Count events at or above `min_severity` for a user within the last
    /// `window_secs` seconds, used to decide whether enforcement should
    /// escalate beyond logging.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn count_recent_at_or_above(
        &self,
        username: &str,
        min_severity: Severity,
        since: chrono::DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let rows = sqlx::query_as::<_, (String,)>(
            "SELECT severity FROM security_events WHERE username = ? AND timestamp >= ?",
        )
        .bind(username)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        let mut count = 0i64;
        for (severity,) in rows {
            let severity = Severity::from_str(&severity).map_err(|reason| StoreError::Serialization { reason })?;
            if severity >= min_severity {
                count += 1;
            }
        }
        Ok(count)
    }
}

#[derive(sqlx::FromRow)]
struct SecurityEventRow {
    id: String,
    timestamp: String,
    username: String,
    container_name: String,
    event_type: String,
    severity: String,
    description: String,
    metrics: String,
    action_taken: String,
}

impl SecurityEventRow {
    fn into_event(self) -> Result<SecurityEvent, StoreError> {
        let timestamp = chrono::DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?
            .with_timezone(&Utc);
        let metrics = serde_json::from_str(&self.metrics)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;

        Ok(SecurityEvent {
            id: self.id,
            timestamp,
            username: self.username,
            container_name: self.container_name,
            event_type: self.event_type,
            severity: Severity::from_str(&self.severity).map_err(|reason| StoreError::Serialization { reason })?,
            description: self.description,
            metrics,
            action_taken: ActionTaken::from_str(&self.action_taken)
                .map_err(|reason| StoreError::Serialization { reason })?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pool::connect;
    use uuid::Uuid;

    fn sample_event(username: &str, severity: Severity) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            username: username.to_owned(),
            container_name: "jupyter".to_owned(),
            event_type: "cpu_spike".to_owned(),
            severity,
            description: "sustained CPU usage above threshold".to_owned(),
            metrics: serde_json::json!({"cpu_pct": 97.5}),
            action_taken: ActionTaken::Logged,
        }
    }

    #[tokio::test]
    async fn record_then_list_for_user() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = SecurityEventRepository::new(pool);
        repo.record(&sample_event("petra", Severity::Warning)).await.expect("record");

        let events = repo.list_for_user("petra", 10).await.expect("list");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].severity, Severity::Warning);
    }

    #[tokio::test]
    async fn count_recent_at_or_above_filters_by_severity() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = SecurityEventRepository::new(pool);
        repo.record(&sample_event("quinn", Severity::Info)).await.expect("record");
        repo.record(&sample_event("quinn", Severity::Critical)).await.expect("record");

        let count = repo
            .count_recent_at_or_above("quinn", Severity::Warning, Utc::now() - chrono::Duration::hours(1))
            .await
            .expect("count");
        assert_eq!(count, 1);
    }
}
