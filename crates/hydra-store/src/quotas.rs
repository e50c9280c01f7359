//! User quota repository.

use std::str::FromStr;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{NodeApprovals, Role, UserQuota};

/// CRUD access to user quotas, backed by the `user_quotas` table.
#[derive(Clone)]
pub struct QuotaRepository {
    pool: SqlitePool,
}

impl QuotaRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or fully replace a user's quota row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn upsert(&self, quota: &UserQuota) -> Result<(), StoreError> {
        let node_approvals = serde_json::to_string(&quota.node_approvals)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;

        sqlx::query(
            "INSERT INTO user_quotas
                (username, email, role, max_memory_gb, max_cpus, max_storage_gb,
                 node_approvals, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET
                email = excluded.email,
                role = excluded.role,
                max_memory_gb = excluded.max_memory_gb,
                max_cpus = excluded.max_cpus,
                max_storage_gb = excluded.max_storage_gb,
                node_approvals = excluded.node_approvals,
                updated_at = excluded.updated_at",
        )
        .bind(&quota.username)
        .bind(&quota.email)
        .bind(quota.role.as_str())
        .bind(quota.max_memory_gb)
        .bind(quota.max_cpus)
        .bind(quota.max_storage_gb)
        .bind(node_approvals)
        .bind(quota.created_at.to_rfc3339())
        .bind(quota.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a user's quota by username.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no quota exists for `username`.
    pub async fn get(&self, username: &str) -> Result<UserQuota, StoreError> {
        let row = sqlx::query_as::<_, QuotaRow>(
            "SELECT username, email, role, max_memory_gb, max_cpus, max_storage_gb,
                    node_approvals, created_at, updated_at
             FROM user_quotas WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "user_quota".to_owned(),
            key: username.to_owned(),
        })?;

        row.into_quota()
    }

    /// Reset a node approval, clearing its grant (used on admin revocation).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the user has no quota.
    pub async fn revoke_node_approval(&self, username: &str, node: &str) -> Result<(), StoreError> {
        let mut quota = self.get(username).await?;
        quota.node_approvals.remove(node);
        quota.updated_at = Utc::now();
        self.upsert(&quota).await
    }

    /// List all quotas whose `node_approvals` entry for `node` has expired.
    ///
    /// This is a full-table scan decoded in Rust rather than in SQL, since
    /// `node_approvals` is stored as an opaque JSON blob — acceptable at this
    /// scale (bounded by the student population of a single cluster).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_with_expired_node_approval(
        &self,
        node: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<UserQuota>, StoreError> {
        let rows = sqlx::query_as::<_, QuotaRow>(
            "SELECT username, email, role, max_memory_gb, max_cpus, max_storage_gb,
                    node_approvals, created_at, updated_at
             FROM user_quotas",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut expired = Vec::new();
        for row in rows {
            let quota = row.into_quota()?;
            if let Some(Some(expiry)) = quota.node_approvals.get(node) {
                if *expiry < now {
                    expired.push(quota);
                }
            }
        }
        Ok(expired)
    }
}

#[derive(sqlx::FromRow)]
struct QuotaRow {
    username: String,
    email: String,
    role: String,
    max_memory_gb: f64,
    max_cpus: f64,
    max_storage_gb: f64,
    node_approvals: String,
    created_at: String,
    updated_at: String,
}

impl QuotaRow {
    fn into_quota(self) -> Result<UserQuota, StoreError> {
        let role = Role::from_str(&self.role).map_err(|reason| StoreError::Serialization { reason })?;
        let node_approvals: NodeApprovals = serde_json::from_str(&self.node_approvals)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?;
        let created_at = chrono::DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?
            .with_timezone(&Utc);
        let updated_at = chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .map_err(|e| StoreError::Serialization { reason: e.to_string() })?
            .with_timezone(&Utc);

        Ok(UserQuota {
            username: self.username,
            email: self.email,
            role,
            max_memory_gb: self.max_memory_gb,
            max_cpus: self.max_cpus,
            max_storage_gb: self.max_storage_gb,
            node_approvals,
            created_at,
            updated_at,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pool::connect;

    fn sample_quota(username: &str) -> UserQuota {
        let now = Utc::now();
        UserQuota {
            username: username.to_owned(),
            email: format!("{username}@example.edu"),
            role: Role::Student,
            max_memory_gb: 4.0,
            max_cpus: 2.0,
            max_storage_gb: 20.0,
            node_approvals: NodeApprovals::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = QuotaRepository::new(pool);
        repo.upsert(&sample_quota("alice")).await.expect("upsert");

        let fetched = repo.get("alice").await.expect("get");
        assert_eq!(fetched.username, "alice");
        assert_eq!(fetched.role, Role::Student);
    }

    #[tokio::test]
    async fn get_missing_user_is_not_found() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = QuotaRepository::new(pool);
        let err = repo.get("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn revoke_node_approval_clears_the_grant() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let repo = QuotaRepository::new(pool);
        let mut quota = sample_quota("carol");
        quota.node_approvals.insert("gpu_node_a".to_owned(), None);
        repo.upsert(&quota).await.expect("upsert");

        repo.revoke_node_approval("carol", "gpu_node_a")
            .await
            .expect("revoke");

        let fetched = repo.get("carol").await.expect("get");
        assert!(!fetched.node_approvals.contains_key("gpu_node_a"));
    }
}
