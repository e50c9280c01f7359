//! Share link repository.

use std::str::FromStr;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{ShareAccess, ShareLink};

/// CRUD access to share links, backed by the `share_links` table.
#[derive(Clone)]
pub struct ShareRepository {
    pool: SqlitePool,
}

impl ShareRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new share link.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn insert(&self, link: &ShareLink) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO share_links
                (token, owner_username, container_name, endpoint, access,
                 expires_at, view_count, last_accessed, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&link.token)
        .bind(&link.owner_username)
        .bind(&link.container_name)
        .bind(&link.endpoint)
        .bind(link.access.as_str())
        .bind(link.expires_at.to_rfc3339())
        .bind(i64::try_from(link.view_count).unwrap_or(i64::MAX))
        .bind(link.last_accessed.map(|t| t.to_rfc3339()))
        .bind(link.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a link by token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such token exists.
    pub async fn get(&self, token: &str) -> Result<ShareLink, StoreError> {
        let row = sqlx::query_as::<_, ShareRow>(
            "SELECT token, owner_username, container_name, endpoint, access,
                    expires_at, view_count, last_accessed, created_at
             FROM share_links WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "share_link".to_owned(),
            key: token.to_owned(),
        })?;

        row.into_link()
    }

    /// Atomically bump the view count and last-accessed timestamp for a token.
    ///
    /// Uses `view_count = view_count + 1` in SQL so concurrent accesses from
    /// distinct connections are serialized by SQLite's writer lock rather than
    /// racing on a read-modify-write in application code.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such token exists.
    pub async fn record_access(&self, token: &str, at: chrono::DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE share_links SET view_count = view_count + 1, last_accessed = ? WHERE token = ?",
        )
        .bind(at.to_rfc3339())
        .bind(token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "share_link".to_owned(),
                key: token.to_owned(),
            });
        }
        Ok(())
    }

    /// Revoke (delete) a link before its natural expiry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError]` if the query fails.
    pub async fn revoke(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM share_links WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List all links owned by a user.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_for_owner(&self, owner_username: &str) -> Result<Vec<ShareLink>, StoreError> {
        let rows = sqlx::query_as::<_, ShareRow>(
            "SELECT token, owner_username, container_name, endpoint, access,
                    expires_at, view_count, last_accessed, created_at
             FROM share_links WHERE owner_username = ?
             ORDER BY created_at DESC",
        )
        .bind(owner_username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ShareRow::into_link).collect()
    }

    /// Delete all links past their expiry (housekeeping sweep).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn purge_expired(&self, now: chrono::DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM share_links WHERE expires_at < ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct ShareRow {
    token: String,
    owner_username: String,
    container_name: String,
    endpoint: String,
    access: String,
    expires_at: String,
    view_count: i64,
    last_accessed: Option<String>,
    created_at: String,
}

impl ShareRow {
    fn into_link(self) -> Result<ShareLink, StoreError> {
        let parse = |s: &str| -> Result<chrono::DateTime<Utc>, StoreError> {
            Ok(chrono::DateTime::parse_from_rfc3339(s)
                .map_err(|e| StoreError::Serialization { reason: e.to_string() })?
                .with_timezone(&Utc))
        };

        Ok(ShareLink {
            token: self.token,
            owner_username: self.owner_username,
            container_name: self.container_name,
            endpoint: self.endpoint,
            access: ShareAccess::from_str(&self.access)
                .map_err(|reason| StoreError::Serialization { reason })?,
            expires_at: parse(&self.expires_at)?,
            view_count: u64::try_from(self.view_count).unwrap_or(0),
            last_accessed: self.last_accessed.as_deref().map(parse).transpose()?,
            created_at: parse(&self.created_at)?,
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

    async fn setup_with_user(username: &str) -> ShareRepository {
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
        ShareRepository::new(pool)
    }

    fn sample_link(owner: &str) -> ShareLink {
        ShareLink {
            token: "tok_abc123".to_owned(),
            owner_username: owner.to_owned(),
            container_name: "jupyter".to_owned(),
            endpoint: "https://hydra.example.edu/u/gwen/jupyter".to_owned(),
            access: ShareAccess::Readonly,
            expires_at: Utc::now() + chrono::Duration::hours(24),
            view_count: 0,
            last_accessed: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let repo = setup_with_user("gwen").await;
        repo.insert(&sample_link("gwen")).await.expect("insert");

        let fetched = repo.get("tok_abc123").await.expect("get");
        assert_eq!(fetched.view_count, 0);
    }

    #[tokio::test]
    async fn record_access_increments_view_count() {
        let repo = setup_with_user("hank").await;
        repo.insert(&sample_link("hank")).await.expect("insert");

        repo.record_access("tok_abc123", Utc::now()).await.expect("record");
        repo.record_access("tok_abc123", Utc::now()).await.expect("record");

        let fetched = repo.get("tok_abc123").await.expect("get");
        assert_eq!(fetched.view_count, 2);
        assert!(fetched.last_accessed.is_some());
    }

    #[tokio::test]
    async fn purge_expired_removes_only_past_links() {
        let repo = setup_with_user("ivy").await;
        let mut expired = sample_link("ivy");
        expired.token = "tok_expired".to_owned();
        expired.expires_at = Utc::now() - chrono::Duration::hours(1);
        repo.insert(&expired).await.expect("insert expired");
        repo.insert(&sample_link("ivy")).await.expect("insert live");

        let purged = repo.purge_expired(Utc::now()).await.expect("purge");
        assert_eq!(purged, 1);
        assert!(repo.get("tok_expired").await.is_err());
        assert!(repo.get("tok_abc123").await.is_ok());
    }
}
