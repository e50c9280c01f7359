//! Approval request repository.

use std::str::FromStr;

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::{ApprovalRequest, ApprovalStatus, RequestType, RequestedResources};

/// CRUD access to approval requests, backed by the `approval_requests` table.
#[derive(Clone)]
pub struct ApprovalRepository {
    pool: SqlitePool,
}

impl ApprovalRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new request.
    ///
    /// Callers are expected to have already checked the one-pending-per-type
    /// invariant via [`Self::find_pending`] before calling this; the
    /// repository itself does not enforce it, since the check legitimately
    /// spans a read and a write that the caller may want to serialize
    /// against other state (e.g. a per-user lock).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn insert(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_requests
                (id, username, target_node, request_type, memory_gb, cpus, storage_gb,
                 gpu_count, status, reason, reviewer, created_at, decided_at, expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id)
        .bind(&request.username)
        .bind(&request.target_node)
        .bind(request.request_type.as_str())
        .bind(request.resources.memory_gb)
        .bind(request.resources.cpus)
        .bind(request.resources.storage_gb)
        .bind(i64::from(request.resources.gpu_count))
        .bind(request.status.as_str())
        .bind(&request.reason)
        .bind(&request.reviewer)
        .bind(request.created_at.to_rfc3339())
        .bind(request.decided_at.map(|t| t.to_rfc3339()))
        .bind(request.expires_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update an existing request's decision fields (status/reviewer/reason/decided_at).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no request with that id exists.
    pub async fn decide(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE approval_requests
             SET status = ?, reason = ?, reviewer = ?, decided_at = ?
             WHERE id = ?",
        )
        .bind(request.status.as_str())
        .bind(&request.reason)
        .bind(&request.reviewer)
        .bind(request.decided_at.map(|t| t.to_rfc3339()))
        .bind(&request.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "approval_request".to_owned(),
                key: request.id.clone(),
            });
        }
        Ok(())
    }

    /// Find a request by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no such request exists.
    pub async fn get(&self, id: &str) -> Result<ApprovalRequest, StoreError> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            "SELECT id, username, target_node, request_type, memory_gb, cpus, storage_gb,
                    gpu_count, status, reason, reviewer, created_at, decided_at, expires_at
             FROM approval_requests WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound {
            entity: "approval_request".to_owned(),
            key: id.to_owned(),
        })?;

        row.into_request()
    }

    /// Find the pending request, if any, for this user and request type.
    ///
    /// Backs the one-pending-per-type invariant.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn find_pending(
        &self,
        username: &str,
        request_type: RequestType,
    ) -> Result<Option<ApprovalRequest>, StoreError> {
        let row = sqlx::query_as::<_, ApprovalRow>(
            "SELECT id, username, target_node, request_type, memory_gb, cpus, storage_gb,
                    gpu_count, status, reason, reviewer, created_at, decided_at, expires_at
             FROM approval_requests
             WHERE username = ? AND request_type = ? AND status = 'pending'",
        )
        .bind(username)
        .bind(request_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ApprovalRow::into_request).transpose()
    }

    /// List all requests for a user, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_for_user(&self, username: &str) -> Result<Vec<ApprovalRequest>, StoreError> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            "SELECT id, username, target_node, request_type, memory_gb, cpus, storage_gb,
                    gpu_count, status, reason, reviewer, created_at, decided_at, expires_at
             FROM approval_requests
             WHERE username = ?
             ORDER BY created_at DESC",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ApprovalRow::into_request).collect()
    }

    /// List all still-pending requests whose `expires_at` is before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_expired_pending(
        &self,
        now: chrono::DateTime<Utc>,
    ) -> Result<Vec<ApprovalRequest>, StoreError> {
        let rows = sqlx::query_as::<_, ApprovalRow>(
            "SELECT id, username, target_node, request_type, memory_gb, cpus, storage_gb,
                    gpu_count, status, reason, reviewer, created_at, decided_at, expires_at
             FROM approval_requests
             WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at < ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ApprovalRow::into_request).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ApprovalRow {
    id: String,
    username: String,
    target_node: String,
    request_type: String,
    memory_gb: f64,
    cpus: f64,
    storage_gb: f64,
    gpu_count: i64,
    status: String,
    reason: Option<String>,
    reviewer: Option<String>,
    created_at: String,
    decided_at: Option<String>,
    expires_at: Option<String>,
}

impl ApprovalRow {
    fn into_request(self) -> Result<ApprovalRequest, StoreError> {
        let parse = |s: &str| -> Result<chrono::DateTime<Utc>, StoreError> {
            Ok(chrono::DateTime::parse_from_rfc3339(s)
                .map_err(|e| StoreError::Serialization { reason: e.to_string() })?
                .with_timezone(&Utc))
        };

        Ok(ApprovalRequest {
            id: self.id,
            username: self.username,
            target_node: self.target_node,
            request_type: RequestType::from_str(&self.request_type)
                .map_err(|reason| StoreError::Serialization { reason })?,
            resources: RequestedResources {
                memory_gb: self.memory_gb,
                cpus: self.cpus,
                storage_gb: self.storage_gb,
                gpu_count: u32::try_from(self.gpu_count).unwrap_or(0),
            },
            status: ApprovalStatus::from_str(&self.status)
                .map_err(|reason| StoreError::Serialization { reason })?,
            reason: self.reason,
            reviewer: self.reviewer,
            created_at: parse(&self.created_at)?,
            decided_at: self.decided_at.as_deref().map(parse).transpose()?,
            expires_at: self.expires_at.as_deref().map(parse).transpose()?,
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

    async fn setup_with_user(username: &str) -> ApprovalRepository {
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
        ApprovalRepository::new(pool)
    }

    fn sample_request(username: &str, request_type: RequestType) -> ApprovalRequest {
        ApprovalRequest {
            id: Uuid::new_v4().to_string(),
            username: username.to_owned(),
            target_node: "hydra".to_owned(),
            request_type,
            resources: RequestedResources {
                memory_gb: 8.0,
                cpus: 4.0,
                storage_gb: 50.0,
                gpu_count: 0,
            },
            status: ApprovalStatus::Pending,
            reason: None,
            reviewer: None,
            created_at: Utc::now(),
            decided_at: None,
            expires_at: Some(Utc::now() + chrono::Duration::days(7)),
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let repo = setup_with_user("dave").await;
        let req = sample_request("dave", RequestType::Resources);
        repo.insert(&req).await.expect("insert");

        let fetched = repo.get(&req.id).await.expect("get");
        assert_eq!(fetched.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn find_pending_respects_type_and_status() {
        let repo = setup_with_user("erin").await;
        let req = sample_request("erin", RequestType::GpuAccess);
        repo.insert(&req).await.expect("insert");

        let pending = repo
            .find_pending("erin", RequestType::GpuAccess)
            .await
            .expect("query");
        assert!(pending.is_some());

        let other = repo
            .find_pending("erin", RequestType::NodeAccess)
            .await
            .expect("query");
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn decide_transitions_out_of_pending() {
        let repo = setup_with_user("frank").await;
        let mut req = sample_request("frank", RequestType::Resources);
        repo.insert(&req).await.expect("insert");

        req.status = ApprovalStatus::Approved;
        req.reviewer = Some("admin@example.edu".to_owned());
        req.decided_at = Some(Utc::now());
        repo.decide(&req).await.expect("decide");

        assert!(repo
            .find_pending("frank", RequestType::Resources)
            .await
            .expect("query")
            .is_none());
    }
}
