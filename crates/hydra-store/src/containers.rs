//! Container config repository.

use chrono::Utc;
use sqlx::SqlitePool;

use crate::error::StoreError;
use crate::models::ContainerConfig;

/// CRUD access to container configs, backed by the `container_configs` table.
#[derive(Clone)]
pub struct ContainerRepository {
    pool: SqlitePool,
}

impl ContainerRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or fully replace a user's container config.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    pub async fn upsert(&self, config: &ContainerConfig) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO container_configs
                (username, current_node, preset_tier, memory_gb, cpus, storage_gb,
                 gpu_count, resources_expire_at, last_migration_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(username) DO UPDATE SET
                current_node = excluded.current_node,
                preset_tier = excluded.preset_tier,
                memory_gb = excluded.memory_gb,
                cpus = excluded.cpus,
                storage_gb = excluded.storage_gb,
                gpu_count = excluded.gpu_count,
                resources_expire_at = excluded.resources_expire_at,
                last_migration_at = excluded.last_migration_at,
                updated_at = excluded.updated_at",
        )
        .bind(&config.username)
        .bind(&config.current_node)
        .bind(&config.preset_tier)
        .bind(config.memory_gb)
        .bind(config.cpus)
        .bind(config.storage_gb)
        .bind(i64::from(config.gpu_count))
        .bind(config.resources_expire_at.map(|t| t.to_rfc3339()))
        .bind(config.last_migration_at.map(|t| t.to_rfc3339()))
        .bind(config.created_at.to_rfc3339())
        .bind(config.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Look up a user's container config, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn find(&self, username: &str) -> Result<Option<ContainerConfig>, StoreError> {
        let row = sqlx::query_as::<_, ContainerRow>(
            "SELECT username, current_node, preset_tier, memory_gb, cpus, storage_gb,
                    gpu_count, resources_expire_at, last_migration_at, created_at, updated_at
             FROM container_configs WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ContainerRow::into_config).transpose()
    }

    /// Delete a user's container config (idempotent — missing rows are not an error).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn delete(&self, username: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM container_configs WHERE username = ?")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// List every provisioned container, in no particular order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_all(&self) -> Result<Vec<ContainerConfig>, StoreError> {
        let rows = sqlx::query_as::<_, ContainerRow>(
            "SELECT username, current_node, preset_tier, memory_gb, cpus, storage_gb,
                    gpu_count, resources_expire_at, last_migration_at, created_at, updated_at
             FROM container_configs",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ContainerRow::into_config).collect()
    }

    /// List all configs with a `resources_expire_at` strictly before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_expired(&self, now: chrono::DateTime<Utc>) -> Result<Vec<ContainerConfig>, StoreError> {
        let rows = sqlx::query_as::<_, ContainerRow>(
            "SELECT username, current_node, preset_tier, memory_gb, cpus, storage_gb,
                    gpu_count, resources_expire_at, last_migration_at, created_at, updated_at
             FROM container_configs
             WHERE resources_expire_at IS NOT NULL AND resources_expire_at < ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ContainerRow::into_config).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ContainerRow {
    username: String,
    current_node: String,
    preset_tier: String,
    memory_gb: f64,
    cpus: f64,
    storage_gb: f64,
    gpu_count: i64,
    resources_expire_at: Option<String>,
    last_migration_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ContainerRow {
    fn into_config(self) -> Result<ContainerConfig, StoreError> {
        let parse = |s: &str| -> Result<chrono::DateTime<Utc>, StoreError> {
            Ok(chrono::DateTime::parse_from_rfc3339(s)
                .map_err(|e| StoreError::Serialization { reason: e.to_string() })?
                .with_timezone(&Utc))
        };

        Ok(ContainerConfig {
            username: self.username,
            current_node: self.current_node,
            preset_tier: self.preset_tier,
            memory_gb: self.memory_gb,
            cpus: self.cpus,
            storage_gb: self.storage_gb,
            gpu_count: u32::try_from(self.gpu_count).unwrap_or(0),
            resources_expire_at: self.resources_expire_at.as_deref().map(parse).transpose()?,
            last_migration_at: self.last_migration_at.as_deref().map(parse).transpose()?,
            created_at: parse(&self.created_at)?,
            updated_at: parse(&self.updated_at)?,
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

    async fn setup_with_user(username: &str) -> (SqlitePool, ContainerRepository) {
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
        (pool.clone(), ContainerRepository::new(pool))
    }

    fn sample_config(username: &str) -> ContainerConfig {
        let now = Utc::now();
        ContainerConfig {
            username: username.to_owned(),
            current_node: "hydra".to_owned(),
            preset_tier: "conservative".to_owned(),
            memory_gb: 2.0,
            cpus: 1.0,
            storage_gb: 10.0,
            gpu_count: 0,
            resources_expire_at: None,
            last_migration_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_then_find_round_trips() {
        let (_pool, repo) = setup_with_user("alice").await;
        repo.upsert(&sample_config("alice")).await.expect("upsert");

        let found = repo.find("alice").await.expect("find").expect("present");
        assert_eq!(found.preset_tier, "conservative");
    }

    #[tokio::test]
    async fn find_missing_returns_none() {
        let (_pool, repo) = setup_with_user("bob").await;
        assert!(repo.find("bob").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn list_all_returns_every_config() {
        let (_pool, repo) = setup_with_user("dana").await;
        repo.upsert(&sample_config("dana")).await.expect("upsert");

        let all = repo.list_all().await.expect("list");
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn list_expired_only_returns_past_expiry() {
        let (_pool, repo) = setup_with_user("carol").await;
        let mut config = sample_config("carol");
        config.resources_expire_at = Some(Utc::now() - chrono::Duration::seconds(5));
        repo.upsert(&config).await.expect("upsert");

        let expired = repo.list_expired(Utc::now()).await.expect("list");
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].username, "carol");
    }
}
