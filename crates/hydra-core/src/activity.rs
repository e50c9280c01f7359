//! Activity log business logic (C10): records events from every other
//! component and enforces the per-user bounded-footprint policy on top of
//! [`hydra_store::ActivityLogRepository`].

use chrono::{Datelike, Utc};
use hydra_store::models::{ActivityCategory, ActivityLogEntry};
use hydra_store::ActivityLogRepository;
use tracing::warn;
use uuid::Uuid;

use crate::events::{ControlPlaneEvent, EventBus};

/// 100 MB live cap per user.
const CAP_BYTES: i64 = 100 * 1024 * 1024;
/// Archive once a user's live footprint crosses 80% of the cap.
const THRESHOLD_FRACTION: f64 = 0.8;
/// Move the oldest 20% of live entries when the threshold is crossed.
const ARCHIVE_FRACTION: f64 = 0.2;

/// Fields a caller supplies when recording an event; identifiers and
/// timestamps are filled in by [`ActivityLog::record`].
pub struct ActivityInput {
    pub category: ActivityCategory,
    pub action: String,
    pub target: Option<String>,
    pub success: bool,
    pub duration_ms: Option<i64>,
    pub details: Option<serde_json::Value>,
}

/// Wraps the activity log repository with the append-then-archive policy
/// every recording call site should go through.
pub struct ActivityLog {
    repo: ActivityLogRepository,
    bus: Option<EventBus>,
}

impl ActivityLog {
    #[must_use]
    pub fn new(repo: ActivityLogRepository) -> Self {
        Self { repo, bus: None }
    }

    /// Attach an event bus; every recorded entry is also published on it for
    /// the per-user and admin log SSE endpoints to pick up.
    #[must_use]
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Append one event for `username` and, if their live footprint now
    /// exceeds the archival threshold, roll the oldest entries off into the
    /// archive. Archival failures are logged and swallowed: the event itself
    /// has already been durably recorded.
    ///
    /// # Errors
    ///
    /// Returns the store error from the initial insert; never fails due to
    /// a subsequent archival failure.
    pub async fn record(&self, username: &str, input: ActivityInput) -> Result<(), hydra_store::StoreError> {
        let entry = ActivityLogEntry {
            id: Uuid::new_v4().to_string(),
            username: username.to_owned(),
            timestamp: Utc::now(),
            category: input.category,
            action: input.action,
            target: input.target,
            success: input.success,
            duration_ms: input.duration_ms,
            details: input.details,
            ip_address: None,
            user_agent: None,
            session_id: None,
            request_id: None,
        };
        self.repo.append(&entry).await?;

        if let Some(bus) = &self.bus {
            bus.publish(ControlPlaneEvent::ActivityLogged {
                username: username.to_owned(),
                category: entry.category.as_str().to_owned(),
                action: entry.action.clone(),
                success: entry.success,
            });
        }

        if let Err(e) = self
            .repo
            .archive_if_over_threshold(username, CAP_BYTES, THRESHOLD_FRACTION, ARCHIVE_FRACTION)
            .await
        {
            warn!(username, error = %e, "activity log archival failed, continuing");
        }

        Ok(())
    }

    /// Move every live entry from a prior calendar year into the archive.
    /// Intended to run once, on January 1st.
    ///
    /// # Errors
    ///
    /// Returns [`hydra_store::StoreError`] if the sweep query fails.
    pub async fn roll_over_prior_years(&self) -> Result<u64, hydra_store::StoreError> {
        self.repo.roll_over_prior_years(Utc::now().year()).await
    }

    /// A user's most recent live entries, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`hydra_store::StoreError`] if the query fails.
    pub async fn recent(&self, username: &str, limit: i64) -> Result<Vec<ActivityLogEntry>, hydra_store::StoreError> {
        self.repo.list_recent(username, limit).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use hydra_store::pool::connect;

    fn input(action: &str) -> ActivityInput {
        ActivityInput {
            category: ActivityCategory::Container,
            action: action.to_owned(),
            target: None,
            success: true,
            duration_ms: None,
            details: None,
        }
    }

    #[tokio::test]
    async fn record_then_recent_round_trips() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let log = ActivityLog::new(ActivityLogRepository::new(pool));
        log.record("priya", input("container_initialized")).await.expect("record");

        let recent = log.recent("priya", 10).await.expect("recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].action, "container_initialized");
    }

    #[tokio::test]
    async fn archival_failure_path_does_not_block_recording() {
        let pool = connect("sqlite::memory:").await.expect("connect");
        let log = ActivityLog::new(ActivityLogRepository::new(pool));
        for i in 0..5 {
            log.record("quinn", input(&format!("event_{i}"))).await.expect("record");
        }
        let recent = log.recent("quinn", 100).await.expect("recent");
        assert_eq!(recent.len(), 5);
    }
}
