//! Row types for the persistence store.
//!
//! These mirror the data model in the specification directly: one struct
//! per entity, with small enums for the fields that are constrained to a
//! fixed vocabulary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's role, derived from identity-provider group membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Faculty,
    Admin,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Faculty => "faculty",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Self::Student),
            "faculty" => Ok(Self::Faculty),
            "admin" => Ok(Self::Admin),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// A node approval grant: non-expiring (`None`) or time-limited.
pub type NodeApprovals = HashMap<String, Option<DateTime<Utc>>>;

/// A user's resource quota and node-access approvals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuota {
    pub username: String,
    pub email: String,
    pub role: Role,
    pub max_memory_gb: f64,
    pub max_cpus: f64,
    pub max_storage_gb: f64,
    /// Keyed by node name; `Some(expiry)` for time-limited grants, `None` for permanent.
    pub node_approvals: NodeApprovals,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserQuota {
    /// Whether `node` is currently approved (present and not expired).
    #[must_use]
    pub fn is_node_approved(&self, node: &str, now: DateTime<Utc>) -> bool {
        match self.node_approvals.get(node) {
            Some(Some(expiry)) => *expiry > now,
            Some(None) => true,
            None => false,
        }
    }
}

/// A user's currently provisioned container, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub username: String,
    pub current_node: String,
    pub preset_tier: String,
    pub memory_gb: f64,
    pub cpus: f64,
    pub storage_gb: f64,
    pub gpu_count: u32,
    pub resources_expire_at: Option<DateTime<Utc>>,
    pub last_migration_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The kind of approval being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Resources,
    NodeAccess,
    JupyterExecution,
    GpuAccess,
}

impl RequestType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resources => "resources",
            Self::NodeAccess => "node_access",
            Self::JupyterExecution => "jupyter_execution",
            Self::GpuAccess => "gpu_access",
        }
    }
}

impl std::str::FromStr for RequestType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resources" => Ok(Self::Resources),
            "node_access" => Ok(Self::NodeAccess),
            "jupyter_execution" => Ok(Self::JupyterExecution),
            "gpu_access" => Ok(Self::GpuAccess),
            other => Err(format!("unknown request type '{other}'")),
        }
    }
}

/// Lifecycle status of an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    AutoApproved,
    Expired,
}

impl ApprovalStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
            Self::AutoApproved => "auto_approved",
            Self::Expired => "expired",
        }
    }

    /// Terminal statuses are not subject to the one-pending-per-type invariant.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "denied" => Ok(Self::Denied),
            "auto_approved" => Ok(Self::AutoApproved),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown approval status '{other}'")),
        }
    }
}

/// The resource bundle requested or granted by an approval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RequestedResources {
    pub memory_gb: f64,
    pub cpus: f64,
    pub storage_gb: f64,
    pub gpu_count: u32,
}

/// A pending, resolved, or auto-approved request for resources or node access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub username: String,
    pub target_node: String,
    pub request_type: RequestType,
    pub resources: RequestedResources,
    pub status: ApprovalStatus,
    pub reason: Option<String>,
    pub reviewer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Level of access a share link grants to a container's endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareAccess {
    Readonly,
    Full,
}

impl ShareAccess {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Readonly => "readonly",
            Self::Full => "full",
        }
    }
}

impl std::str::FromStr for ShareAccess {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "readonly" => Ok(Self::Readonly),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown share access '{other}'")),
        }
    }
}

/// An unguessable, time-limited link granting access to a container endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareLink {
    pub token: String,
    pub owner_username: String,
    pub container_name: String,
    pub endpoint: String,
    pub access: ShareAccess,
    pub expires_at: DateTime<Utc>,
    pub view_count: u64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ShareLink {
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Status of a migration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    InProgress,
    Completed,
    Failed,
}

impl MigrationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MigrationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown migration status '{other}'")),
        }
    }
}

/// One transition recorded on a migration's step log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStep {
    pub step: i32,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// The full lifecycle record of one cross-node container migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub id: String,
    pub username: String,
    pub from_node: String,
    pub to_node: String,
    /// Ordinal 0..10 on success, -1 on failure.
    pub current_step: i32,
    pub status: MigrationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub step_log: Vec<MigrationStep>,
}

/// The category an activity log entry is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityCategory {
    Container,
    Service,
    Route,
    Auth,
    Resource,
    Account,
    System,
    Error,
}

impl ActivityCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Container => "container",
            Self::Service => "service",
            Self::Route => "route",
            Self::Auth => "auth",
            Self::Resource => "resource",
            Self::Account => "account",
            Self::System => "system",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for ActivityCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "container" => Ok(Self::Container),
            "service" => Ok(Self::Service),
            "route" => Ok(Self::Route),
            "auth" => Ok(Self::Auth),
            "resource" => Ok(Self::Resource),
            "account" => Ok(Self::Account),
            "system" => Ok(Self::System),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown activity category '{other}'")),
        }
    }
}

/// A single append-only activity log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id: String,
    pub username: String,
    pub timestamp: DateTime<Utc>,
    pub category: ActivityCategory,
    pub action: String,
    pub target: Option<String>,
    pub success: bool,
    pub duration_ms: Option<i64>,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
}

impl ActivityLogEntry {
    /// Estimate the on-disk footprint of this entry (field lengths plus a
    /// constant per-row overhead), used to enforce the per-user size cap.
    #[must_use]
    pub fn estimated_size(&self) -> i64 {
        const ROW_OVERHEAD: i64 = 128;
        let mut size = ROW_OVERHEAD;
        size += self.username.len() as i64;
        size += self.action.len() as i64;
        size += self.target.as_ref().map_or(0, |t| t.len() as i64);
        size += self
            .details
            .as_ref()
            .map_or(0, |d| d.to_string().len() as i64);
        size += self.ip_address.as_ref().map_or(0, |v| v.len() as i64);
        size += self.user_agent.as_ref().map_or(0, |v| v.len() as i64);
        size += self.session_id.as_ref().map_or(0, |v| v.len() as i64);
        size += self.request_id.as_ref().map_or(0, |v| v.len() as i64);
        size
    }
}

/// Severity of a recorded security event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// What enforcement action, if any, the security monitor took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    Logged,
    Alerted,
    ContainerPaused,
    PauseFailed,
}

impl ActionTaken {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Logged => "logged",
            Self::Alerted => "alerted",
            Self::ContainerPaused => "container_paused",
            Self::PauseFailed => "pause_failed",
        }
    }
}

impl std::str::FromStr for ActionTaken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logged" => Ok(Self::Logged),
            "alerted" => Ok(Self::Alerted),
            "container_paused" => Ok(Self::ContainerPaused),
            "pause_failed" => Ok(Self::PauseFailed),
            other => Err(format!("unknown action_taken '{other}'")),
        }
    }
}

/// A recorded abuse or stability event for one container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub container_name: String,
    pub event_type: String,
    pub severity: Severity,
    pub description: String,
    pub metrics: serde_json::Value,
    pub action_taken: ActionTaken,
}
