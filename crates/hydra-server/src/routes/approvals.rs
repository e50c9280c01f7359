//! Quota & approval routes: `/approvals/*`
//!
//! Thin controllers binding to the quota & approval engine.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::resources::selection_from_request;
use crate::state::AppState;
use hydra_core::SubmitOutcome;
use hydra_store::models::{ApprovalRequest, UserQuota};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{username}", post(submit).get(list_for_user))
        .route("/{username}/quota", get(quota))
        .route("/{id}/decide", post(decide))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub target_node: String,
    /// A named catalog tier. Mutually exclusive with the explicit fields below.
    pub preset_tier: Option<String>,
    pub memory_gb: Option<f64>,
    pub cpus: Option<f64>,
    pub storage_gb: Option<f64>,
    pub gpu_count: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub request: ApprovalRequest,
    pub auto_approved: bool,
}

#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    pub approve: bool,
    pub reason: Option<String>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    Json(body): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, AppError> {
    if !auth.may_act_on(&username) {
        return Err(AppError::Forbidden(format!("'{}' may not request resources for '{username}'", auth.username)));
    }

    let selection = selection_from_request(body.preset_tier, body.memory_gb, body.cpus, body.storage_gb, body.gpu_count)?;
    let outcome = state.quotas.submit_resource_request(&username, &selection, &body.target_node).await?;
    let (request, auto_approved) = match outcome {
        SubmitOutcome::AutoApproved(r) => (r, true),
        SubmitOutcome::Pending(r) => (r, false),
    };
    Ok(Json(SubmitResponse { request, auto_approved }))
}

async fn list_for_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<Json<Vec<ApprovalRequest>>, AppError> {
    if !auth.may_act_on(&username) {
        return Err(AppError::Forbidden(format!("'{}' may not view requests for '{username}'", auth.username)));
    }
    let requests = state.approvals.list_for_user(&username).await?;
    Ok(Json(requests))
}

async fn quota(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<Json<UserQuota>, AppError> {
    if !auth.may_act_on(&username) {
        return Err(AppError::Forbidden(format!("'{}' may not view quota for '{username}'", auth.username)));
    }
    let quota = state.quota_records.get(&username).await?;
    Ok(Json(quota))
}

async fn decide(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<DecideRequest>,
) -> Result<Json<ApprovalRequest>, AppError> {
    if !auth.is_privileged() {
        return Err(AppError::Forbidden("only faculty or admins may decide approval requests".to_owned()));
    }
    let decided = state.quotas.decide(&id, body.approve, &auth.username, body.reason).await?;
    Ok(Json(decided))
}
