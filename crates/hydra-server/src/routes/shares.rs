//! Share link routes: `/shares/*`
//!
//! Token issuance and lookup over a user's container endpoints.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;
use hydra_store::models::{ShareAccess, ShareLink};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create))
        .route("/mine", get(list_mine))
        .route("/{token}", get(resolve).delete(revoke))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateShareRequest {
    pub container_name: String,
    pub endpoint: String,
    #[serde(default)]
    pub readonly: bool,
    /// Lifetime in seconds; defaults to 24h.
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ShareResponse {
    pub token: String,
    pub owner_username: String,
    pub container_name: String,
    pub endpoint: String,
    pub access: &'static str,
    pub expires_at: String,
    pub view_count: u64,
}

impl From<ShareLink> for ShareResponse {
    fn from(link: ShareLink) -> Self {
        Self {
            token: link.token,
            owner_username: link.owner_username,
            container_name: link.container_name,
            endpoint: link.endpoint,
            access: link.access.as_str(),
            expires_at: link.expires_at.to_rfc3339(),
            view_count: link.view_count,
        }
    }
}

const DEFAULT_TTL_SECS: i64 = 24 * 3600;
const MAX_TTL_SECS: i64 = 30 * 24 * 3600;

// ── Handlers ─────────────────────────────────────────────────────────

async fn create(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateShareRequest>,
) -> Result<Json<ShareResponse>, AppError> {
    let ttl_secs = body.ttl_secs.unwrap_or(DEFAULT_TTL_SECS).clamp(1, MAX_TTL_SECS);
    let expires_at: DateTime<Utc> = Utc::now() + ChronoDuration::seconds(ttl_secs);

    let link = ShareLink {
        token: Uuid::new_v4().to_string(),
        owner_username: auth.username.clone(),
        container_name: body.container_name,
        endpoint: body.endpoint,
        access: if body.readonly { ShareAccess::Readonly } else { ShareAccess::Full },
        expires_at,
        view_count: 0,
        last_accessed: None,
        created_at: Utc::now(),
    };

    state.shares.insert(&link).await?;
    Ok(Json(link.into()))
}

async fn list_mine(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<ShareResponse>>, AppError> {
    let links = state.shares.list_for_owner(&auth.username).await?;
    Ok(Json(links.into_iter().map(ShareResponse::from).collect()))
}

async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<ShareResponse>, AppError> {
    let link = state.shares.get(&token).await?;
    if !link.is_valid(Utc::now()) {
        return Err(AppError::NotFound(format!("share token '{token}' has expired")));
    }
    state.shares.record_access(&token, Utc::now()).await?;
    Ok(Json(link.into()))
}

async fn revoke(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(token): Path<String>,
) -> Result<StatusCode, AppError> {
    let link = state.shares.get(&token).await?;
    if link.owner_username != auth.username && !auth.is_privileged() {
        return Err(AppError::Forbidden("only the owner may revoke a share link".to_owned()));
    }
    state.shares.revoke(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}
