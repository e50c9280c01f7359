//! Container lifecycle routes: `/containers/*`
//!
//! Thin controllers binding to the container service; payload conversion
//! only, no business logic lives here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::resources::selection_from_request;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{username}/init", post(init))
        .route("/{username}/status", get(status))
        .route("/{username}/start", post(start))
        .route("/{username}/stop", post(stop))
        .route("/{username}/destroy", post(destroy))
        .route("/{username}/wipe", post(wipe))
        .route("/{username}/routes", post(add_route).delete(remove_route))
        .route("/{username}/keys/regenerate", post(regenerate_keys))
        .route("/services/{svc}/start", post(service_start_unavailable))
        .route("/services/{svc}/stop", post(service_stop_unavailable))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InitRequest {
    pub target_node: String,
    /// A named catalog tier. Mutually exclusive with the explicit fields below.
    pub preset_tier: Option<String>,
    pub memory_gb: Option<f64>,
    pub cpus: Option<f64>,
    pub storage_gb: Option<f64>,
    pub gpu_count: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct InitResponse {
    pub workload_name: String,
    pub editor_url: String,
    pub notebook_url: String,
    pub credential: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub exists: bool,
    pub running: bool,
    pub ready: bool,
    pub node: String,
    pub restart_count: u32,
    pub started_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RouteRequest {
    pub endpoint: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct RemoveRouteRequest {
    pub endpoint: String,
}

#[derive(Debug, Serialize)]
pub struct KeyRegenResponse {
    pub authorized_keys_line: String,
}

fn require_self_or_privileged(auth: &AuthContext, username: &str) -> Result<(), AppError> {
    if auth.may_act_on(username) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("'{}' may not act on '{username}'", auth.username)))
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn init(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    Json(body): Json<InitRequest>,
) -> Result<Json<InitResponse>, AppError> {
    require_self_or_privileged(&auth, &username)?;
    let selection = selection_from_request(body.preset_tier, body.memory_gb, body.cpus, body.storage_gb, body.gpu_count)?;
    let outcome = state.containers.init(&username, &selection, &body.target_node).await?;
    Ok(Json(InitResponse {
        workload_name: outcome.workload_name,
        editor_url: outcome.editor_url,
        notebook_url: outcome.notebook_url,
        credential: outcome.credential,
    }))
}

async fn status(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    require_self_or_privileged(&auth, &username)?;
    let status = state.containers.get_status(&username).await?;
    Ok(Json(StatusResponse {
        exists: status.exists,
        running: status.running,
        ready: status.ready,
        node: status.node,
        restart_count: status.restart_count,
        started_at: status.started_at.map(|t| t.to_rfc3339()),
    }))
}

async fn start(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    require_self_or_privileged(&auth, &username)?;
    state.containers.start(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stop(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    require_self_or_privileged(&auth, &username)?;
    state.containers.stop(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn destroy(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    require_self_or_privileged(&auth, &username)?;
    state.containers.destroy(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn wipe(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<StatusCode, AppError> {
    require_self_or_privileged(&auth, &username)?;
    state.containers.wipe(&username).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_route(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    Json(body): Json<RouteRequest>,
) -> Result<StatusCode, AppError> {
    require_self_or_privileged(&auth, &username)?;
    state.containers.add_route(&username, &body.endpoint, body.port).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn remove_route(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    Json(body): Json<RemoveRouteRequest>,
) -> Result<StatusCode, AppError> {
    require_self_or_privileged(&auth, &username)?;
    state.containers.remove_route(&username, &body.endpoint).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn regenerate_keys(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<Json<KeyRegenResponse>, AppError> {
    require_self_or_privileged(&auth, &username)?;
    let authorized_keys_line = state.containers.regenerate_keys(&username).await?;
    Ok(Json(KeyRegenResponse { authorized_keys_line }))
}

/// Neither backend drives a process supervisor inside the workload; this
/// documents the gap rather than silently accepting the call.
async fn service_start_unavailable(Path(svc): Path<String>) -> AppError {
    AppError::NotImplemented(format!("service '{svc}' has no process supervisor to start"))
}

async fn service_stop_unavailable(Path(svc): Path<String>) -> AppError {
    AppError::NotImplemented(format!("service '{svc}' has no process supervisor to stop"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_may_act_on_self() {
        let auth = AuthContext {
            username: "alice".to_owned(),
            email: "alice@example.edu".to_owned(),
            role: hydra_store::models::Role::Student,
            groups: Vec::new(),
        };
        assert!(require_self_or_privileged(&auth, "alice").is_ok());
        assert!(require_self_or_privileged(&auth, "bob").is_err());
    }
}
