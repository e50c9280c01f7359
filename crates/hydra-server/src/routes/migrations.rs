//! Migration routes: `/migrations/*`
//!
//! Thin controllers binding to the migration engine. Progress is observed
//! through the `/logs` SSE stream, not polled here.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::middleware::AuthContext;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/{username}", post(migrate).get(list_for_user))
        .route("/record/{id}", get(get_record))
}

#[derive(Debug, Deserialize)]
pub struct MigrateRequest {
    pub target_node: String,
}

#[derive(Debug, Serialize)]
pub struct MigrateResponse {
    pub migration_id: String,
}

async fn migrate(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
    Json(body): Json<MigrateRequest>,
) -> Result<Json<MigrateResponse>, AppError> {
    if !auth.may_act_on(&username) {
        return Err(AppError::Forbidden(format!("'{}' may not migrate '{username}'", auth.username)));
    }
    let migration_id = state.migrations.migrate(&username, &body.target_node).await?;
    Ok(Json(MigrateResponse { migration_id }))
}

async fn list_for_user(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
    Path(username): Path<String>,
) -> Result<Json<Vec<hydra_store::models::MigrationRecord>>, AppError> {
    if !auth.may_act_on(&username) {
        return Err(AppError::Forbidden(format!("'{}' may not view migrations for '{username}'", auth.username)));
    }
    let records = state.migrations.list_for_user(&username).await?;
    Ok(Json(records))
}

async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<hydra_store::models::MigrationRecord>, AppError> {
    let record = state.migrations.get(&id).await?;
    Ok(Json(record))
}
