//! Identity extraction middleware.
//!
//! The control plane sits behind an identity-aware reverse proxy that has
//! already authenticated the caller against the institution's identity
//! provider. It forwards the result as a single JSON header,
//! `X-Hydra-Principal`, rather than a bearer token the control plane would
//! have to validate itself. This middleware parses that header once and
//! attaches an [`AuthContext`] extension for handlers to read.

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;

use hydra_store::models::Role;

const PRINCIPAL_HEADER: &str = "x-hydra-principal";

/// The authenticated caller, attached to every request by [`auth_middleware`].
#[derive(Debug, Clone, Deserialize)]
pub struct AuthContext {
    pub username: String,
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl AuthContext {
    /// Faculty and admins may act on behalf of other users; students may not.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        matches!(self.role, Role::Faculty | Role::Admin)
    }

    /// Whether this caller may act on `target_username`'s resources.
    #[must_use]
    pub fn may_act_on(&self, target_username: &str) -> bool {
        self.is_privileged() || self.username == target_username
    }
}

/// Reject requests missing or carrying a malformed `X-Hydra-Principal`
/// header, and attach the parsed [`AuthContext`] to the request for
/// downstream handlers.
///
/// # Errors
///
/// Returns `401 Unauthorized` if the header is absent or fails to parse.
pub async fn auth_middleware(mut request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let raw = request
        .headers()
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let context: AuthContext = serde_json::from_str(raw).map_err(|_| StatusCode::UNAUTHORIZED)?;
    request.extensions_mut().insert(context);

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(username: &str) -> AuthContext {
        AuthContext {
            username: username.to_owned(),
            email: format!("{username}@example.edu"),
            role: Role::Student,
            groups: Vec::new(),
        }
    }

    #[test]
    fn students_may_only_act_on_themselves() {
        let ctx = student("alice");
        assert!(ctx.may_act_on("alice"));
        assert!(!ctx.may_act_on("bob"));
    }

    #[test]
    fn faculty_may_act_on_anyone() {
        let mut ctx = student("prof");
        ctx.role = Role::Faculty;
        assert!(ctx.may_act_on("alice"));
    }
}
