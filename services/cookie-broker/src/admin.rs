//! Admin API for credential management
//!
//! Runs on a separate listener (default 9090) that is not exposed alongside
//! the webhooks. Session material can be written here but is never returned.
//!
//! Endpoints:
//! - GET    /admin/credentials                  list credentials with state
//! - POST   /admin/credentials                  register a credential (inactive)
//! - POST   /admin/credentials/{id}/activate    mark re-authenticated, optionally with a new session
//! - POST   /admin/credentials/{id}/deactivate  withdraw from allocation
//! - DELETE /admin/credentials/{id}             delete
//! - GET    /admin/pool                         pool status summary

use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use lease_pool::{CredentialState, Pool};
use serde::Deserialize;
use session_store::{Credential, SessionCookie};

use crate::error::ApiError;

/// Shared state for admin API handlers.
#[derive(Clone)]
pub struct AdminState {
    pool: Arc<Pool>,
}

impl AdminState {
    pub fn new(pool: Arc<Pool>) -> Self {
        Self { pool }
    }
}

/// Build the admin axum router with all credential management endpoints.
pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route(
            "/admin/credentials",
            get(list_credentials).post(register_credential),
        )
        .route(
            "/admin/credentials/{id}",
            get(get_credential).delete(delete_credential),
        )
        .route("/admin/credentials/{id}/activate", post(activate_credential))
        .route(
            "/admin/credentials/{id}/deactivate",
            post(deactivate_credential),
        )
        .route("/admin/pool", get(pool_status))
        .with_state(state)
}

fn ok_json(status: StatusCode, body: serde_json::Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Public view of a credential: state and counters, no session values.
fn summary(credential: &Credential, ban_threshold: u32) -> serde_json::Value {
    serde_json::json!({
        "id": credential.id,
        "category": credential.category,
        "username": credential.username,
        "state": CredentialState::of(credential, ban_threshold).label(),
        "active": credential.active,
        "leased": credential.leased,
        "consecutive_failures": credential.consecutive_failures,
        "ban_reason": credential.ban_reason,
        "last_released_at": credential.last_released_at,
        "authenticated_at": credential.authenticated_at,
        "session_cookies": credential.session.len(),
    })
}

/// GET /admin/credentials
async fn list_credentials(State(state): State<AdminState>) -> Response {
    let threshold = state.pool.ban_threshold();
    let credentials: Vec<serde_json::Value> = state
        .pool
        .list()
        .await
        .iter()
        .map(|c| summary(c, threshold))
        .collect();
    ok_json(
        StatusCode::OK,
        serde_json::json!({ "credentials": credentials }),
    )
}

/// GET /admin/credentials/{id}
async fn get_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let credential = state
        .pool
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("unknown credential: {id}")))?;
    Ok(ok_json(
        StatusCode::OK,
        summary(&credential, state.pool.ban_threshold()),
    ))
}

/// Request body for registering a credential.
#[derive(Deserialize)]
struct RegisterRequest {
    id: String,
    category: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    session: Vec<SessionCookie>,
    /// Activate immediately; use when the session is already authenticated
    #[serde(default)]
    activate: bool,
}

/// POST /admin/credentials: register a credential, inactive unless `activate` is set.
async fn register_credential(
    State(state): State<AdminState>,
    axum::Json(body): axum::Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if body.id.trim().is_empty() {
        return Err(ApiError::BadRequest("id is required".into()));
    }

    let mut credential = state
        .pool
        .register(&body.id, &body.category, &body.username, body.session)
        .await?;
    if body.activate {
        credential = state.pool.activate(&body.id, None).await?;
    }

    Ok(ok_json(
        StatusCode::CREATED,
        summary(&credential, state.pool.ban_threshold()),
    ))
}

/// Request body for activation.
#[derive(Deserialize, Default)]
struct ActivateRequest {
    /// Replacement session from a fresh login
    #[serde(default)]
    session: Option<Vec<SessionCookie>>,
}

/// POST /admin/credentials/{id}/activate: external re-authentication completed.
///
/// Clears the failure count and ban reason. The body is optional.
async fn activate_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    body: Option<axum::Json<ActivateRequest>>,
) -> Result<Response, ApiError> {
    let body = body.map(|axum::Json(b)| b).unwrap_or_default();
    let credential = state.pool.activate(&id, body.session).await?;
    Ok(ok_json(
        StatusCode::OK,
        summary(&credential, state.pool.ban_threshold()),
    ))
}

/// Request body for deactivation.
#[derive(Deserialize, Default)]
struct DeactivateRequest {
    #[serde(default)]
    reason: Option<String>,
}

/// POST /admin/credentials/{id}/deactivate
async fn deactivate_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
    body: Option<axum::Json<DeactivateRequest>>,
) -> Result<Response, ApiError> {
    let body = body.map(|axum::Json(b)| b).unwrap_or_default();
    let credential = state.pool.deactivate(&id, body.reason).await?;
    Ok(ok_json(
        StatusCode::OK,
        summary(&credential, state.pool.ban_threshold()),
    ))
}

/// DELETE /admin/credentials/{id}
async fn delete_credential(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    state.pool.remove(&id).await?;
    Ok(ok_json(
        StatusCode::OK,
        serde_json::json!({ "id": id, "status": "removed" }),
    ))
}

/// GET /admin/pool: same shape as the `pool` object of the health endpoint.
async fn pool_status(State(state): State<AdminState>) -> Response {
    ok_json(StatusCode::OK, state.pool.health().await)
}
