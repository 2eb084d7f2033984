//! Public webhook endpoints
//!
//! Endpoints:
//! - POST /webhook/trigger-job     enqueue a job on its platform's scheduler
//! - POST /webhook/release-cookie  return a leased credential with its outcome
//! - GET  /webhook/health          liveness plus pool summary
//!
//! Bodies are parsed leniently from raw JSON so that malformed input gets the
//! same `{"status":"error"}` shape as every other rejection.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use lease_pool::{Job, Outcome, Pool, Scheduler};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::ApiError;

/// Shared state for webhook handlers.
#[derive(Clone)]
pub struct WebhookState {
    pub pool: Arc<Pool>,
    pub scheduler: Arc<Scheduler>,
}

/// Build the webhook router. Paths are served with and without a trailing slash.
pub fn build_webhook_router(state: WebhookState) -> Router {
    Router::new()
        .route("/webhook/trigger-job", post(trigger_job))
        .route("/webhook/trigger-job/", post(trigger_job))
        .route("/webhook/release-cookie", post(release_cookie))
        .route("/webhook/release-cookie/", post(release_cookie))
        .route("/webhook/health", get(health))
        .route("/webhook/health/", get(health))
        .with_state(state)
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

fn finish(endpoint: &'static str, result: Result<Response, ApiError>) -> Response {
    let response = result.unwrap_or_else(<ApiError as IntoResponse>::into_response);
    crate::metrics::record_request(endpoint, response.status().as_u16());
    response
}

fn parse_object(body: &[u8]) -> Result<serde_json::Map<String, Value>, ApiError> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ApiError::BadRequest("Invalid JSON payload".into())),
    }
}

/// Non-empty string, or a number rendered as a string.
fn text_field(map: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required(map: &serde_json::Map<String, Value>, key: &str) -> Result<String, ApiError> {
    text_field(map, key).ok_or_else(|| ApiError::BadRequest(format!("{key} is required")))
}

/// Caller-supplied retry counter; anything negative or unparseable is 0.
fn coerce_retry_count(value: Option<&Value>) -> u64 {
    let n = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
        _ => 0,
    };
    n.max(0) as u64
}

/// POST /webhook/trigger-job: validate, enqueue, and acknowledge with 202.
///
/// The job waits on its platform's queue for as long as it takes to get a
/// credential; the caller only learns about the outcome through its callback.
async fn trigger_job(State(state): State<WebhookState>, body: Bytes) -> Response {
    finish("trigger_job", enqueue_job(&state, &body))
}

fn enqueue_job(state: &WebhookState, body: &[u8]) -> Result<Response, ApiError> {
    let map = parse_object(body)?;

    let job_id = required(&map, "job_id")?;
    let platform = required(&map, "platform")?.to_lowercase();
    let post_url = required(&map, "post_url")?;
    let callback_url = required(&map, "callback_url")?;
    let retry_count = coerce_retry_count(map.get("retry_count"));
    let next_cursor = text_field(&map, "next_cursor");

    if !state.scheduler.categories().contains(&platform) {
        return Err(ApiError::BadRequest(format!(
            "Invalid platform: {platform}. Must be one of: {}",
            state.scheduler.categories().join(", ")
        )));
    }

    let mut payload = serde_json::json!({
        "job_id": job_id,
        "post_url": post_url,
        "callback_url": callback_url,
        "retry_count": retry_count,
    });
    if let Some(cursor) = &next_cursor {
        payload["next_cursor"] = Value::String(cursor.clone());
    }

    let task_id = uuid::Uuid::new_v4().to_string();
    state.scheduler.submit(Job {
        id: job_id.clone(),
        category: platform.clone(),
        payload,
    })?;

    info!(
        job_id,
        task_id,
        platform,
        retry_count,
        has_cursor = next_cursor.is_some(),
        "job queued"
    );

    Ok(json_response(
        StatusCode::ACCEPTED,
        serde_json::json!({
            "status": "success",
            "message": format!("Task triggered for {platform} platform"),
            "task_id": task_id,
            "job_id": job_id,
            "platform": platform,
            "retry_count": retry_count,
            "resuming_from_cursor": next_cursor.is_some(),
        }),
    ))
}

/// POST /webhook/release-cookie: return a credential with its outcome.
///
/// Safe to call more than once for the same lease; the repeat is
/// acknowledged without changing anything.
async fn release_cookie(State(state): State<WebhookState>, body: Bytes) -> Response {
    finish("release_cookie", release(&state, &body).await)
}

async fn release(state: &WebhookState, body: &[u8]) -> Result<Response, ApiError> {
    let map = parse_object(body)?;

    let cookie_id = match map.get("cookie_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(_) | Value::Number(_)) => text_field(&map, "cookie_id"),
        Some(_) => {
            return Err(ApiError::BadRequest(
                "cookie_id must be a string or integer".into(),
            ));
        }
    }
    .ok_or_else(|| ApiError::BadRequest("cookie_id is required".into()))?;

    let cookie_success = match map.get("cookie_success") {
        None | Some(Value::Null) => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => {
            return Err(ApiError::BadRequest(
                "cookie_success must be a boolean".into(),
            ));
        }
    };
    let failure_reason = text_field(&map, "failure_reason");

    let ack = state
        .pool
        .release(&cookie_id, Outcome::from_report(cookie_success, failure_reason))
        .await?;

    if ack.banned {
        warn!(cookie_id, "credential withdrawn after release");
    }

    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "success",
            "message": format!("Cookie released for cookie_id: {cookie_id}"),
            "cookie_id": cookie_id,
            "cookie_success": cookie_success,
            "consecutive_failures": ack.consecutive_failures,
            "banned": ack.banned,
            "already_released": ack.already_released,
        }),
    ))
}

/// GET /webhook/health: always 200 while the process serves; pool detail attached.
async fn health(State(state): State<WebhookState>) -> Response {
    let pool = state.pool.health().await;
    finish(
        "health",
        Ok(json_response(
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "service": "cookie-broker",
                "pool": pool,
            }),
        )),
    )
}
