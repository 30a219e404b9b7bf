//! Flow executor endpoints.
//!
//! The executor is addressed by flow slug. Session affinity uses a plain
//! random cookie; the cookie only keys plan storage and carries no identity,
//! so it is minted lazily on the first executor request.

use axum::{
    extract::{Extension, Path},
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json},
};
use rand::{distributions::Alphanumeric, thread_rng, Rng};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use crate::flows::{
    Challenge, ExecutorOutcome, FlowError, FlowExecutor, FlowServices,
};
use crate::policies::User;

const SESSION_COOKIE_NAME: &str = "passgate_session";
const SESSION_ID_LENGTH: usize = 32;

#[utoipa::path(
    get,
    path = "/v1/flows/{slug}/executor",
    params(
        ("slug" = String, Path, description = "Flow slug")
    ),
    responses(
        (status = 200, description = "Current challenge for this session", body = Challenge),
        (status = 404, description = "No flow with this slug"),
        (status = 500, description = "Session storage failure")
    ),
    tag = "flows"
)]
pub async fn executor_get(
    Path(slug): Path<String>,
    headers: HeaderMap,
    services: Extension<Arc<FlowServices>>,
) -> impl IntoResponse {
    let Some(flow) = services.flows.flow_by_slug(&slug) else {
        return flow_not_found(&slug);
    };

    let session = resolve_session(&headers);
    let executor = FlowExecutor::new(flow, session.id.clone(), services.0.as_ref().clone());
    match executor.get(&User::anonymous()).await {
        Ok(outcome) => respond(outcome, &session),
        Err(err) => flow_error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/flows/{slug}/executor",
    params(
        ("slug" = String, Path, description = "Flow slug")
    ),
    request_body = Object,
    responses(
        (status = 200, description = "Next challenge or completion redirect", body = Challenge),
        (status = 400, description = "No plan pending for this session"),
        (status = 404, description = "No flow with this slug"),
        (status = 500, description = "Session storage failure")
    ),
    tag = "flows"
)]
pub async fn executor_post(
    Path(slug): Path<String>,
    headers: HeaderMap,
    services: Extension<Arc<FlowServices>>,
    Json(data): Json<Value>,
) -> impl IntoResponse {
    let Some(flow) = services.flows.flow_by_slug(&slug) else {
        return flow_not_found(&slug);
    };

    let session = resolve_session(&headers);
    let executor = FlowExecutor::new(flow, session.id.clone(), services.0.as_ref().clone());
    match executor.post(&User::anonymous(), &data).await {
        Ok(outcome) => respond(outcome, &session),
        Err(err) => flow_error_response(err),
    }
}

struct Session {
    id: String,
    minted: bool,
}

fn resolve_session(headers: &HeaderMap) -> Session {
    match extract_session_id(headers) {
        Some(id) => Session { id, minted: false },
        None => {
            let id: String = thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SESSION_ID_LENGTH)
                .map(char::from)
                .collect();
            debug!("minted new flow session");
            Session { id, minted: true }
        }
    }
}

fn extract_session_id(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

fn session_cookie(session_id: &str) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{SESSION_COOKIE_NAME}={session_id}; Path=/; HttpOnly; SameSite=Lax"
    ))
}

/// Every outcome is expressed as a challenge so the frontend renders a single
/// payload shape; completion becomes a redirect pseudo-challenge.
fn respond(outcome: ExecutorOutcome, session: &Session) -> axum::response::Response {
    let challenge = match outcome {
        ExecutorOutcome::Challenge(challenge) | ExecutorOutcome::Denied(challenge) => challenge,
        ExecutorOutcome::Redirect(to) => Challenge::redirect(to),
    };

    let mut headers = HeaderMap::new();
    if session.minted {
        match session_cookie(&session.id) {
            Ok(cookie) => {
                headers.insert(SET_COOKIE, cookie);
            }
            Err(err) => error!("Failed to build session cookie: {err}"),
        }
    }
    (StatusCode::OK, headers, Json(challenge)).into_response()
}

fn flow_not_found(slug: &str) -> axum::response::Response {
    debug!(slug, "no flow with this slug");
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "flow not found" })),
    )
        .into_response()
}

fn flow_error_response(err: FlowError) -> axum::response::Response {
    match err {
        FlowError::NoPendingPlan => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "no pending flow plan for this session" })),
        )
            .into_response(),
        err => {
            // Storage and internal failures stay opaque to the client.
            error!("Flow execution failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}
