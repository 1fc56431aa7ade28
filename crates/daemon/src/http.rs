// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surfaces: the match API and the admin API.
//!
//! Every response body is `{"ok": bool, "errors": [..], "data": {..}}`;
//! match results add `"matches": [..]`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use munchkin_core::{Clock, Matcher, Mutation, MutationPipeline, PipelineError, PoolError, Submission};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

pub struct ApiState<M, C> {
    pub pipeline: Arc<MutationPipeline<M, C>>,
    /// How long add/delete wait before answering 202
    pub submit_wait: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<String>>,
}

impl ApiResponse {
    fn ok(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            errors: Vec::new(),
            data,
            matches: None,
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            errors: vec![message.into()],
            data: json!({}),
            matches: None,
        }
    }
}

fn reply(status: StatusCode, body: ApiResponse) -> Response {
    (status, Json(body)).into_response()
}

fn failure(status: StatusCode, message: &str) -> Response {
    reply(status, ApiResponse::failed(message))
}

fn busy() -> Response {
    failure(
        StatusCode::SERVICE_UNAVAILABLE,
        "No matcher available, try again later",
    )
}

/// `/api/v1/heartbeat` and `/api/v1/match`
pub fn match_router<M: Matcher, C: Clock>(state: Arc<ApiState<M, C>>) -> Router {
    Router::new()
        .route("/api/v1/heartbeat", get(heartbeat))
        .route("/api/v1/match", post(match_event::<M, C>))
        .with_state(state)
}

/// `/api/admin/v1/add` and `/api/admin/v1/delete-by-key`
pub fn admin_router<M: Matcher, C: Clock>(state: Arc<ApiState<M, C>>) -> Router {
    Router::new()
        .route("/api/admin/v1/add", post(add_rule::<M, C>))
        .route("/api/admin/v1/delete-by-key", delete(delete_by_key::<M, C>))
        .with_state(state)
}

/// Serve `router` on an already-bound listener until `shutdown` resolves
pub async fn serve(
    listener: std::net::TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()>,
) -> Result<(), hyper::Error> {
    axum::Server::from_tcp(listener)?
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown)
        .await
}

async fn heartbeat() -> Response {
    reply(StatusCode::OK, ApiResponse::ok(json!({ "ping": "pong" })))
}

#[derive(Debug, Deserialize)]
struct KeyParams {
    key: Option<String>,
}

async fn match_event<M: Matcher, C: Clock>(
    State(state): State<Arc<ApiState<M, C>>>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Problem reading request body");
    }

    match state.pipeline.match_event(&body).await {
        Ok(ids) => reply(
            StatusCode::OK,
            ApiResponse {
                matches: Some(ids),
                ..ApiResponse::ok(json!({}))
            },
        ),
        Err(PipelineError::Pool(PoolError::Exhausted(_))) => busy(),
        Err(e) => {
            warn!(error = %e, "match failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "Problem matching pattern")
        }
    }
}

async fn add_rule<M: Matcher, C: Clock>(
    State(state): State<Arc<ApiState<M, C>>>,
    Query(params): Query<KeyParams>,
    body: Bytes,
) -> Response {
    let Some(key) = params.key else {
        return failure(StatusCode::BAD_REQUEST, "Missing 'key' in query string");
    };
    if body.is_empty() {
        return failure(StatusCode::BAD_REQUEST, "Problem reading request body");
    }
    let Ok(pattern) = String::from_utf8(body.to_vec()) else {
        return failure(StatusCode::BAD_REQUEST, "Request body is not valid UTF-8");
    };

    let outcome = state
        .pipeline
        .submit(Mutation::add(key, pattern), state.submit_wait)
        .await;
    submission_response(outcome, "Problem adding pattern")
}

async fn delete_by_key<M: Matcher, C: Clock>(
    State(state): State<Arc<ApiState<M, C>>>,
    Query(params): Query<KeyParams>,
) -> Response {
    let Some(key) = params.key else {
        return failure(StatusCode::BAD_REQUEST, "Missing 'key' in query string");
    };

    let outcome = state
        .pipeline
        .submit(Mutation::delete(key), state.submit_wait)
        .await;
    submission_response(outcome, "Problem deleting pattern")
}

fn submission_response(outcome: Submission, failure_message: &str) -> Response {
    match outcome {
        Submission::Completed { timestamp } => {
            reply(StatusCode::OK, ApiResponse::ok(json!({ "timestamp": timestamp })))
        }
        Submission::Accepted => reply(
            StatusCode::ACCEPTED,
            ApiResponse {
                errors: vec!["Request timed out, submitted for processing".to_string()],
                ..ApiResponse::ok(json!({}))
            },
        ),
        Submission::Failed(PipelineError::Validation(e)) => {
            failure(StatusCode::BAD_REQUEST, &e.to_string())
        }
        Submission::Failed(PipelineError::Pool(PoolError::Exhausted(_))) => busy(),
        Submission::Failed(e) => {
            error!(error = %e, "mutation failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, failure_message)
        }
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
