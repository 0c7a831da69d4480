//! `POST /run` -- execute one job synchronously.
//!
//! Request: `{"input": {"head_image": "...", "body_image": "..."}}`.
//! Response: `{"id": "<request id>", "output": {"result": "..."}}` or
//! `{"id": ..., "output": {"error": "..."}}`. Job failures, malformed bodies
//! included, are data, so the status is `200 OK` either way.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::limit::ConcurrencyLimitLayer;
use uuid::Uuid;

use headswap_core::job::{JobInput, JobOutput};

use crate::router::REQUEST_ID_HEADER;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub input: JobInput,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub id: String,
    pub output: JobOutput,
}

async fn run_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Result<Json<RunRequest>, JsonRejection>,
) -> Json<RunResponse> {
    let id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let output = match request {
        Ok(Json(request)) => state.dispatcher.handle_job(request.input).await,
        Err(rejection) => {
            tracing::warn!(request_id = %id, error = %rejection, "Malformed job request");
            JobOutput::failure(format!("Invalid job request: {}", rejection.body_text()))
        }
    };
    Json(RunResponse { id, output })
}

/// Job route, limited to `max_jobs` concurrent executions. Excess requests
/// wait for a slot rather than being rejected.
pub fn router(max_jobs: usize) -> Router<AppState> {
    Router::new()
        .route("/run", post(run_job))
        .route_layer(ConcurrencyLimitLayer::new(max_jobs))
}
