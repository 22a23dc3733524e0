use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::error::StitchError;
use crate::job::{JobArtifact, JobRequest, JobSpec};
use crate::worker::JobStatusView;
use super::error::ApiError;
use super::AppState;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Serialize)]
pub struct JobSucceeded {
    pub status: &'static str,
    #[serde(flatten)]
    pub artifact: JobArtifact,
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub status: &'static str,
    pub job_id: Uuid,
    pub status_url: String,
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "service": "reelstitch",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "concat_and_upload": "POST /concat_and_upload",
            "submit_job": "POST /jobs",
            "job_status": "GET /jobs/{id}"
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "in_flight": state.pool.in_flight(),
        "accepting": state.pool.is_accepting()
    }))
}

/// Run a job while the client waits
pub async fn concat_and_upload(
    State(state): State<AppState>,
    payload: std::result::Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult<Json<JobSucceeded>> {
    let spec = prepare(&state, payload)?;
    let max = state.config.server.max_detail_chars;

    let (job_id, result) = state.pool.run(spec).await.map_err(|e| ApiError::rejected(e, max))?;
    match result {
        Ok(artifact) => {
            info!("Job {} delivered {}", job_id, artifact.output_name);
            Ok(Json(JobSucceeded { status: "ok", artifact }))
        }
        Err(failure) => Err(ApiError::from_failure(&failure, max)),
    }
}

/// Queue a job and return immediately
pub async fn submit_job(
    State(state): State<AppState>,
    payload: std::result::Result<Json<JobRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    let spec = prepare(&state, payload)?;
    let max = state.config.server.max_detail_chars;

    let job_id = state.pool.submit(spec).await.map_err(|e| ApiError::rejected(e, max))?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            status: "accepted",
            job_id,
            status_url: format!("/jobs/{}", job_id),
        }),
    ))
}

pub async fn job_status(State(state): State<AppState>, Path(raw_id): Path<String>) -> ApiResult<Json<JobStatusView>> {
    let job_id = Uuid::parse_str(&raw_id).map_err(|_| ApiError::job_not_found(&raw_id))?;

    state
        .pool
        .status(job_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::job_not_found(&raw_id))
}

fn prepare(state: &AppState, payload: std::result::Result<Json<JobRequest>, JsonRejection>) -> ApiResult<JobSpec> {
    let max = state.config.server.max_detail_chars;
    let Json(request) = payload.map_err(|rejection| {
        ApiError::rejected(StitchError::validation(rejection.body_text()), max)
    })?;

    state
        .pool
        .runner()
        .prepare(request)
        .map_err(|e| ApiError::rejected(e, max))
}
