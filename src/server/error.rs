use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{excerpt_head, StitchError};
use crate::job::{JobFailure, JobStage};

/// HTTP status for a pipeline error
pub fn status_code(error: &StitchError) -> StatusCode {
    match error {
        StitchError::Validation(_) => StatusCode::BAD_REQUEST,
        StitchError::Download { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        StitchError::Upload(_) => StatusCode::BAD_GATEWAY,
        StitchError::ToolUnavailable(_) | StitchError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StitchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        StitchError::Encode { .. }
        | StitchError::Config(_)
        | StitchError::Io(_)
        | StitchError::Json(_)
        | StitchError::Toml(_)
        | StitchError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    status: &'static str,
    stage: Option<JobStage>,
    kind: String,
    detail: String,
}

/// Error response returned by every endpoint
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    /// A job that ran and failed
    pub fn from_failure(failure: &JobFailure, max_detail_chars: usize) -> Self {
        let summary = failure.summary(max_detail_chars);
        Self {
            status: status_code(&failure.error),
            body: ErrorBody {
                status: "error",
                stage: Some(summary.stage),
                kind: summary.kind,
                detail: summary.detail,
            },
        }
    }

    /// A request refused before any job work started
    pub fn rejected(error: StitchError, max_detail_chars: usize) -> Self {
        Self::from_failure(&JobFailure::new(JobStage::Created, error), max_detail_chars)
    }

    pub fn job_not_found(job_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                status: "error",
                stage: None,
                kind: "not_found".to_string(),
                detail: excerpt_head(&format!("Unknown job '{}'", job_id), 200),
            },
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EncodeStage;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StitchError::validation("bad"), StatusCode::BAD_REQUEST),
            (
                StitchError::Download {
                    url: "https://cdn.example.com/a.mp4".to_string(),
                    cause: "HTTP 404".to_string(),
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                StitchError::Encode {
                    stage: EncodeStage::Concat,
                    detail: "x".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (StitchError::Upload("denied".to_string()), StatusCode::BAD_GATEWAY),
            (StitchError::ToolUnavailable("ffmpeg".to_string()), StatusCode::SERVICE_UNAVAILABLE),
            (StitchError::Timeout(30), StatusCode::GATEWAY_TIMEOUT),
        ];

        for (error, expected) in cases {
            assert_eq!(status_code(&error), expected, "{}", error);
        }
    }

    #[test]
    fn test_failure_body_is_truncated() {
        let failure = JobFailure::new(
            JobStage::Normalizing,
            StitchError::Encode {
                stage: EncodeStage::Normalize { clip_index: 0 },
                detail: "e".repeat(500),
            },
        );
        let error = ApiError::from_failure(&failure, 50);

        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.body.stage, Some(JobStage::Normalizing));
        assert_eq!(error.body.kind, "encode_failure");
        assert_eq!(error.body.detail.chars().count(), 53);
    }
}
