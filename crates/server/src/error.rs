//! HTTP error mapping
//!
//! Engine and validation errors mapped onto status codes: validation 400,
//! unknown resources 404, dismissal of finished jobs 410, sync admission
//! failures 503, everything else 500.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sepex_jobs::DispatchError;
use serde_json::json;
use tracing::{error, warn};

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("job '{0}' not found")]
    JobNotFound(String),

    #[error("no results available for job '{0}'")]
    NoResults(String),

    #[error("no metadata available for job '{0}'")]
    NoMetadata(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Dispatch(err) => match err {
                DispatchError::ProcessNotFound(_) | DispatchError::JobNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                DispatchError::Validation(_) | DispatchError::ModeNotAllowed { .. } => {
                    StatusCode::BAD_REQUEST
                }
                DispatchError::ResourcesUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                DispatchError::JobFinished { .. } => StatusCode::GONE,
                DispatchError::VolumeNotDirectory(_)
                | DispatchError::VolumeIo { .. }
                | DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::JobNotFound(_) | ApiError::NoResults(_) | ApiError::NoMetadata(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        } else {
            warn!("request rejected: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sepex_core::JobStatus;

    #[test]
    fn dispatch_errors_map_to_expected_codes() {
        let cases = [
            (
                ApiError::from(DispatchError::ProcessNotFound("x".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(DispatchError::ResourcesUnavailable),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ApiError::from(DispatchError::JobFinished {
                    job_id: "j".into(),
                    status: JobStatus::Successful,
                }),
                StatusCode::GONE,
            ),
            (
                ApiError::from(DispatchError::Internal("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (ApiError::JobNotFound("j".into()), StatusCode::NOT_FOUND),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status(), expected);
        }
    }
}
