//! Process endpoints: listing, description and execution

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use sepex_core::JobStatus;
use sepex_jobs::ExecutionOutcome;
use tracing::info;

use crate::bootstrap::AppState;
use crate::dtos::{AsyncExecutionDto, ExecuteRequestDto, ProcessListDto, SyncExecutionDto};
use crate::error::ApiError;

pub async fn list_processes(State(state): State<AppState>) -> Json<ProcessListDto> {
    Json(ProcessListDto {
        processes: state.registry.summaries(),
    })
}

pub async fn describe_process(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
) -> Result<Response, ApiError> {
    let spec = state
        .registry
        .get(&process_id)
        .ok_or_else(|| ApiError::Dispatch(sepex_jobs::DispatchError::ProcessNotFound(process_id)))?;
    Ok(Json(spec.describe()).into_response())
}

/// The OGC way to ask for asynchronous execution.
fn prefers_async(headers: &HeaderMap) -> bool {
    headers
        .get(header::HeaderName::from_static("prefer"))
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.to_ascii_lowercase().contains("respond-async"))
}

pub async fn execute_process(
    State(state): State<AppState>,
    Path(process_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<ExecuteRequestDto>>,
) -> Result<Response, ApiError> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let prefer_async = prefers_async(&headers);
    info!(%process_id, prefer_async, "execution requested");

    let outcome = state
        .dispatcher
        .execute(&process_id, request.inputs, prefer_async, "anonymous")
        .await?;

    match outcome {
        ExecutionOutcome::Sync {
            job_id,
            status,
            outputs,
        } => {
            let code = if status == JobStatus::Successful {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            let body = SyncExecutionDto {
                job_id,
                status,
                plugin_results: outputs,
            };
            Ok((code, Json(body)).into_response())
        }
        ExecutionOutcome::Async { job_id, status } => {
            let location = format!("/jobs/{job_id}");
            let body = AsyncExecutionDto { job_id, status };
            Ok((
                StatusCode::CREATED,
                [(header::LOCATION, location)],
                Json(body),
            )
                .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefer_header_detection() {
        let mut headers = HeaderMap::new();
        assert!(!prefers_async(&headers));

        headers.insert("prefer", "respond-async".parse().unwrap());
        assert!(prefers_async(&headers));

        headers.insert("prefer", "Respond-Async, wait=10".parse().unwrap());
        assert!(prefers_async(&headers));

        headers.insert("prefer", "wait=10".parse().unwrap());
        assert!(!prefers_async(&headers));
    }
}
