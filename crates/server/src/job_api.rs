//! Job endpoints: listing, status, logs, results, metadata and dismissal

use axum::extract::{Path, State};
use axum::response::Json;
use sepex_core::JobStatus;
use sepex_jobs::logger::{LOGS_PREFIX, parse_log_rows, process_log_path, server_log_path};
use sepex_jobs::metadata::metadata_key;
use sepex_jobs::results::results_from_log;
use serde_json::Value;
use tracing::{debug, warn};

use crate::bootstrap::AppState;
use crate::dtos::{DismissalDto, JobListDto, JobLogsDto, JobStatusDto};
use crate::error::ApiError;

pub async fn list_jobs(State(state): State<AppState>) -> Result<Json<JobListDto>, ApiError> {
    let records = state
        .store
        .list_jobs()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let jobs = records
        .iter()
        .map(|record| match state.active.get(&record.job_id) {
            // Live jobs carry fresher state than the last persisted update.
            Some(job) => JobStatusDto::from_live(job.as_ref()),
            None => JobStatusDto::from_record(record),
        })
        .collect();
    Ok(Json(JobListDto { jobs }))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusDto>, ApiError> {
    if let Some(job) = state.active.get(&job_id) {
        return Ok(Json(JobStatusDto::from_live(job.as_ref())));
    }
    let record = state
        .store
        .get_job(&job_id)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .ok_or_else(|| ApiError::JobNotFound(job_id))?;
    Ok(Json(JobStatusDto::from_record(&record)))
}

/// Load one of the job's log files: local copy first, blob store after the
/// local retention window has expired.
async fn load_log(state: &AppState, file_name: &str, local: std::path::PathBuf) -> Vec<Value> {
    match tokio::fs::read_to_string(&local).await {
        Ok(content) => parse_log_rows(&content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let key = format!("{LOGS_PREFIX}/{file_name}");
            match state.blobs.get(&key).await {
                Ok(Some(bytes)) => parse_log_rows(&String::from_utf8_lossy(&bytes)),
                Ok(None) => Vec::new(),
                Err(err) => {
                    warn!("could not fetch '{key}' from blob store: {err}");
                    Vec::new()
                }
            }
        }
        Err(err) => {
            warn!("could not read log file '{}': {err}", local.display());
            Vec::new()
        }
    }
}

pub async fn get_job_logs(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobLogsDto>, ApiError> {
    ensure_job_known(&state, &job_id).await?;

    // Live container jobs pull fresh output on demand.
    if let Some(job) = state.active.get(&job_id) {
        if let Err(err) = job.refresh_process_logs().await {
            debug!(%job_id, "could not refresh process logs: {err}");
        }
    }

    let logs_dir = &state.config.logs_dir;
    let process_logs = load_log(
        &state,
        &format!("{job_id}.process.jsonl"),
        process_log_path(logs_dir, &job_id),
    )
    .await;
    let server_logs = load_log(
        &state,
        &format!("{job_id}.server.jsonl"),
        server_log_path(logs_dir, &job_id),
    )
    .await;

    Ok(Json(JobLogsDto {
        process_logs,
        server_logs,
    }))
}

pub async fn get_job_results(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = job_status(&state, &job_id).await?;
    if status != JobStatus::Successful {
        return Err(ApiError::NoResults(job_id));
    }

    let local = process_log_path(&state.config.logs_dir, &job_id);
    let content = match tokio::fs::read_to_string(&local).await {
        Ok(content) => content,
        Err(_) => {
            let key = format!("{LOGS_PREFIX}/{job_id}.process.jsonl");
            match state.blobs.get(&key).await {
                Ok(Some(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
                _ => return Err(ApiError::NoResults(job_id)),
            }
        }
    };

    results_from_log(&content)
        .map(Json)
        .ok_or(ApiError::NoResults(job_id))
}

pub async fn get_job_metadata(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let status = job_status(&state, &job_id).await?;
    if status != JobStatus::Successful {
        return Err(ApiError::NoMetadata(job_id));
    }

    let key = metadata_key(&state.config.metadata_prefix, &job_id);
    let bytes = state
        .blobs
        .get(&key)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .ok_or_else(|| ApiError::NoMetadata(job_id))?;
    let document: Value =
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(document))
}

pub async fn dismiss_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<DismissalDto>, ApiError> {
    let status = state.dispatcher.dismiss(&job_id).await?;
    Ok(Json(DismissalDto {
        job_id: job_id.clone(),
        status,
        message: format!("job '{job_id}' dismissed"),
    }))
}

async fn job_status(state: &AppState, job_id: &str) -> Result<JobStatus, ApiError> {
    if let Some(job) = state.active.get(job_id) {
        return Ok(job.current_status());
    }
    state
        .store
        .get_job(job_id)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .map(|record| record.status)
        .ok_or_else(|| ApiError::JobNotFound(job_id.to_string()))
}

async fn ensure_job_known(state: &AppState, job_id: &str) -> Result<(), ApiError> {
    job_status(state, job_id).await.map(|_| ())
}
