//! Download request, queue status and artifact endpoints.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use genq_models::{Job, JobKind, ProgressEvent, QueueStatus};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::middleware::{ADMIN_TOKEN_HEADER, USER_ID_HEADER};
use crate::security::{constant_time_eq, is_valid_artifact_name, is_valid_owner, ANONYMOUS_OWNER};
use crate::state::AppState;

/// Response to an accepted download request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequestResponse {
    /// Job id; progress events for the job carry it
    pub request_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

fn owner_from_headers(headers: &HeaderMap) -> ApiResult<String> {
    let owner = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS_OWNER);

    if !is_valid_owner(owner) {
        return Err(ApiError::bad_request("Invalid user id"));
    }
    Ok(owner.to_string())
}

/// Queue a file-generation job for the requesting client.
///
/// POST /api/download/:kind
pub async fn request_download(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<DownloadRequestResponse>> {
    let kind: JobKind = kind
        .parse()
        .map_err(|e: genq_models::ParseJobKindError| ApiError::bad_request(e.to_string()))?;
    let owner = owner_from_headers(&headers)?;

    let job = Job::new(kind, owner);
    let position = state.queue.append(&job).await.map_err(|e| {
        error!(job_id = %job.id, kind = %kind, "Failed to enqueue download request: {}", e);
        ApiError::internal("Failed to queue download request")
    })?;

    metrics::record_job_enqueued(kind);
    info!(
        job_id = %job.id,
        kind = %kind,
        owner = %job.owner,
        position = %position,
        "Download request queued"
    );

    if let Err(e) = state
        .relay
        .publish(&job.owner, &ProgressEvent::queued(&job.id))
        .await
    {
        warn!(job_id = %job.id, "Failed to publish queued event: {}", e);
    }

    Ok(Json(DownloadRequestResponse {
        request_id: job.id.to_string(),
        message: "Download request queued".to_string(),
        kind,
    }))
}

/// Current queue depth and completion counters.
///
/// GET /api/download/queue/status
pub async fn queue_status(State(state): State<AppState>) -> ApiResult<Json<QueueStatus>> {
    let log_len = state.queue.len().await?;
    let pending = state.queue.pending_count().await?;
    let stats = state.stats.snapshot().await?;

    let status = QueueStatus::from_parts(
        log_len,
        pending,
        state.max_concurrent,
        stats.success,
        stats.failure,
        stats.success_rate(),
    );
    metrics::set_queue_depth(status.queue_size, status.processing_count);

    Ok(Json(status))
}

/// Clear the success/failure counters.
///
/// POST /api/download/stats/reset
pub async fn reset_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<MessageResponse>> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Err(ApiError::forbidden("Stats reset is disabled"));
    };
    let provided = headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !constant_time_eq(provided, expected) {
        warn!("Rejected stats reset with invalid admin token");
        return Err(ApiError::forbidden("Invalid admin token"));
    }

    state.stats.reset().await?;
    info!("Download stats reset");

    Ok(Json(MessageResponse {
        message: "Stats reset".to_string(),
    }))
}

fn content_type_for(file_name: &str) -> &'static str {
    if file_name.ends_with(".jsonl") {
        "application/x-ndjson"
    } else {
        "text/csv; charset=utf-8"
    }
}

/// Serve a finished artifact as an attachment.
///
/// GET /api/download/file/:file_name
pub async fn download_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> ApiResult<Response> {
    if !is_valid_artifact_name(&file_name) {
        return Err(ApiError::bad_request("Invalid file name"));
    }

    let path = state.config.output_dir.join(&file_name);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("File {} not found", file_name)));
        }
        Err(e) => return Err(e.into()),
    };

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .map_err(|e| ApiError::internal(e.to_string()))?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&file_name))),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from(bytes),
    )
        .into_response())
}
