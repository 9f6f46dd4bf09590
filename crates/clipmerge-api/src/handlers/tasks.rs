//! Merge task handlers: submit, poll, download, cancel.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use clipmerge_models::{TaskError, TaskId, TaskStatus};
use clipmerge_store::{CreditLedger, TaskRepository};
use clipmerge_worker::{sanitize_filename, DispatchRequest, InputRole, TaskStatusView, WorkerError};

use crate::account::AccountId;
use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

const SHORT_FIELD: &str = "short_videos";
const LARGE_FIELD: &str = "large_videos";
const TASK_ID_FIELD: &str = "task_id";

/// Response to an accepted submission.
#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: TaskId,
    pub status: TaskStatus,
}

/// Polling response.
#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Output file names, present once completed
    pub outputs: Option<Vec<String>>,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TaskStatusView> for TaskStatusResponse {
    fn from(view: TaskStatusView) -> Self {
        Self {
            task_id: view.task_id,
            status: view.status,
            outputs: view
                .outputs
                .map(|outputs| outputs.into_iter().map(|o| o.display_name).collect()),
            error: view.error,
            created_at: view.created_at,
            updated_at: view.updated_at,
        }
    }
}

/// Response to a cancellation request.
#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub task_id: TaskId,
    pub status: &'static str,
}

struct PendingUpload {
    role: InputRole,
    filename: String,
    data: Bytes,
}

/// Submit a merge task.
///
/// Multipart fields: `short_videos` and `large_videos` (repeated files) and
/// an optional `task_id`. Returns as soon as the task is queued.
pub async fn create_task(
    State(state): State<AppState>,
    account: AccountId,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<TaskAccepted>)> {
    let mut requested_id: Option<String> = None;
    let mut uploads = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let role = match name.as_str() {
            SHORT_FIELD => InputRole::Short,
            LARGE_FIELD => InputRole::Large,
            TASK_ID_FIELD => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid task_id field: {e}")))?;
                let text = text.trim();
                if !text.is_empty() {
                    requested_id = Some(text.to_string());
                }
                continue;
            }
            other => {
                debug!("Ignoring multipart field {:?}", other);
                continue;
            }
        };

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request(format!("{name} entries must be files")))?;
        let filename = sanitize_filename(&filename)?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read {filename}: {e}")))?;

        metrics::record_upload_bytes(role.as_str(), data.len());
        uploads.push(PendingUpload { role, filename, data });
    }

    let shorts = uploads.iter().filter(|u| u.role == InputRole::Short).count();
    let larges = uploads.len() - shorts;
    if shorts == 0 || larges == 0 {
        return Err(ApiError::bad_request(format!(
            "At least one file is required in both {SHORT_FIELD} and {LARGE_FIELD}"
        )));
    }

    // Cheap early rejection; the debit at dispatch stays authoritative
    if !state
        .stores
        .credits
        .check_sufficient(account.as_str(), shorts as u64)
        .await?
    {
        return Err(ApiError::PaymentRequired(format!(
            "Insufficient merge credits: {shorts} required"
        )));
    }

    let task_id = match requested_id {
        Some(id) => {
            let id = TaskId::from_string(id);
            if !id.is_path_safe() {
                return Err(ApiError::bad_request("Invalid task_id format"));
            }
            // Finished tasks may have had their scratch directory removed
            if state.stores.tasks.get(&id).await?.is_some() {
                return Err(ApiError::conflict(format!("Task {id} already exists")));
            }
            id
        }
        None => TaskId::new(),
    };

    // Whoever creates the directory owns the id; the loser writes nothing
    state.scratch.claim_task(&task_id).await?;

    match save_and_dispatch(&state, &task_id, &account, uploads).await {
        Ok(()) => {
            info!(task_id = %task_id, account = %account.as_str(), shorts, larges, "Merge task accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(TaskAccepted {
                    task_id,
                    status: TaskStatus::Processing,
                }),
            ))
        }
        Err(e) => {
            if let Err(cleanup) = state.scratch.cleanup_task(&task_id).await {
                warn!(task_id = %task_id, "Failed to clean rejected uploads: {}", cleanup);
            }
            Err(e.into())
        }
    }
}

async fn save_and_dispatch(
    state: &AppState,
    task_id: &TaskId,
    account: &AccountId,
    uploads: Vec<PendingUpload>,
) -> Result<(), WorkerError> {
    let mut short_inputs = Vec::new();
    let mut large_inputs = Vec::new();

    for upload in uploads {
        let path = state
            .scratch
            .save_upload(task_id, upload.role, &upload.filename, &upload.data)
            .await?;
        match upload.role {
            InputRole::Short => short_inputs.push(path),
            InputRole::Large => large_inputs.push(path),
        }
    }

    state
        .orchestrator
        .dispatch(DispatchRequest {
            task_id: Some(task_id.clone()),
            account_id: account.as_str().to_string(),
            short_inputs,
            large_inputs,
        })
        .await?;

    Ok(())
}

fn parse_task_id(raw: String) -> ApiResult<TaskId> {
    let task_id = TaskId::from_string(raw);
    if !task_id.is_path_safe() {
        return Err(ApiError::bad_request("Invalid task_id format"));
    }
    Ok(task_id)
}

/// Poll a task.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskStatusResponse>> {
    let task_id = parse_task_id(task_id)?;
    let view = state.status.get_status(&task_id).await?;
    Ok(Json(view.into()))
}

/// Download the outputs of a completed task as a zip.
pub async fn download_archive(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task_id = parse_task_id(task_id)?;
    let archive = state.packager.package(&task_id).await?;

    metrics::record_archive_bytes(archive.bytes.len());

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", archive.file_name),
            ),
        ],
        archive.bytes,
    ))
}

/// Request cancellation of a queued or running task.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let task_id = parse_task_id(task_id)?;
    state.orchestrator.cancel(&task_id).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            task_id,
            status: "cancelling",
        }),
    ))
}
