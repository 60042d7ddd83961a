//! Download task handlers.

use super::{CreateDownloadTaskRequest, DEFAULT_PAGE_SIZE, ListDownloadTasksQuery};
use crate::api::AppState;
use crate::api::auth::CallerToken;
use crate::error::{Error, TaskError};
use crate::types::{DownloadType, TaskId, TaskInfo, TaskList, TaskUpdate};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio_util::io::ReaderStream;

/// POST /download-tasks - Create a download task
#[utoipa::path(
    post,
    path = "/api/v1/download-tasks",
    tag = "download-tasks",
    request_body = CreateDownloadTaskRequest,
    responses(
        (status = 201, description = "Task created as pending", body = TaskInfo),
        (status = 400, description = "Malformed url", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 412, description = "Unsupported download type", body = crate::error::ApiError),
        (status = 503, description = "Shutting down", body = crate::error::ApiError)
    ),
    security(("bearer" = []), ("cookie" = []))
)]
pub async fn create_download_task(
    State(state): State<AppState>,
    CallerToken(token): CallerToken,
    Json(request): Json<CreateDownloadTaskRequest>,
) -> Result<(StatusCode, Json<TaskInfo>), Error> {
    let download_type: DownloadType =
        request
            .download_type
            .parse()
            .map_err(|_| TaskError::UnsupportedType {
                download_type: request.download_type.clone(),
            })?;

    let task = state
        .engine
        .create(&token, download_type, &request.url)
        .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// GET /download-tasks - List the caller's download tasks
#[utoipa::path(
    get,
    path = "/api/v1/download-tasks",
    tag = "download-tasks",
    params(ListDownloadTasksQuery),
    responses(
        (status = 200, description = "One page of the caller's tasks and their total count", body = TaskList),
        (status = 400, description = "Page size out of range", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError)
    ),
    security(("bearer" = []), ("cookie" = []))
)]
pub async fn list_download_tasks(
    State(state): State<AppState>,
    CallerToken(token): CallerToken,
    Query(query): Query<ListDownloadTasksQuery>,
) -> Result<Json<TaskList>, Error> {
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let max = state.config.api.max_page_size;
    if limit == 0 || limit > max {
        return Err(Error::InvalidArgument(format!(
            "limit must be between 1 and {}",
            max
        )));
    }

    let list = state.engine.list(&token, offset, limit).await?;
    Ok(Json(list))
}

/// PATCH /download-tasks/:id - Update a download task
#[utoipa::path(
    patch,
    path = "/api/v1/download-tasks/{id}",
    tag = "download-tasks",
    params(
        ("id" = i64, Path, description = "Download task ID")
    ),
    request_body = TaskUpdate,
    responses(
        (status = 200, description = "Task after the update", body = TaskInfo),
        (status = 400, description = "Malformed url", body = crate::error::ApiError),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 403, description = "Caller does not own the task", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError),
        (status = 412, description = "Change not allowed in the current status, or an engine-written metadata key", body = crate::error::ApiError)
    ),
    security(("bearer" = []), ("cookie" = []))
)]
pub async fn update_download_task(
    State(state): State<AppState>,
    CallerToken(token): CallerToken,
    Path(id): Path<i64>,
    Json(update): Json<TaskUpdate>,
) -> Result<Json<TaskInfo>, Error> {
    let task = state.engine.update(&token, TaskId(id), update).await?;
    Ok(Json(task))
}

/// DELETE /download-tasks/:id - Delete a download task
#[utoipa::path(
    delete,
    path = "/api/v1/download-tasks/{id}",
    tag = "download-tasks",
    params(
        ("id" = i64, Path, description = "Download task ID")
    ),
    responses(
        (status = 204, description = "Task deleted"),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 403, description = "Caller does not own the task", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError)
    ),
    security(("bearer" = []), ("cookie" = []))
)]
pub async fn delete_download_task(
    State(state): State<AppState>,
    CallerToken(token): CallerToken,
    Path(id): Path<i64>,
) -> Result<StatusCode, Error> {
    state.engine.delete(&token, TaskId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /download-tasks/:id/file - Stream the downloaded content of a task
#[utoipa::path(
    get,
    path = "/api/v1/download-tasks/{id}/file",
    tag = "download-tasks",
    params(
        ("id" = i64, Path, description = "Download task ID")
    ),
    responses(
        (status = 200, description = "Downloaded bytes with the stored content type", content_type = "application/octet-stream"),
        (status = 401, description = "Missing or invalid token", body = crate::error::ApiError),
        (status = 403, description = "Caller does not own the task", body = crate::error::ApiError),
        (status = 404, description = "Task not found", body = crate::error::ApiError),
        (status = 412, description = "Task has not completed", body = crate::error::ApiError)
    ),
    security(("bearer" = []), ("cookie" = []))
)]
pub async fn get_download_task_file(
    State(state): State<AppState>,
    CallerToken(token): CallerToken,
    Path(id): Path<i64>,
) -> Result<Response, Error> {
    let file = state.engine.get_task_file(&token, TaskId(id)).await?;

    let content_type = file
        .content_type
        .as_deref()
        .filter(|value| !value.is_empty())
        .and_then(|value| HeaderValue::from_str(value).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.file_name))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let body = Body::from_stream(ReaderStream::new(file.reader));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
