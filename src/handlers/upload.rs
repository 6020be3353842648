//! Upload handlers.

use super::multipart::read_form;
use crate::error::AppError;
use crate::extractors::AuthUser;
use crate::response::{ok_with_message, ApiResponse};
use crate::service::upload::{UploadService, UploadedFile};
use crate::state::AppState;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};

/// Multipart: `file` and optional `directory`.
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<UploadedFile>, AppError> {
    let mut form = read_form(multipart?, state.config.upload_max_file_bytes).await?;
    let directory = form.text("directory").map(str::to_string);
    let file = form
        .take_files("file")
        .into_iter()
        .next()
        .ok_or_else(|| AppError::BadRequest("请选择要上传的文件".into()))?;
    let stored = UploadService::upload(&state, file, directory.as_deref()).await?;
    tracing::debug!(user_id = claims.id, key = %stored.key, "upload via api");
    Ok(ok_with_message(stored, "上传成功"))
}

/// Multipart: repeated `files` and optional `directory`.
pub async fn upload_batch(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<Vec<UploadedFile>>, AppError> {
    let mut form = read_form(multipart?, state.config.upload_max_file_bytes).await?;
    let directory = form.text("directory").map(str::to_string);
    let mut files = form.take_files("files");
    files.extend(form.take_files("files[]"));
    if files.is_empty() {
        return Err(AppError::BadRequest("请选择要上传的文件".into()));
    }
    let stored = UploadService::upload_many(&state, files, directory.as_deref()).await?;
    tracing::debug!(user_id = claims.id, count = stored.len(), "batch upload via api");
    Ok(ok_with_message(stored, "上传成功"))
}

/// Serves a stored object at its public URL (`{UPLOAD_PUBLIC_DOMAIN}/{key}`).
pub async fn serve(State(state): State<AppState>, Path(key): Path<String>) -> Result<Response, AppError> {
    let object = state
        .storage
        .fetch(&key)
        .await?
        .ok_or_else(|| AppError::NotFound("文件不存在".into()))?;
    Ok(([(header::CONTENT_TYPE, object.content_type)], object.content).into_response())
}
