//! Multipart form reading with a per-file ceiling enforced while streaming.

use crate::error::AppError;
use crate::service::upload::FilePart;
use axum::extract::multipart::{Field, MultipartError, MultipartRejection};
use axum::extract::Multipart;
use axum::http::StatusCode;
use std::collections::HashMap;

impl From<MultipartRejection> for AppError {
    fn from(rejection: MultipartRejection) -> Self {
        tracing::debug!(error = %rejection, "rejected multipart body");
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge;
        }
        AppError::BadRequest("表单数据格式错误".into())
    }
}

fn malformed(e: MultipartError) -> AppError {
    tracing::debug!(error = %e, "malformed multipart field");
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge;
    }
    AppError::BadRequest("表单数据格式错误".into())
}

#[derive(Debug, Default)]
pub struct FormData {
    texts: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<FilePart>>,
}

impl FormData {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.texts.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn texts(&self, name: &str) -> &[String] {
        self.texts.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn take_files(&mut self, name: &str) -> Vec<FilePart> {
        self.files.remove(name).unwrap_or_default()
    }
}

async fn read_file(mut field: Field<'_>, max_bytes: usize) -> Result<Vec<u8>, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(AppError::FileTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

/// Read every field. Parts with a file name are files; the rest are text.
/// A file is rejected as soon as it grows past `max_file_bytes`.
pub async fn read_form(mut multipart: Multipart, max_file_bytes: usize) -> Result<FormData, AppError> {
    let mut form = FormData::default();
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = read_file(field, max_file_bytes).await?;
                form.files.entry(name).or_default().push(FilePart {
                    file_name,
                    content_type,
                    bytes,
                });
            }
            None => {
                let text = field.text().await.map_err(malformed)?;
                form.texts.entry(name).or_default().push(text);
            }
        }
    }
    Ok(form)
}
