//! File uploads: size ceiling, object keys and public URLs.

use crate::error::AppError;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

const SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_EXTENSION_CHARS: usize = 10;

/// A file read from a request, not yet stored.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Descriptor of a stored file; also the element type of `media_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
    pub key: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
}

/// Lowercased extension of `file_name`, if it has a plausible one.
pub fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > MAX_EXTENSION_CHARS {
        return None;
    }
    if !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Normalized sub-directory: no `..`, no empty segments, no leading or trailing slashes.
pub fn normalize_directory(directory: Option<&str>) -> Result<Option<String>, AppError> {
    let Some(raw) = directory.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    let mut segments = Vec::new();
    for seg in raw.split('/').filter(|s| !s.is_empty()) {
        if seg == "." || seg == ".." || seg.contains("..") {
            return Err(AppError::BadRequest("目录名称不合法".into()));
        }
        if !seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
            return Err(AppError::BadRequest("目录名称不合法".into()));
        }
        segments.push(seg);
    }
    Ok(if segments.is_empty() { None } else { Some(segments.join("/")) })
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect()
}

/// `{base}/{directory}/{millis}-{6 base36 chars}.{ext}`; absent parts are omitted.
pub fn object_key(base: &str, directory: Option<&str>, file_name: &str, now: DateTime<Utc>) -> String {
    let mut key = String::new();
    let base = base.trim_matches('/');
    if !base.is_empty() {
        key.push_str(base);
        key.push('/');
    }
    if let Some(dir) = directory {
        key.push_str(dir);
        key.push('/');
    }
    key.push_str(&format!("{}-{}", now.timestamp_millis(), random_suffix()));
    if let Some(ext) = extension(file_name) {
        key.push('.');
        key.push_str(&ext);
    }
    key
}

pub fn public_url(domain: &str, key: &str) -> String {
    format!("{}/{}", domain.trim_end_matches('/'), key)
}

pub struct UploadService;

impl UploadService {
    pub fn check_size(state: &AppState, size: usize) -> Result<(), AppError> {
        if size > state.config.upload_max_file_bytes {
            return Err(AppError::FileTooLarge);
        }
        Ok(())
    }

    pub async fn upload(state: &AppState, file: FilePart, directory: Option<&str>) -> Result<UploadedFile, AppError> {
        let mut stored = Self::upload_many(state, vec![file], directory).await?;
        stored
            .pop()
            .ok_or_else(|| AppError::Internal("upload produced no file".into()))
    }

    /// Every file is checked before the first one is stored.
    pub async fn upload_many(
        state: &AppState,
        files: Vec<FilePart>,
        directory: Option<&str>,
    ) -> Result<Vec<UploadedFile>, AppError> {
        let directory = normalize_directory(directory)?;
        for f in &files {
            if f.bytes.is_empty() {
                return Err(AppError::BadRequest("文件不能为空".into()));
            }
            Self::check_size(state, f.bytes.len())?;
        }

        let mut stored = Vec::with_capacity(files.len());
        for f in files {
            let key = object_key(&state.config.upload_base_path, directory.as_deref(), &f.file_name, Utc::now());
            let size = f.bytes.len() as u64;
            state.storage.put(&key, f.bytes, &f.content_type).await?;
            tracing::info!(key = %key, size, "file uploaded");
            stored.push(UploadedFile {
                url: public_url(&state.config.upload_public_domain, &key),
                key,
                name: f.file_name,
                size,
                content_type: f.content_type,
            });
        }
        Ok(stored)
    }
}
