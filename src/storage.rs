//! Object storage for uploaded files.

use crate::error::AppError;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use std::collections::HashMap;
use std::sync::Mutex;

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `content` under `key`, replacing any previous object.
    async fn put(&self, key: &str, content: Vec<u8>, content_type: &str) -> Result<(), AppError>;

    /// The object under `key`, or `None` when nothing is stored there.
    async fn fetch(&self, key: &str) -> Result<Option<StoredObject>, AppError>;
}

/// S3-compatible bucket. Credentials and region come from the standard AWS environment.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    /// Custom endpoints (MinIO, vendor gateways) are addressed path-style.
    pub async fn from_env(bucket: String, endpoint: Option<String>) -> Self {
        let shared = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        S3Storage {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
            bucket,
        }
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn put(&self, key: &str, content: Vec<u8>, content_type: &str) -> Result<(), AppError> {
        let size = content.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(key = %key, error = %e, "s3 put_object failed");
                AppError::UploadFailed("文件上传失败".into())
            })?;
        tracing::debug!(key = %key, size, "stored object");
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<StoredObject>, AppError> {
        let out = match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(out) => out,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => return Ok(None),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "s3 get_object failed");
                return Err(AppError::ServiceUnavailable("文件读取失败".into()));
            }
        };
        let content_type = out
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let content = out
            .body
            .collect()
            .await
            .map_err(|e| {
                tracing::warn!(key = %key, error = %e, "s3 object body read failed");
                AppError::ServiceUnavailable("文件读取失败".into())
            })?
            .into_bytes()
            .to_vec();
        Ok(Some(StoredObject { content, content_type }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Process-local storage; keeps objects in a map.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().ok().and_then(|m| m.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, key: &str, content: Vec<u8>, content_type: &str) -> Result<(), AppError> {
        self.objects
            .lock()
            .map_err(|_| AppError::Internal("object map lock poisoned".into()))?
            .insert(
                key.to_string(),
                StoredObject {
                    content,
                    content_type: content_type.to_string(),
                },
            );
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Option<StoredObject>, AppError> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| AppError::Internal("object map lock poisoned".into()))?;
        Ok(objects.get(key).cloned())
    }
}
