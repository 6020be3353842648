//! Standard response envelope helpers.

use crate::error::ApiCode;
use axum::Json;
use serde::Serialize;

/// `{success, code, message, data?, timestamp}` returned by every API route.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub code: ApiCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl<T> Envelope<T> {
    pub fn success(data: Option<T>, message: impl Into<String>) -> Self {
        Envelope {
            success: true,
            code: ApiCode::Success,
            message: message.into(),
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn failure(code: ApiCode, message: impl Into<String>) -> Self {
        Envelope {
            success: false,
            code,
            message: message.into(),
            data: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

pub type ApiResponse<T> = Json<Envelope<T>>;

pub fn ok<T: Serialize>(data: T) -> ApiResponse<T> {
    Json(Envelope::success(Some(data), "成功"))
}

pub fn ok_with_message<T: Serialize>(data: T, message: impl Into<String>) -> ApiResponse<T> {
    Json(Envelope::success(Some(data), message))
}

/// Success without a payload; `data` is omitted from the body.
pub fn ok_empty(message: impl Into<String>) -> ApiResponse<()> {
    Json(Envelope::success(None, message))
}
