//! Typed errors and HTTP mapping.

use crate::response::Envelope;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("table {table} references later table {target}")]
    ForwardReference { table: String, target: String },
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("validation: {0}")]
    Validation(String),
}

/// Numeric API codes carried in the envelope's `code` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(into = "u16")]
pub enum ApiCode {
    Success = 200,
    UnknownError = 1000,
    InvalidParams = 1001,
    ServiceUnavailable = 1002,
    RateLimitExceeded = 1003,
    Unauthorized = 2000,
    Forbidden = 2001,
    TokenExpired = 2002,
    InvalidToken = 2003,
    UserNotFound = 3000,
    InvalidCredentials = 3001,
    UserAlreadyExists = 3004,
    VerificationCodeInvalid = 3005,
    UploadFailed = 4000,
    FileTooLarge = 4002,
    ContentNotFound = 5000,
    DuplicateContent = 5001,
    ContentValidationFailed = 5002,
}

impl From<ApiCode> for u16 {
    fn from(code: ApiCode) -> u16 {
        code as u16
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("登录已过期，请重新登录")]
    TokenExpired,
    #[error("无效的token")]
    InvalidToken,
    #[error("{0}")]
    Forbidden(String),
    #[error("用户不存在")]
    UserNotFound,
    #[error("手机号或密码错误")]
    InvalidCredentials,
    #[error("该手机号已注册")]
    UserExists,
    #[error("{0}")]
    InvalidVerificationCode(String),
    #[error("发送过于频繁，请稍后再试")]
    SendTooFrequently,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("文件大小不能超过10MB")]
    FileTooLarge,
    #[error("请求体过大")]
    PayloadTooLarge,
    #[error("不支持的请求方法")]
    MethodNotAllowed,
    #[error("{0}")]
    UploadFailed(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("query: {0}")]
    Query(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable string tag used in logs.
    pub fn tag(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::BadRequest(_) => "invalid_params",
            AppError::Validation(_) => "validation_error",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken => "invalid_token",
            AppError::Forbidden(_) => "forbidden",
            AppError::UserNotFound => "user_not_found",
            AppError::InvalidCredentials => "invalid_credentials",
            AppError::UserExists => "user_exists",
            AppError::InvalidVerificationCode(_) => "invalid_verification_code",
            AppError::SendTooFrequently => "send_too_frequently",
            AppError::NotFound(_) => "content_not_found",
            AppError::Conflict(_) => "conflict",
            AppError::FileTooLarge => "file_too_large",
            AppError::PayloadTooLarge => "payload_too_large",
            AppError::MethodNotAllowed => "method_not_allowed",
            AppError::UploadFailed(_) => "upload_failed",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::Db(_) => "database_error",
            AppError::Query(_) => "query_error",
            AppError::Internal(_) => "unknown_error",
        }
    }

    pub fn status_and_code(&self) -> (StatusCode, ApiCode) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, ApiCode::InvalidParams),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, ApiCode::ContentValidationFailed),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, ApiCode::Unauthorized),
            AppError::TokenExpired => (StatusCode::UNAUTHORIZED, ApiCode::TokenExpired),
            AppError::InvalidToken => (StatusCode::UNAUTHORIZED, ApiCode::InvalidToken),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, ApiCode::Forbidden),
            AppError::UserNotFound => (StatusCode::NOT_FOUND, ApiCode::UserNotFound),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, ApiCode::InvalidCredentials),
            AppError::UserExists => (StatusCode::CONFLICT, ApiCode::UserAlreadyExists),
            AppError::InvalidVerificationCode(_) => (StatusCode::BAD_REQUEST, ApiCode::VerificationCodeInvalid),
            AppError::SendTooFrequently => (StatusCode::TOO_MANY_REQUESTS, ApiCode::RateLimitExceeded),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, ApiCode::ContentNotFound),
            AppError::Conflict(_) => (StatusCode::CONFLICT, ApiCode::DuplicateContent),
            AppError::FileTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, ApiCode::FileTooLarge),
            AppError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, ApiCode::InvalidParams),
            AppError::MethodNotAllowed => (StatusCode::METHOD_NOT_ALLOWED, ApiCode::InvalidParams),
            AppError::UploadFailed(_) => (StatusCode::SERVICE_UNAVAILABLE, ApiCode::UploadFailed),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, ApiCode::ServiceUnavailable),
            AppError::Db(sqlx::Error::RowNotFound) => (StatusCode::NOT_FOUND, ApiCode::ContentNotFound),
            AppError::Config(_) | AppError::Db(_) | AppError::Query(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ApiCode::UnknownError)
            }
        }
    }

    /// Translate constraint violations into domain errors; everything else stays a database error.
    pub fn from_db(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            match db.code().as_deref() {
                Some("23505") => return AppError::Conflict("数据已存在".into()),
                Some("23503") => return AppError::Conflict("存在关联数据，无法完成操作".into()),
                _ => {}
            }
        }
        AppError::Db(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "rejected json body");
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return AppError::PayloadTooLarge;
        }
        AppError::BadRequest("请求体格式错误".into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status.is_server_error() && code == ApiCode::UnknownError {
            tracing::error!(tag = self.tag(), error = %self, "request failed");
            "服务器内部错误".to_string()
        } else {
            if status.is_server_error() {
                tracing::warn!(tag = self.tag(), error = %self, "upstream failure");
            }
            self.to_string()
        };
        (status, Json(Envelope::<()>::failure(code, message))).into_response()
    }
}
