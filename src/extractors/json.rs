//! JSON body and path extractors whose rejections are rendered as the envelope.

use crate::error::AppError;
use axum::extract::{rejection::PathRejection, FromRequest, FromRequestParts};

#[derive(Debug, Clone, Copy, Default, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, Clone, Copy, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        tracing::debug!(error = %rejection, "rejected path");
        AppError::BadRequest("无效的ID".into())
    }
}
