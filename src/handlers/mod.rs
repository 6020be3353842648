//! HTTP handlers, one module per resource.

pub mod auth;
pub mod multipart;
pub mod posts;
pub mod sites;
pub mod topics;
pub mod upload;
pub mod users;

use crate::error::AppError;
use crate::service::token::Claims;
use std::collections::HashMap;

/// First present key wins; blank values count as absent.
pub(crate) fn query_i64(params: &HashMap<String, String>, keys: &[&str]) -> Result<Option<i64>, AppError> {
    for key in keys {
        if let Some(raw) = params.get(*key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
            return raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| AppError::BadRequest(format!("参数 {} 无效", key)));
        }
    }
    Ok(None)
}

pub(crate) fn query_text<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params.get(key).map(|s| s.trim()).filter(|s| !s.is_empty())
}

pub(crate) fn require_admin(claims: &Claims) -> Result<(), AppError> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("需要管理员权限".into()))
    }
}
