//! Admin console user handlers.

use super::{query_text, require_admin};
use crate::client::Direction;
use crate::error::AppError;
use crate::extractors::{ApiJson, ApiPath, AuthUser};
use crate::response::{ok, ok_empty, ok_with_message, ApiResponse};
use crate::service::pagination::{PageData, PageParams, SortParams};
use crate::service::users::{self, NewUser, ProfilePatch, UserProfile, UserService};
use crate::state::AppState;
use axum::extract::{Query, State};
use std::collections::HashMap;

pub async fn list(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(params): Query<HashMap<String, String>>,
) -> Result<ApiResponse<PageData<UserProfile>>, AppError> {
    require_admin(&claims)?;
    let page = PageParams::from_query(&params)?;
    let sort = SortParams::from_query(&params, users::SORTABLE, "created_at", Direction::Desc)?;
    let data = UserService::list(&state, page, sort, query_text(&params, "keyword")).await?;
    Ok(ok(data))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiJson(body): ApiJson<NewUser>,
) -> Result<ApiResponse<UserProfile>, AppError> {
    let user = UserService::create(&state, &claims, body).await?;
    Ok(ok_with_message(user, "用户创建成功"))
}

pub async fn read(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<UserProfile>, AppError> {
    Ok(ok(UserService::get(&state, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<ProfilePatch>,
) -> Result<ApiResponse<UserProfile>, AppError> {
    let user = UserService::update(&state, &claims, id, patch).await?;
    Ok(ok_with_message(user, "用户信息更新成功"))
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<()>, AppError> {
    UserService::delete(&state, &claims, id).await?;
    Ok(ok_empty("用户删除成功"))
}
