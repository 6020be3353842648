//! Topic handlers.

use super::query_text;
use crate::client::Direction;
use crate::error::AppError;
use crate::extractors::{ApiJson, ApiPath, AuthUser};
use crate::response::{ok, ok_empty, ok_with_message, ApiResponse};
use crate::service::pagination::{PageData, PageParams, SortParams};
use crate::service::posts::{PostService, PostView, SORTABLE as POST_SORTABLE};
use crate::service::topics::{self, Topic, TopicInput, TopicService};
use crate::state::AppState;
use axum::extract::{Query, State};
use std::collections::HashMap;

/// Also served at `/posts/topics` for the post composer.
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<ApiResponse<PageData<Topic>>, AppError> {
    let page = PageParams::from_query(&params)?;
    let sort = SortParams::from_query(&params, topics::SORTABLE, "created_at", Direction::Desc)?;
    let data = TopicService::list(&state, page, sort, query_text(&params, "keyword")).await?;
    Ok(ok(data))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
    ApiJson(body): ApiJson<TopicInput>,
) -> Result<ApiResponse<Topic>, AppError> {
    let topic = TopicService::create(&state, body).await?;
    Ok(ok_with_message(topic, "话题创建成功"))
}

pub async fn read(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<ApiResponse<Topic>, AppError> {
    Ok(ok(TopicService::get(&state, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<TopicInput>,
) -> Result<ApiResponse<Topic>, AppError> {
    let topic = TopicService::update(&state, &claims, id, body).await?;
    Ok(ok_with_message(topic, "话题更新成功"))
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<()>, AppError> {
    TopicService::delete(&state, &claims, id).await?;
    Ok(ok_empty("话题删除成功"))
}

pub async fn posts(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<ApiResponse<PageData<PostView>>, AppError> {
    let page = PageParams::from_query(&params)?;
    let sort = SortParams::from_query(&params, POST_SORTABLE, "created_at", Direction::Desc)?;
    Ok(ok(PostService::by_topic(&state, id, page, sort).await?))
}
