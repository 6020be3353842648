//! Post and comment handlers.

use super::multipart::read_form;
use super::{query_i64, query_text};
use crate::client::Direction;
use crate::error::AppError;
use crate::extractors::{ApiJson, ApiPath, AuthUser};
use crate::response::{ok, ok_empty, ok_with_message, ApiResponse};
use crate::service::comments::{CommentService, CommentView, NewComment};
use crate::service::pagination::{PageData, PageParams, SortParams};
use crate::service::posts::{self, NewPost, PostFilter, PostPatch, PostService, PostView};
use crate::state::AppState;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::{Query, State};
use std::collections::HashMap;

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<ApiResponse<PageData<PostView>>, AppError> {
    let page = PageParams::from_query(&params)?;
    let sort = SortParams::from_query(&params, posts::SORTABLE, "created_at", Direction::Desc)?;
    let filter = PostFilter {
        keyword: query_text(&params, "keyword").map(str::to_string),
        author_id: query_i64(&params, &["authorId", "author_id"])?,
        site_id: query_i64(&params, &["siteId", "site_id"])?,
        topic_id: query_i64(&params, &["topicId", "topic_id"])?,
    };
    Ok(ok(PostService::list(&state, page, sort, filter).await?))
}

/// `topics` may repeat, or carry a JSON array of names.
fn topic_names(values: &[String]) -> Result<Vec<String>, AppError> {
    let mut names = Vec::new();
    for v in values {
        let v = v.trim();
        if v.starts_with('[') {
            let list: Vec<String> =
                serde_json::from_str(v).map_err(|_| AppError::BadRequest("话题格式错误".into()))?;
            names.extend(list);
        } else if !v.is_empty() {
            names.push(v.to_string());
        }
    }
    Ok(names)
}

/// Multipart: `content`, optional `site_id`, `topics`, and `images` files.
pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<ApiResponse<PostView>, AppError> {
    let mut form = read_form(multipart?, state.config.upload_max_file_bytes).await?;
    let site_id = match form.text("site_id").map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| AppError::BadRequest("站点ID无效".into()))?,
        ),
        None => None,
    };
    let mut topic_values = form.texts("topics").to_vec();
    topic_values.extend_from_slice(form.texts("topics[]"));
    let input = NewPost {
        content: form.text("content").map(str::to_string),
        site_id,
        topics: topic_names(&topic_values)?,
        images: form.take_files("images"),
    };
    let post = PostService::create(&state, &claims, input).await?;
    Ok(ok_with_message(post, "帖子创建成功"))
}

pub async fn read(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<ApiResponse<PostView>, AppError> {
    Ok(ok(PostService::get(&state, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<PostPatch>,
) -> Result<ApiResponse<PostView>, AppError> {
    let post = PostService::update(&state, &claims, id, patch).await?;
    Ok(ok_with_message(post, "帖子更新成功"))
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<ApiResponse<()>, AppError> {
    PostService::delete(&state, &claims, id).await?;
    Ok(ok_empty("帖子删除成功"))
}

pub async fn list_comments(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<ApiResponse<PageData<CommentView>>, AppError> {
    let page = PageParams::from_query(&params)?;
    Ok(ok(CommentService::list(&state, id, page).await?))
}

pub async fn create_comment(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<NewComment>,
) -> Result<ApiResponse<CommentView>, AppError> {
    let comment = CommentService::create(&state, &claims, id, body).await?;
    Ok(ok_with_message(comment, "评论成功"))
}

pub async fn delete_comment(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiPath((post_id, comment_id)): ApiPath<(i64, i64)>,
) -> Result<ApiResponse<()>, AppError> {
    CommentService::delete(&state, &claims, post_id, comment_id).await?;
    Ok(ok_empty("评论删除成功"))
}
