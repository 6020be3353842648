//! Topics and the post/topic join table.

use super::decode_row;
use crate::client::query::contains_pattern;
use crate::client::{cols, Delete, Filter, Insert, Query, Update};
use crate::error::AppError;
use crate::service::pagination::{PageData, PageParams, SortParams};
use crate::service::token::Claims;
use crate::service::validation::RequestValidator;
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

pub const TOPICS: &str = "topics";
pub const POST_TOPICS: &str = "post_topics";

pub const SORTABLE: &[&str] = &["id", "name", "created_at", "updated_at"];

const TOPIC_COLUMNS: &[&str] = &["id", "name", "created_at", "updated_at"];
const MAX_TOPIC_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicInput {
    pub name: Option<String>,
}

fn topic_name(input: TopicInput) -> Result<String, AppError> {
    let name = RequestValidator::required_text(input.name.as_deref(), "话题名称")?;
    RequestValidator::max_chars(&name, MAX_TOPIC_CHARS, "话题名称")?;
    Ok(name)
}

/// Trim, drop blanks and repeated names; first occurrence wins.
pub fn normalize_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(|n| n.as_ref().trim())
        .filter(|n| !n.is_empty())
        .filter(|n| seen.insert(n.to_string()))
        .map(str::to_string)
        .collect()
}

pub struct TopicService;

impl TopicService {
    pub async fn list(
        state: &AppState,
        page: PageParams,
        sort: SortParams,
        keyword: Option<&str>,
    ) -> Result<PageData<Topic>, AppError> {
        let filter = keyword
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| Filter::ilike("name", contains_pattern(k)));
        let q = Query::table(TOPICS)
            .maybe_filter(filter)
            .order_by(sort.column, sort.direction)
            .fields(cols(TOPIC_COLUMNS));
        let paged = state.client.find(&q, page.page, page.page_size).await?;
        let items = paged.datas.into_iter().map(decode_row).collect::<Result<Vec<Topic>, _>>()?;
        Ok(PageData::new(items, paged.aggregate.count, page))
    }

    pub async fn get(state: &AppState, id: i64) -> Result<Topic, AppError> {
        let q = Query::table(TOPICS).filter(Filter::id(id)).fields(cols(TOPIC_COLUMNS));
        match state.client.query_first(&q).await? {
            Some(row) => decode_row(row),
            None => Err(AppError::NotFound("话题不存在".into())),
        }
    }

    pub async fn create(state: &AppState, input: TopicInput) -> Result<Topic, AppError> {
        let name = topic_name(input)?;
        let mut obj = Map::new();
        obj.insert("name".into(), json!(name));
        let row = state
            .client
            .insert(&Insert::one(TOPICS, obj).returning(cols(TOPIC_COLUMNS)))
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::Conflict("话题已存在".into()),
                other => other,
            })?
            .first()
            .ok_or_else(|| AppError::Internal("topic insert returned no row".into()))?;
        decode_row(row)
    }

    pub async fn update(state: &AppState, caller: &Claims, id: i64, input: TopicInput) -> Result<Topic, AppError> {
        if !caller.is_admin() {
            return Err(AppError::Forbidden("无权修改话题".into()));
        }
        let name = topic_name(input)?;
        let mut set = Map::new();
        set.insert("name".into(), json!(name));
        let res = state
            .client
            .update(&Update::new(TOPICS, Filter::id(id), set).returning(cols(TOPIC_COLUMNS)))
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::Conflict("话题已存在".into()),
                other => other,
            })?;
        match res.first() {
            Some(row) => decode_row(row),
            None => Err(AppError::NotFound("话题不存在".into())),
        }
    }

    /// Join rows go first so no post keeps a dangling association.
    pub async fn delete(state: &AppState, caller: &Claims, id: i64) -> Result<(), AppError> {
        if !caller.is_admin() {
            return Err(AppError::Forbidden("无权删除话题".into()));
        }
        Self::get(state, id).await?;
        let links = state
            .client
            .delete(&Delete::new(POST_TOPICS, Filter::eq("topic_topics", id)))
            .await?;
        state.client.delete(&Delete::new(TOPICS, Filter::id(id))).await?;
        tracing::info!(topic_id = id, links = links.affected_rows, "topic deleted");
        Ok(())
    }

    /// Resolve names to topics, creating the missing ones. Result follows the input order.
    pub async fn ensure_by_names<S: AsRef<str>>(state: &AppState, names: &[S]) -> Result<Vec<Topic>, AppError> {
        let names = normalize_names(names);
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let q = Query::table(TOPICS)
            .filter(Filter::any_of("name", names.iter().map(|n| json!(n)).collect()))
            .fields(cols(&["id", "name"]));
        let mut found: Vec<Topic> = state
            .client
            .query(&q)
            .await?
            .into_iter()
            .map(decode_row)
            .collect::<Result<_, _>>()?;

        let missing: Vec<Map<String, Value>> = names
            .iter()
            .filter(|n| !found.iter().any(|t| &t.name == *n))
            .map(|n| {
                let mut obj = Map::new();
                obj.insert("name".into(), json!(n));
                obj
            })
            .collect();
        if !missing.is_empty() {
            let created = state
                .client
                .insert(&Insert::many(TOPICS, missing).returning(cols(&["id", "name"])))
                .await?;
            tracing::debug!(count = created.affected_rows, "topics auto-created");
            for row in created.returning {
                found.push(decode_row(row)?);
            }
        }

        let mut ordered = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(t) = found.iter().find(|t| &t.name == name) {
                ordered.push(t.clone());
            }
        }
        Ok(ordered)
    }

    pub async fn link(state: &AppState, post_id: i64, topics: &[Topic]) -> Result<u64, AppError> {
        if topics.is_empty() {
            return Ok(0);
        }
        let objects = topics
            .iter()
            .map(|t| {
                let mut obj = Map::new();
                obj.insert("post_posts".into(), json!(post_id));
                obj.insert("topic_topics".into(), json!(t.id));
                obj
            })
            .collect();
        Ok(state.client.insert(&Insert::many(POST_TOPICS, objects)).await?.affected_rows)
    }

    pub async fn unlink_post(state: &AppState, post_id: i64) -> Result<u64, AppError> {
        Ok(state
            .client
            .delete(&Delete::new(POST_TOPICS, Filter::eq("post_posts", post_id)))
            .await?
            .affected_rows)
    }
}
