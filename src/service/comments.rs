//! Post comments with optional single-parent threading.

use super::decode_row;
use crate::client::{cols, Delete, Direction, Field, Filter, Insert, Query};
use crate::error::AppError;
use crate::service::pagination::{PageData, PageParams};
use crate::service::posts::{AuthorBrief, POSTS};
use crate::service::token::Claims;
use crate::service::validation::{RequestValidator, MAX_CONTENT_CHARS};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const COMMENTS: &str = "post_comments";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentView {
    pub id: i64,
    pub content: String,
    pub media_data: Value,
    #[serde(rename(serialize = "post_id", deserialize = "post_posts"))]
    pub post_id: i64,
    #[serde(default, rename(serialize = "parent_id", deserialize = "parent_post_comments"))]
    pub parent_id: Option<i64>,
    pub author: Option<AuthorBrief>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewComment {
    pub content: Option<String>,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct CommentRef {
    id: i64,
    author_user: i64,
    post_posts: i64,
}

fn comment_fields() -> Vec<Field> {
    let mut fields = cols(&[
        "id",
        "content",
        "media_data",
        "post_posts",
        "parent_post_comments",
        "created_at",
        "updated_at",
    ]);
    fields.push(Field::rel("author", cols(&["id", "nickname", "avatar_url"])));
    fields
}

pub struct CommentService;

impl CommentService {
    async fn require_post(state: &AppState, post_id: i64) -> Result<(), AppError> {
        if state.client.count(POSTS, Some(&Filter::id(post_id))).await? == 0 {
            return Err(AppError::NotFound("帖子不存在".into()));
        }
        Ok(())
    }

    async fn find_ref(state: &AppState, post_id: i64, id: i64) -> Result<Option<CommentRef>, AppError> {
        let q = Query::table(COMMENTS)
            .filter(Filter::And(vec![Filter::id(id), Filter::eq("post_posts", post_id)]))
            .fields(cols(&["id", "author_user", "post_posts"]));
        state.client.query_first(&q).await?.map(decode_row).transpose()
    }

    /// Oldest first.
    pub async fn list(state: &AppState, post_id: i64, page: PageParams) -> Result<PageData<CommentView>, AppError> {
        Self::require_post(state, post_id).await?;
        let q = Query::table(COMMENTS)
            .filter(Filter::eq("post_posts", post_id))
            .order_by("created_at", Direction::Asc)
            .fields(comment_fields());
        let paged = state.client.find(&q, page.page, page.page_size).await?;
        let items = paged.datas.into_iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(PageData::new(items, paged.aggregate.count, page))
    }

    pub async fn create(state: &AppState, caller: &Claims, post_id: i64, input: NewComment) -> Result<CommentView, AppError> {
        let content = RequestValidator::required_text(input.content.as_deref(), "评论内容")?;
        RequestValidator::max_chars(&content, MAX_CONTENT_CHARS, "评论内容")?;
        Self::require_post(state, post_id).await?;
        if let Some(parent) = input.parent_id {
            if Self::find_ref(state, post_id, parent).await?.is_none() {
                return Err(AppError::BadRequest("回复的评论不存在".into()));
            }
        }

        let mut obj = Map::new();
        obj.insert("content".into(), json!(content));
        obj.insert("author_user".into(), json!(caller.id));
        obj.insert("post_posts".into(), json!(post_id));
        if let Some(parent) = input.parent_id {
            obj.insert("parent_post_comments".into(), json!(parent));
        }
        let row = state
            .client
            .insert(&Insert::one(COMMENTS, obj).returning(comment_fields()))
            .await?
            .first()
            .ok_or_else(|| AppError::Internal("comment insert returned no row".into()))?;
        let comment: CommentView = decode_row(row)?;
        tracing::info!(comment_id = comment.id, post_id, author = caller.id, "comment created");
        Ok(comment)
    }

    /// Deletes the comment together with every reply beneath it.
    pub async fn delete(state: &AppState, caller: &Claims, post_id: i64, id: i64) -> Result<u64, AppError> {
        let Some(comment) = Self::find_ref(state, post_id, id).await? else {
            return Err(AppError::NotFound("评论不存在".into()));
        };
        if comment.author_user != caller.id && !caller.is_admin() {
            return Err(AppError::Forbidden("无权删除该评论".into()));
        }

        let mut doomed = vec![comment.id];
        let mut frontier = vec![json!(comment.id)];
        while !frontier.is_empty() {
            let q = Query::table(COMMENTS)
                .filter(Filter::any_of("parent_post_comments", frontier))
                .fields(cols(&["id"]));
            let ids: Vec<i64> = state
                .client
                .query(&q)
                .await?
                .iter()
                .filter_map(|row| row.get("id").and_then(Value::as_i64))
                .filter(|id| !doomed.contains(id))
                .collect();
            doomed.extend(&ids);
            frontier = ids.into_iter().map(Value::from).collect();
        }

        let filter = Filter::any_of("id", doomed.iter().map(|id| json!(id)).collect());
        let removed = state.client.delete(&Delete::new(COMMENTS, filter)).await?.affected_rows;
        tracing::info!(comment_id = comment.id, post_id = comment.post_posts, removed, "comment deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::service::posts::{NewPost, PostService};
    use crate::service::sites::{NewSite, SiteService};
    use crate::service::users::UserService;

    fn claims(id: i64, role: &str) -> Claims {
        Claims {
            id,
            mobile: "13800138000".into(),
            nickname: None,
            role: role.into(),
            current_site_id: None,
            iat: 0,
            exp: 0,
        }
    }

    async fn with_post() -> (AppState, Claims, i64) {
        let state = AppState::in_memory(AppConfig::for_tests());
        let site = SiteService::create(&state, &claims(0, "admin"), NewSite { name: Some("主站".into()), icon_url: None })
            .await
            .unwrap();
        let user = UserService::insert(&state, "13800138000", None, "作者", Some(site.id)).await.unwrap();
        let author = claims(user.id, "user");
        let post = PostService::create(
            &state,
            &author,
            NewPost {
                content: Some("帖子".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        (state, author, post.id)
    }

    fn text(s: &str, parent: Option<i64>) -> NewComment {
        NewComment {
            content: Some(s.into()),
            parent_id: parent,
        }
    }

    #[tokio::test]
    async fn replies_must_stay_on_the_same_post() {
        let (state, author, post) = with_post().await;
        let root = CommentService::create(&state, &author, post, text("first", None)).await.unwrap();
        let reply = CommentService::create(&state, &author, post, text("reply", Some(root.id))).await.unwrap();
        assert_eq!(reply.parent_id, Some(root.id));
        assert_eq!(reply.post_id, post);

        let stray = CommentService::create(&state, &author, post, text("x", Some(root.id + 100))).await;
        assert!(matches!(stray, Err(AppError::BadRequest(_))));

        let page = CommentService::list(&state, post, PageParams::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].content, "first");
    }

    #[tokio::test]
    async fn deleting_a_comment_takes_its_replies() {
        let (state, author, post) = with_post().await;
        let root = CommentService::create(&state, &author, post, text("root", None)).await.unwrap();
        let child = CommentService::create(&state, &author, post, text("child", Some(root.id))).await.unwrap();
        CommentService::create(&state, &author, post, text("grandchild", Some(child.id))).await.unwrap();
        CommentService::create(&state, &author, post, text("other", None)).await.unwrap();

        let stranger = claims(author.id + 5, "user");
        assert!(matches!(
            CommentService::delete(&state, &stranger, post, root.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(CommentService::delete(&state, &author, post, root.id).await.unwrap(), 3);
        assert_eq!(state.client.count(COMMENTS, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_post_is_not_found() {
        let (state, author, post) = with_post().await;
        let res = CommentService::create(&state, &author, post + 1, text("x", None)).await;
        assert!(matches!(res, Err(AppError::NotFound(_))));
    }
}
