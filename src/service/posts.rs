//! Posts: listing, detail, authoring with images and topics, ownership-checked edits.

use super::decode_row;
use crate::client::query::contains_pattern;
use crate::client::{cols, Delete, Field, Filter, Insert, Query, Update};
use crate::error::AppError;
use crate::service::comments::COMMENTS;
use crate::service::pagination::{PageData, PageParams, SortParams};
use crate::service::sites::{SiteBrief, SiteService, BRIEF_COLUMNS};
use crate::service::token::Claims;
use crate::service::topics::{Topic, TopicService};
use crate::service::upload::{FilePart, UploadService};
use crate::service::users::UserService;
use crate::service::validation::{RequestValidator, MAX_CONTENT_CHARS};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const POSTS: &str = "posts";
pub const SORTABLE: &[&str] = &["id", "created_at", "updated_at"];

const POST_COLUMNS: &[&str] = &["id", "content", "media_data", "created_at", "updated_at"];
const IMAGE_DIRECTORY: &str = "posts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorBrief {
    pub id: i64,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTopicLink {
    pub id: i64,
    pub topic: Option<Topic>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostView {
    pub id: i64,
    pub content: String,
    pub media_data: Value,
    pub created_at: String,
    pub updated_at: String,
    pub author: Option<AuthorBrief>,
    pub site: Option<SiteBrief>,
    #[serde(default)]
    pub post_topics: Vec<PostTopicLink>,
}

/// List filters; all optional and combined with AND.
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub keyword: Option<String>,
    pub author_id: Option<i64>,
    pub site_id: Option<i64>,
    pub topic_id: Option<i64>,
}

impl PostFilter {
    fn into_filter(self) -> Option<Filter> {
        let mut parts = Vec::new();
        if let Some(k) = self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            parts.push(Filter::ilike("content", contains_pattern(k)));
        }
        if let Some(id) = self.author_id {
            parts.push(Filter::eq("author_user", id));
        }
        if let Some(id) = self.site_id {
            parts.push(Filter::eq("site_site", id));
        }
        if let Some(id) = self.topic_id {
            parts.push(Filter::related("post_topics", Filter::eq("topic_topics", id)));
        }
        Filter::all(parts)
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub content: Option<String>,
    pub site_id: Option<i64>,
    pub topics: Vec<String>,
    pub images: Vec<FilePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostPatch {
    pub content: Option<String>,
    pub media_data: Option<Value>,
    /// Replaces the post's topics by name when present.
    pub topics: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct Ownership {
    id: i64,
    author_user: i64,
}

fn post_fields() -> Vec<Field> {
    let mut fields = cols(POST_COLUMNS);
    fields.push(Field::rel("author", cols(&["id", "nickname", "avatar_url"])));
    fields.push(Field::rel("site", cols(BRIEF_COLUMNS)));
    fields.push(Field::rel(
        "post_topics",
        vec![Field::col("id"), Field::rel("topic", cols(&["id", "name"]))],
    ));
    fields
}

fn content_text(content: Option<&str>) -> Result<String, AppError> {
    let content = RequestValidator::required_text(content, "帖子内容")?;
    RequestValidator::max_chars(&content, MAX_CONTENT_CHARS, "帖子内容")?;
    Ok(content)
}

fn check_owner(caller: &Claims, post: &Ownership, action: &str) -> Result<(), AppError> {
    if post.author_user == caller.id || caller.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("无权{}该帖子", action)))
    }
}

pub struct PostService;

impl PostService {
    pub async fn list(
        state: &AppState,
        page: PageParams,
        sort: SortParams,
        filter: PostFilter,
    ) -> Result<PageData<PostView>, AppError> {
        let q = Query::table(POSTS)
            .maybe_filter(filter.into_filter())
            .order_by(sort.column, sort.direction)
            .fields(post_fields());
        let paged = state.client.find(&q, page.page, page.page_size).await?;
        let items = paged.datas.into_iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(PageData::new(items, paged.aggregate.count, page))
    }

    pub async fn get(state: &AppState, id: i64) -> Result<PostView, AppError> {
        let q = Query::table(POSTS).filter(Filter::id(id)).fields(post_fields());
        match state.client.query_first(&q).await? {
            Some(row) => decode_row(row),
            None => Err(AppError::NotFound("帖子不存在".into())),
        }
    }

    async fn ownership(state: &AppState, id: i64) -> Result<Ownership, AppError> {
        let q = Query::table(POSTS).filter(Filter::id(id)).fields(cols(&["id", "author_user"]));
        match state.client.query_first(&q).await? {
            Some(row) => decode_row(row),
            None => Err(AppError::NotFound("帖子不存在".into())),
        }
    }

    /// Images are stored before the post row is written; missing topics are created.
    pub async fn create(state: &AppState, caller: &Claims, input: NewPost) -> Result<PostView, AppError> {
        let content = content_text(input.content.as_deref())?;
        let site_id = match input.site_id {
            Some(id) => id,
            None => UserService::require(state, caller.id)
                .await?
                .current_site_site
                .ok_or_else(|| AppError::BadRequest("请选择站点".into()))?,
        };
        if !SiteService::exists(state, site_id).await? {
            return Err(AppError::NotFound("站点不存在".into()));
        }

        let media = UploadService::upload_many(state, input.images, Some(IMAGE_DIRECTORY)).await?;
        let mut obj = Map::new();
        obj.insert("content".into(), json!(content));
        obj.insert("media_data".into(), json!(media));
        obj.insert("author_user".into(), json!(caller.id));
        obj.insert("site_site".into(), json!(site_id));
        let id = state
            .client
            .insert(&Insert::one(POSTS, obj).returning(cols(&["id"])))
            .await?
            .first()
            .and_then(|row| row.get("id").and_then(Value::as_i64))
            .ok_or_else(|| AppError::Internal("post insert returned no id".into()))?;

        let topics = TopicService::ensure_by_names(state, &input.topics).await?;
        TopicService::link(state, id, &topics).await?;
        tracing::info!(post_id = id, author = caller.id, site_id, topics = topics.len(), "post created");
        Self::get(state, id).await
    }

    /// Topic replacement deletes every join row and inserts the new set; it is not atomic.
    pub async fn update(state: &AppState, caller: &Claims, id: i64, patch: PostPatch) -> Result<PostView, AppError> {
        let post = Self::ownership(state, id).await?;
        check_owner(caller, &post, "修改")?;

        let mut set = Map::new();
        if let Some(content) = patch.content.as_deref() {
            set.insert("content".into(), json!(content_text(Some(content))?));
        }
        if let Some(media) = patch.media_data {
            if !media.is_array() {
                return Err(AppError::BadRequest("media_data 必须是数组".into()));
            }
            set.insert("media_data".into(), media);
        }
        if set.is_empty() && patch.topics.is_none() {
            return Err(AppError::BadRequest("没有需要更新的字段".into()));
        }

        if !set.is_empty() {
            state.client.update(&Update::new(POSTS, Filter::id(post.id), set)).await?;
        }
        if let Some(names) = patch.topics {
            let removed = TopicService::unlink_post(state, post.id).await?;
            let topics = TopicService::ensure_by_names(state, &names).await?;
            let added = TopicService::link(state, post.id, &topics).await?;
            tracing::debug!(post_id = post.id, removed, added, "post topics replaced");
        }
        tracing::info!(post_id = post.id, by = caller.id, "post updated");
        Self::get(state, post.id).await
    }

    /// Removes join rows, then comments, then the post.
    pub async fn delete(state: &AppState, caller: &Claims, id: i64) -> Result<(), AppError> {
        let post = Self::ownership(state, id).await?;
        check_owner(caller, &post, "删除")?;

        let links = TopicService::unlink_post(state, post.id).await?;
        let comments = state
            .client
            .delete(&Delete::new(COMMENTS, Filter::eq("post_posts", post.id)))
            .await?
            .affected_rows;
        let res = state.client.delete(&Delete::new(POSTS, Filter::id(post.id))).await?;
        if res.affected_rows == 0 {
            return Err(AppError::NotFound("帖子不存在或已被删除".into()));
        }
        tracing::info!(post_id = post.id, by = caller.id, links, comments, "post deleted");
        Ok(())
    }

    pub async fn by_topic(
        state: &AppState,
        topic_id: i64,
        page: PageParams,
        sort: SortParams,
    ) -> Result<PageData<PostView>, AppError> {
        TopicService::get(state, topic_id).await?;
        let filter = PostFilter {
            topic_id: Some(topic_id),
            ..Default::default()
        };
        Self::list(state, page, sort, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Direction;
    use crate::config::AppConfig;
    use crate::service::sites::NewSite;
    use crate::service::topics::{TopicInput, POST_TOPICS, TOPICS};

    struct Fixture {
        state: AppState,
        author: Claims,
        site: i64,
    }

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

    async fn fixture() -> Fixture {
        let state = AppState::in_memory(AppConfig::for_tests());
        let site = SiteService::create(&state, &claims(0, "admin"), NewSite { name: Some("主站".into()), icon_url: None })
            .await
            .unwrap()
            .id;
        let user = UserService::insert(&state, "13800138000", None, "作者", Some(site)).await.unwrap();
        Fixture {
            state,
            author: claims(user.id, "user"),
            site,
        }
    }

    fn newest() -> SortParams {
        SortParams {
            column: "created_at".into(),
            direction: Direction::Desc,
        }
    }

    fn post(content: &str, topics: &[&str]) -> NewPost {
        NewPost {
            content: Some(content.into()),
            site_id: None,
            topics: topics.iter().map(|t| t.to_string()).collect(),
            images: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_links_existing_and_new_topics() {
        let f = fixture().await;
        let a = TopicService::create(&f.state, TopicInput { name: Some("A".into()) }).await.unwrap();
        let created = PostService::create(&f.state, &f.author, post("hello", &["A", "B"])).await.unwrap();

        assert_eq!(f.state.client.count(TOPICS, None).await.unwrap(), 2);
        let names: Vec<_> = created
            .post_topics
            .iter()
            .filter_map(|l| l.topic.as_ref().map(|t| t.name.clone()))
            .collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(created.post_topics[0].topic.as_ref().unwrap().id, a.id);
        assert_eq!(created.site.as_ref().unwrap().id, f.site);
        assert_eq!(created.author.as_ref().unwrap().nickname.as_deref(), Some("作者"));
        assert_eq!(created.media_data, json!([]));
    }

    #[tokio::test]
    async fn images_land_in_media_data() {
        let f = fixture().await;
        let mut input = post("pic", &[]);
        input.images.push(FilePart {
            file_name: "cat.png".into(),
            content_type: "image/png".into(),
            bytes: vec![1, 2, 3],
        });
        let created = PostService::create(&f.state, &f.author, input).await.unwrap();
        let media = created.media_data.as_array().unwrap();
        assert_eq!(media.len(), 1);
        assert!(media[0]["key"].as_str().unwrap().starts_with("uploads/posts/"));
        assert_eq!(media[0]["size"], json!(3));
    }

    #[tokio::test]
    async fn blank_content_is_rejected_before_any_write() {
        let f = fixture().await;
        let res = PostService::create(&f.state, &f.author, post("   ", &["X"])).await;
        assert!(matches!(res, Err(AppError::BadRequest(_))));
        assert_eq!(f.state.client.count(TOPICS, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn second_page_holds_the_remainder() {
        let f = fixture().await;
        for i in 0..15 {
            PostService::create(&f.state, &f.author, post(&format!("post {}", i), &[])).await.unwrap();
        }
        let page = PostService::list(&f.state, PageParams::new(2, 10), newest(), PostFilter::default())
            .await
            .unwrap();
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.total, 15);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items[4].content, "post 0");
    }

    #[tokio::test]
    async fn filters_by_topic_and_keyword() {
        let f = fixture().await;
        PostService::create(&f.state, &f.author, post("Rust 入门", &["编程"])).await.unwrap();
        PostService::create(&f.state, &f.author, post("食堂推荐", &["生活"])).await.unwrap();
        let topic = TopicService::ensure_by_names(&f.state, &["编程"]).await.unwrap().remove(0);

        let by_topic = PostService::by_topic(&f.state, topic.id, PageParams::default(), newest()).await.unwrap();
        assert_eq!(by_topic.total, 1);
        assert_eq!(by_topic.items[0].content, "Rust 入门");

        let filter = PostFilter {
            keyword: Some("rust".into()),
            ..Default::default()
        };
        let by_keyword = PostService::list(&f.state, PageParams::default(), newest(), filter).await.unwrap();
        assert_eq!(by_keyword.total, 1);
    }

    #[tokio::test]
    async fn update_replaces_topics_and_checks_owner() {
        let f = fixture().await;
        let p = PostService::create(&f.state, &f.author, post("v1", &["A", "B"])).await.unwrap();
        let patch = PostPatch {
            content: Some("v2".into()),
            media_data: None,
            topics: Some(vec!["C".into()]),
        };
        let stranger = claims(f.author.id + 100, "user");
        let denied = PostService::update(&f.state, &stranger, p.id, patch.clone()).await;
        assert!(matches!(denied, Err(AppError::Forbidden(_))));

        let updated = PostService::update(&f.state, &f.author, p.id, patch).await.unwrap();
        assert_eq!(updated.content, "v2");
        assert_eq!(updated.post_topics.len(), 1);
        assert_eq!(f.state.client.count(POST_TOPICS, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_removes_join_rows_and_comments() {
        let f = fixture().await;
        let p = PostService::create(&f.state, &f.author, post("bye", &["A", "B"])).await.unwrap();
        let mut obj = Map::new();
        obj.insert("content".into(), json!("nice"));
        obj.insert("author_user".into(), json!(f.author.id));
        obj.insert("post_posts".into(), json!(p.id));
        f.state.client.insert(&Insert::one(COMMENTS, obj)).await.unwrap();

        let other = claims(f.author.id + 1, "user");
        assert!(matches!(
            PostService::delete(&f.state, &other, p.id).await,
            Err(AppError::Forbidden(_))
        ));
        PostService::delete(&f.state, &claims(999, "admin"), p.id).await.unwrap();

        let links = Filter::eq("post_posts", p.id);
        assert_eq!(f.state.client.count(POST_TOPICS, Some(&links)).await.unwrap(), 0);
        assert_eq!(f.state.client.count(COMMENTS, None).await.unwrap(), 0);
        assert!(matches!(PostService::get(&f.state, p.id).await, Err(AppError::NotFound(_))));
        assert_eq!(f.state.client.count(TOPICS, None).await.unwrap(), 2);
    }
}
