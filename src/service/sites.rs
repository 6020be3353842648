//! Sites, their banners and quicklinks, and each user's current-site pointer.

use super::decode_row;
use crate::client::{cols, Direction, Field, Filter, Insert, Query, Update};
use crate::error::AppError;
use crate::service::token::Claims;
use crate::service::validation::RequestValidator;
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const SITES: &str = "sites";

/// The subset of a site embedded in users and posts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteBrief {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Banner {
    pub id: i64,
    pub name: String,
    pub image_url: String,
    #[serde(default)]
    pub link: Option<String>,
    pub sort: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quicklink {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    pub sort: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteDetail {
    #[serde(flatten)]
    pub site: SiteRow,
    pub site_banners: Vec<Banner>,
    pub site_quicklinks: Vec<Quicklink>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSite {
    pub name: Option<String>,
    pub icon_url: Option<String>,
}

const SITE_COLUMNS: &[&str] = &["id", "name", "icon_url", "created_at", "updated_at"];
pub(crate) const BRIEF_COLUMNS: &[&str] = &["id", "name", "icon_url"];

pub struct SiteService;

impl SiteService {
    pub async fn list(state: &AppState, direction: Direction) -> Result<Vec<SiteRow>, AppError> {
        let q = Query::table(SITES)
            .order_by("created_at", direction)
            .fields(cols(SITE_COLUMNS));
        state.client.query(&q).await?.into_iter().map(decode_row).collect()
    }

    /// Site with banners and quicklinks, both ordered by `sort`.
    pub async fn get(state: &AppState, id: i64) -> Result<SiteDetail, AppError> {
        let mut fields = cols(SITE_COLUMNS);
        fields.push(Field::rel("site_banners", cols(&["id", "name", "image_url", "link", "sort"])));
        fields.push(Field::rel("site_quicklinks", cols(&["id", "name", "icon_url", "link", "sort"])));
        let q = Query::table(SITES).filter(Filter::id(id)).fields(fields);
        let row = state
            .client
            .query_first(&q)
            .await?
            .ok_or_else(|| AppError::NotFound("站点不存在".into()))?;
        let mut detail: SiteDetail = decode_row(row)?;
        detail.site_banners.sort_by_key(|b| (b.sort, b.id));
        detail.site_quicklinks.sort_by_key(|q| (q.sort, q.id));
        Ok(detail)
    }

    pub async fn create(state: &AppState, caller: &Claims, input: NewSite) -> Result<SiteRow, AppError> {
        if !caller.is_admin() {
            return Err(AppError::Forbidden("无权创建站点".into()));
        }
        let name = RequestValidator::required_text(input.name.as_deref(), "站点名称")?;
        let mut obj = Map::new();
        obj.insert("name".into(), json!(name));
        if let Some(icon) = input.icon_url.filter(|s| !s.trim().is_empty()) {
            obj.insert("icon_url".into(), json!(icon));
        }
        let site = Self::insert(state, obj).await?;
        tracing::info!(site_id = site.id, "site created");
        Ok(site)
    }

    /// Seeds `DEFAULT_SITE_NAME` when no site exists yet. Returns the seeded site, if any.
    pub async fn bootstrap(state: &AppState) -> Result<Option<SiteRow>, AppError> {
        let Some(name) = state.config.default_site_name.as_deref() else {
            return Ok(None);
        };
        if state.client.count(SITES, None).await? > 0 {
            return Ok(None);
        }
        let mut obj = Map::new();
        obj.insert("name".into(), json!(name));
        let site = Self::insert(state, obj).await?;
        tracing::info!(site_id = site.id, name = %site.name, "default site seeded");
        Ok(Some(site))
    }

    async fn insert(state: &AppState, obj: Map<String, Value>) -> Result<SiteRow, AppError> {
        let row = state
            .client
            .insert(&Insert::one(SITES, obj).returning(cols(SITE_COLUMNS)))
            .await?
            .first()
            .ok_or_else(|| AppError::Internal("site insert returned no row".into()))?;
        decode_row(row)
    }

    /// Earliest created site; new users start there.
    pub async fn default_site(state: &AppState) -> Result<Option<SiteBrief>, AppError> {
        let q = Query::table(SITES)
            .order_by("created_at", Direction::Asc)
            .fields(cols(BRIEF_COLUMNS));
        state.client.query_first(&q).await?.map(decode_row).transpose()
    }

    pub async fn exists(state: &AppState, id: i64) -> Result<bool, AppError> {
        Ok(state.client.count(SITES, Some(&Filter::id(id))).await? > 0)
    }

    /// Point the caller at another site and return it.
    pub async fn switch(state: &AppState, user_id: i64, site_id: i64) -> Result<SiteBrief, AppError> {
        let q = Query::table(SITES).filter(Filter::id(site_id)).fields(cols(BRIEF_COLUMNS));
        let site: SiteBrief = match state.client.query_first(&q).await? {
            Some(row) => decode_row(row)?,
            None => return Err(AppError::NotFound("站点不存在".into())),
        };
        let mut set = Map::new();
        set.insert("current_site_site".into(), Value::from(site_id));
        let res = state
            .client
            .update(&Update::new(super::users::USERS, Filter::id(user_id), set).returning(cols(&["id"])))
            .await?;
        if res.affected_rows == 0 {
            return Err(AppError::UserNotFound);
        }
        tracing::info!(user_id, site_id, "current site switched");
        Ok(site)
    }
}
