//! User records: lookups shared with auth, and the admin console operations.

use super::decode_row;
use crate::client::{cols, Delete, Field, Filter, Insert, Query, Update};
use crate::error::AppError;
use crate::service::pagination::{PageData, PageParams, SortParams};
use crate::service::password::hash_password;
use crate::service::sites::{SiteBrief, BRIEF_COLUMNS};
use crate::service::token::{Claims, TokenSubject, ROLE_ADMIN};
use crate::service::validation::{RequestValidator, MAX_BIO_CHARS, MAX_NICKNAME_CHARS};
use crate::state::AppState;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const USERS: &str = "users";

const USER_COLUMNS: &[&str] = &[
    "id",
    "mobile",
    "password",
    "nickname",
    "bio",
    "avatar_url",
    "role",
    "last_login_at",
    "current_site_site",
    "created_at",
    "updated_at",
];

pub const SORTABLE: &[&str] = &["id", "created_at", "updated_at", "mobile", "nickname"];

/// A full user row, password hash included. Never serialized to clients.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRow {
    pub id: i64,
    pub mobile: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub role: String,
    #[serde(default)]
    pub last_login_at: Option<String>,
    #[serde(default)]
    pub current_site_site: Option<i64>,
    #[serde(default)]
    pub current_site: Option<SiteBrief>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserRow {
    pub fn subject(&self) -> TokenSubject<'_> {
        TokenSubject {
            id: self.id,
            mobile: &self.mobile,
            nickname: self.nickname.as_deref(),
            role: &self.role,
            current_site_id: self.current_site_site,
        }
    }
}

/// What clients see of a user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub mobile: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub role: String,
    pub current_site: Option<SiteBrief>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        UserProfile {
            id: row.id,
            mobile: row.mobile,
            nickname: row.nickname,
            avatar_url: row.avatar_url,
            bio: row.bio,
            role: row.role,
            current_site: row.current_site,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewUser {
    pub mobile: Option<String>,
    pub password: Option<String>,
    pub nickname: Option<String>,
}

/// Editable profile fields. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

impl ProfilePatch {
    /// Validated column set; an empty patch is rejected.
    pub fn into_set(self) -> Result<Map<String, Value>, AppError> {
        let mut set = Map::new();
        if let Some(nickname) = self.nickname {
            let nickname = nickname.trim().to_string();
            if nickname.is_empty() {
                return Err(AppError::BadRequest("昵称不能为空".into()));
            }
            RequestValidator::max_chars(&nickname, MAX_NICKNAME_CHARS, "昵称")?;
            set.insert("nickname".into(), json!(nickname));
        }
        if let Some(bio) = self.bio {
            RequestValidator::max_chars(&bio, MAX_BIO_CHARS, "个人简介")?;
            set.insert("bio".into(), json!(bio));
        }
        if let Some(avatar) = self.avatar_url {
            set.insert("avatar_url".into(), json!(avatar));
        }
        if set.is_empty() {
            return Err(AppError::BadRequest("没有需要更新的字段".into()));
        }
        Ok(set)
    }
}

fn user_fields() -> Vec<Field> {
    let mut fields = cols(USER_COLUMNS);
    fields.push(Field::rel("current_site", cols(BRIEF_COLUMNS)));
    fields
}

pub struct UserService;

impl UserService {
    async fn find_one(state: &AppState, filter: Filter) -> Result<Option<UserRow>, AppError> {
        let q = Query::table(USERS).filter(filter).fields(user_fields());
        state.client.query_first(&q).await?.map(decode_row).transpose()
    }

    pub async fn find_by_mobile(state: &AppState, mobile: &str) -> Result<Option<UserRow>, AppError> {
        Self::find_one(state, Filter::eq("mobile", mobile)).await
    }

    pub async fn find_by_id(state: &AppState, id: i64) -> Result<Option<UserRow>, AppError> {
        Self::find_one(state, Filter::id(id)).await
    }

    pub async fn require(state: &AppState, id: i64) -> Result<UserRow, AppError> {
        Self::find_by_id(state, id).await?.ok_or(AppError::UserNotFound)
    }

    /// Insert a user row. The password must already be hashed.
    pub async fn insert(
        state: &AppState,
        mobile: &str,
        password_hash: Option<String>,
        nickname: &str,
        current_site: Option<i64>,
    ) -> Result<UserRow, AppError> {
        let mut obj = Map::new();
        obj.insert("mobile".into(), json!(mobile));
        obj.insert("nickname".into(), json!(nickname));
        if let Some(hash) = password_hash {
            obj.insert("password".into(), json!(hash));
        }
        if let Some(site) = current_site {
            obj.insert("current_site_site".into(), json!(site));
        }
        let inserted = state
            .client
            .insert(&Insert::one(USERS, obj).returning(cols(&["id"])))
            .await
            .map_err(|e| match e {
                AppError::Conflict(_) => AppError::UserExists,
                other => other,
            })?;
        let id = inserted
            .first()
            .and_then(|row| row.get("id").and_then(Value::as_i64))
            .ok_or_else(|| AppError::Internal("user insert returned no id".into()))?;
        tracing::info!(user_id = id, "user created");
        Self::require(state, id).await
    }

    pub async fn set_columns(state: &AppState, id: i64, set: Map<String, Value>) -> Result<UserRow, AppError> {
        let res = state
            .client
            .update(&Update::new(USERS, Filter::id(id), set).returning(cols(&["id"])))
            .await?;
        if res.affected_rows == 0 {
            return Err(AppError::UserNotFound);
        }
        Self::require(state, id).await
    }

    /// Stamps `last_login_at`. Mobiles listed in `ADMIN_MOBILES` are promoted to admin here,
    /// before the token is issued.
    pub async fn touch_login(state: &AppState, user: &UserRow) -> Result<UserRow, AppError> {
        let mut set = Map::new();
        set.insert("last_login_at".into(), json!(Utc::now().to_rfc3339()));
        if user.role != ROLE_ADMIN && state.config.is_admin_mobile(&user.mobile) {
            tracing::info!(user_id = user.id, "granting admin role from ADMIN_MOBILES");
            set.insert("role".into(), json!(ROLE_ADMIN));
        }
        Self::set_columns(state, user.id, set).await
    }

    /// Admin listing; `keyword` matches nickname or mobile.
    pub async fn list(
        state: &AppState,
        page: PageParams,
        sort: SortParams,
        keyword: Option<&str>,
    ) -> Result<PageData<UserProfile>, AppError> {
        let filter = keyword.map(str::trim).filter(|k| !k.is_empty()).map(|k| {
            let pattern = crate::client::query::contains_pattern(k);
            Filter::Or(vec![Filter::ilike("nickname", pattern.clone()), Filter::ilike("mobile", pattern)])
        });
        let q = Query::table(USERS)
            .maybe_filter(filter)
            .order_by(sort.column, sort.direction)
            .fields(user_fields());
        let paged = state.client.find(&q, page.page, page.page_size).await?;
        let rows = paged
            .datas
            .into_iter()
            .map(|v| decode_row::<UserRow>(v).map(UserProfile::from))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(PageData::new(rows, paged.aggregate.count, page))
    }

    /// Admin creation; the nickname falls back to the mobile number.
    pub async fn create(state: &AppState, caller: &Claims, input: NewUser) -> Result<UserProfile, AppError> {
        if !caller.is_admin() {
            return Err(AppError::Forbidden("无权创建用户".into()));
        }
        let (Some(mobile), Some(password)) = (input.mobile, input.password) else {
            return Err(AppError::BadRequest("手机号和密码不能为空".into()));
        };
        RequestValidator::mobile(&mobile)?;
        RequestValidator::password(&password)?;
        if Self::find_by_mobile(state, &mobile).await?.is_some() {
            return Err(AppError::UserExists);
        }
        let nickname = input
            .nickname
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| mobile.clone());
        RequestValidator::max_chars(&nickname, MAX_NICKNAME_CHARS, "昵称")?;
        let hash = hash_password(&password, state.config.bcrypt_cost).await?;
        Ok(Self::insert(state, &mobile, Some(hash), &nickname, None).await?.into())
    }

    pub async fn get(state: &AppState, id: i64) -> Result<UserProfile, AppError> {
        Ok(Self::require(state, id).await?.into())
    }

    pub async fn update(state: &AppState, caller: &Claims, id: i64, patch: ProfilePatch) -> Result<UserProfile, AppError> {
        if caller.id != id && !caller.is_admin() {
            return Err(AppError::Forbidden("无权修改该用户".into()));
        }
        let set = patch.into_set()?;
        Ok(Self::set_columns(state, id, set).await?.into())
    }

    /// Admin only. Users that still own posts or comments are kept.
    pub async fn delete(state: &AppState, caller: &Claims, id: i64) -> Result<(), AppError> {
        if !caller.is_admin() {
            return Err(AppError::Forbidden("无权删除用户".into()));
        }
        if caller.id == id {
            return Err(AppError::BadRequest("不能删除当前登录用户".into()));
        }
        let res = state
            .client
            .delete(&Delete::new(USERS, Filter::id(id)).returning(cols(&["id"])))
            .await?;
        if res.affected_rows == 0 {
            return Err(AppError::UserNotFound);
        }
        tracing::info!(user_id = id, by = caller.id, "user deleted");
        Ok(())
    }
}
