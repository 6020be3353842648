//! Site handlers.

use crate::client::Direction;
use crate::error::AppError;
use crate::extractors::{ApiJson, ApiPath, AuthUser};
use crate::response::{ok, ok_with_message, ApiResponse};
use crate::service::sites::{NewSite, SiteBrief, SiteDetail, SiteRow, SiteService};
use crate::state::AppState;
use axum::extract::State;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct SiteList {
    pub list: Vec<SiteRow>,
}

/// Public list, oldest first.
pub async fn list(State(state): State<AppState>) -> Result<ApiResponse<SiteList>, AppError> {
    let list = SiteService::list(&state, Direction::Asc).await?;
    Ok(ok(SiteList { list }))
}

/// Signed-in list, newest first.
pub async fn list_for_user(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
) -> Result<ApiResponse<SiteList>, AppError> {
    let list = SiteService::list(&state, Direction::Desc).await?;
    Ok(ok(SiteList { list }))
}

pub async fn read(State(state): State<AppState>, ApiPath(id): ApiPath<i64>) -> Result<ApiResponse<SiteDetail>, AppError> {
    Ok(ok(SiteService::get(&state, id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiJson(body): ApiJson<NewSite>,
) -> Result<ApiResponse<SiteRow>, AppError> {
    let site = SiteService::create(&state, &claims, body).await?;
    Ok(ok_with_message(site, "站点创建成功"))
}

#[derive(Debug, Deserialize)]
pub struct SwitchSite {
    pub site_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CurrentSite {
    pub current_site: SiteBrief,
}

pub async fn switch(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    ApiJson(body): ApiJson<SwitchSite>,
) -> Result<ApiResponse<CurrentSite>, AppError> {
    let site_id = body.site_id.ok_or_else(|| AppError::BadRequest("站点ID不能为空".into()))?;
    let current_site = SiteService::switch(&state, claims.id, site_id).await?;
    Ok(ok_with_message(CurrentSite { current_site }, "切换站点成功"))
}
